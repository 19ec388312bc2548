//! Microphone input
//!
//! The engine asks for raw input: two channels at the render rate with every
//! voice-call enhancement switched off. Hosts wire a real device in through
//! the `Microphone` trait; `BufferMicrophone` plays a prepared buffer instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::AudioBuffer;
use crate::error::{Result, StudioError};

/// What the engine requests when opening an input device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrophoneConstraints {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl MicrophoneConstraints {
    /// Unprocessed stereo input at `sample_rate`
    pub fn raw(sample_rate: u32) -> Self {
        Self {
            channel_count: 2,
            sample_rate,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

/// An open input stream
///
/// `read` fills the whole block, padding with silence once the device has
/// nothing more to give.
pub trait InputStream: Send {
    fn channels(&self) -> usize;

    /// Overwrite `block` with the next `block.len()` frames
    fn read(&mut self, block: &mut AudioBuffer);

    /// Release the device; reading afterwards yields silence
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Source of input streams
pub trait Microphone: Send {
    /// Open the device, failing with `PermissionDenied` if access is refused
    fn open(&mut self, constraints: &MicrophoneConstraints) -> Result<Box<dyn InputStream>>;
}

// ============================================================================
// Buffer-backed microphone
// ============================================================================

/// Microphone that "sings" a prepared buffer
#[derive(Debug, Clone)]
pub struct BufferMicrophone {
    take: Arc<AudioBuffer>,
    deny: bool,
    opened: usize,
}

impl BufferMicrophone {
    pub fn new(take: AudioBuffer) -> Self {
        Self {
            take: Arc::new(take),
            deny: false,
            opened: 0,
        }
    }

    /// A microphone that produces silence forever
    pub fn silent() -> Self {
        Self::new(AudioBuffer::new(1, 0, crate::engine::buffer::DEFAULT_SAMPLE_RATE))
    }

    /// A microphone whose permission prompt is always refused
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::silent()
        }
    }

    /// Number of successful `open` calls
    pub fn times_opened(&self) -> usize {
        self.opened
    }
}

impl Microphone for BufferMicrophone {
    fn open(&mut self, constraints: &MicrophoneConstraints) -> Result<Box<dyn InputStream>> {
        if self.deny {
            return Err(StudioError::PermissionDenied {
                reason: "the user refused microphone access".to_string(),
            });
        }
        let take = if self.take.sample_rate() != constraints.sample_rate && !self.take.is_empty() {
            Arc::new(self.take.resampled(constraints.sample_rate))
        } else {
            Arc::clone(&self.take)
        };
        self.opened += 1;
        Ok(Box::new(BufferInputStream {
            take,
            channels: constraints.channel_count.max(1) as usize,
            position: 0,
            open: true,
        }))
    }
}

#[derive(Debug)]
struct BufferInputStream {
    take: Arc<AudioBuffer>,
    channels: usize,
    position: usize,
    open: bool,
}

impl InputStream for BufferInputStream {
    fn channels(&self) -> usize {
        self.channels
    }

    fn read(&mut self, block: &mut AudioBuffer) {
        block.clear();
        if !self.open || self.take.num_channels() == 0 {
            return;
        }
        let available = self.take.len().saturating_sub(self.position);
        let frames = block.len().min(available);
        let source_channels = self.take.num_channels();
        for ch in 0..block.num_channels() {
            let src = self.take.channel(ch.min(source_channels - 1));
            block.channel_mut(ch)[..frames]
                .copy_from_slice(&src[self.position..self.position + frames]);
        }
        self.position += frames;
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
