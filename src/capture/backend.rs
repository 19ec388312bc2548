//! Capture backends
//!
//! A capture backend sits on the recorder tap of the render path and turns
//! rendered blocks into chunks for the control side. Neither backend writes
//! anything back into the graph, so monitoring and export levels are the
//! same whichever one is active.

use std::collections::VecDeque;
use std::fmt;

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::assembler::Chunk;
use crate::engine::AudioBuffer;
use crate::error::{Result, StudioError};

/// Frames per chunk for the polling backend
pub const DEFAULT_POLLING_CHUNK: usize = 4096;

/// Which backend to build at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Streaming, falling back to polling if it cannot start
    #[default]
    Auto,
    Streaming,
    Polling,
}

/// Concrete backend identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Streaming,
    Polling,
    Scripted,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Streaming => write!(f, "streaming"),
            BackendKind::Polling => write!(f, "polling"),
            BackendKind::Scripted => write!(f, "scripted"),
        }
    }
}

/// Render-side half of live capture
pub trait CaptureBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Begin sending chunks of `channels` channels to `sink`
    fn start(&mut self, sink: Sender<Chunk>, channels: usize) -> Result<()>;

    /// Observe one rendered block of the recorder tap
    fn capture(&mut self, tap: &AudioBuffer);

    /// Flush anything pending and release the sink
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

fn copy_block(tap: &AudioBuffer, channels: usize) -> Chunk {
    (0..channels)
        .map(|ch| tap.channel(ch.min(tap.num_channels().saturating_sub(1))).to_vec())
        .collect()
}

fn require_channels(channels: usize) -> Result<()> {
    if channels == 0 {
        return Err(StudioError::CaptureBackend {
            reason: "capture needs at least one channel".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Streaming
// ============================================================================

/// Copies every block into a fresh chunk and sends it immediately
#[derive(Debug, Default)]
pub struct StreamingBackend {
    sink: Option<Sender<Chunk>>,
    channels: usize,
}

impl StreamingBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureBackend for StreamingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    fn start(&mut self, sink: Sender<Chunk>, channels: usize) -> Result<()> {
        require_channels(channels)?;
        self.sink = Some(sink);
        self.channels = channels;
        Ok(())
    }

    fn capture(&mut self, tap: &AudioBuffer) {
        let Some(sink) = &self.sink else {
            return;
        };
        if tap.is_empty() || tap.num_channels() == 0 {
            return;
        }
        if sink.send(copy_block(tap, self.channels)).is_err() {
            debug!("Capture sink closed, stopping streaming backend");
            self.sink = None;
        }
    }

    fn stop(&mut self) {
        self.sink = None;
    }

    fn is_active(&self) -> bool {
        self.sink.is_some()
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Accumulates blocks into fixed-size chunks
///
/// A chunk is handed over each time it fills; the partial tail goes out on
/// `stop`.
#[derive(Debug)]
pub struct PollingBackend {
    chunk_frames: usize,
    sink: Option<Sender<Chunk>>,
    pending: Chunk,
    filled: usize,
}

impl PollingBackend {
    pub fn new(chunk_frames: usize) -> Self {
        Self {
            chunk_frames: chunk_frames.max(1),
            sink: None,
            pending: Vec::new(),
            filled: 0,
        }
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    fn hand_over(&mut self, frames: usize) {
        let chunk: Chunk = self
            .pending
            .iter()
            .map(|channel| channel[..frames].to_vec())
            .collect();
        self.filled = 0;
        if let Some(sink) = &self.sink {
            if sink.send(chunk).is_err() {
                debug!("Capture sink closed, stopping polling backend");
                self.sink = None;
            }
        }
    }
}

impl Default for PollingBackend {
    fn default() -> Self {
        Self::new(DEFAULT_POLLING_CHUNK)
    }
}

impl CaptureBackend for PollingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Polling
    }

    fn start(&mut self, sink: Sender<Chunk>, channels: usize) -> Result<()> {
        require_channels(channels)?;
        self.pending = vec![vec![0.0; self.chunk_frames]; channels];
        self.filled = 0;
        self.sink = Some(sink);
        Ok(())
    }

    fn capture(&mut self, tap: &AudioBuffer) {
        if self.sink.is_none() || tap.num_channels() == 0 {
            return;
        }
        let mut read = 0;
        while read < tap.len() {
            let take = (self.chunk_frames - self.filled).min(tap.len() - read);
            for (ch, pending) in self.pending.iter_mut().enumerate() {
                let src = tap.channel(ch.min(tap.num_channels() - 1));
                pending[self.filled..self.filled + take].copy_from_slice(&src[read..read + take]);
            }
            self.filled += take;
            read += take;
            if self.filled == self.chunk_frames {
                self.hand_over(self.chunk_frames);
            }
        }
    }

    fn stop(&mut self) {
        if self.filled > 0 {
            self.hand_over(self.filled);
        }
        self.sink = None;
    }

    fn is_active(&self) -> bool {
        self.sink.is_some()
    }
}

// ============================================================================
// Scripted
// ============================================================================

/// Emits a fixed chunk sequence regardless of the tap contents
///
/// One chunk goes out per captured block; whatever is left is flushed on
/// `stop`. Can also be built to refuse to start.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: VecDeque<Chunk>,
    sink: Option<Sender<Chunk>>,
    unavailable: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Chunk>) -> Self {
        Self {
            script: script.into(),
            sink: None,
            unavailable: false,
        }
    }

    /// A backend whose `start` always fails
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    fn emit(&mut self) {
        if let (Some(sink), Some(chunk)) = (&self.sink, self.script.pop_front()) {
            let _ = sink.send(chunk);
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Scripted
    }

    fn start(&mut self, sink: Sender<Chunk>, channels: usize) -> Result<()> {
        if self.unavailable {
            return Err(StudioError::CaptureBackend {
                reason: "scripted backend configured as unavailable".to_string(),
            });
        }
        require_channels(channels)?;
        self.sink = Some(sink);
        Ok(())
    }

    fn capture(&mut self, _tap: &AudioBuffer) {
        self.emit();
    }

    fn stop(&mut self) {
        while !self.script.is_empty() && self.sink.is_some() {
            self.emit();
        }
        self.sink = None;
    }

    fn is_active(&self) -> bool {
        self.sink.is_some()
    }
}

// ============================================================================
// Auto
// ============================================================================

/// Tries a primary backend and falls back to a secondary one on start failure
pub struct AutoBackend {
    primary: Box<dyn CaptureBackend>,
    fallback: Box<dyn CaptureBackend>,
    using_fallback: bool,
}

impl fmt::Debug for AutoBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoBackend")
            .field("primary", &self.primary.kind())
            .field("fallback", &self.fallback.kind())
            .field("using_fallback", &self.using_fallback)
            .finish()
    }
}

impl AutoBackend {
    pub fn new(primary: Box<dyn CaptureBackend>, fallback: Box<dyn CaptureBackend>) -> Self {
        Self {
            primary,
            fallback,
            using_fallback: false,
        }
    }

    fn active(&mut self) -> &mut dyn CaptureBackend {
        if self.using_fallback {
            self.fallback.as_mut()
        } else {
            self.primary.as_mut()
        }
    }
}

impl CaptureBackend for AutoBackend {
    fn kind(&self) -> BackendKind {
        if self.using_fallback {
            self.fallback.kind()
        } else {
            self.primary.kind()
        }
    }

    fn start(&mut self, sink: Sender<Chunk>, channels: usize) -> Result<()> {
        self.using_fallback = false;
        match self.primary.start(sink.clone(), channels) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %self.fallback.kind(),
                    "Primary capture backend failed to start, falling back"
                );
                self.using_fallback = true;
                self.fallback.start(sink, channels)
            }
        }
    }

    fn capture(&mut self, tap: &AudioBuffer) {
        self.active().capture(tap);
    }

    fn stop(&mut self) {
        self.active().stop();
    }

    fn is_active(&self) -> bool {
        if self.using_fallback {
            self.fallback.is_active()
        } else {
            self.primary.is_active()
        }
    }
}

/// Build the backend named by `preference`
pub fn select_backend(preference: BackendPreference, polling_chunk: usize) -> Box<dyn CaptureBackend> {
    match preference {
        BackendPreference::Streaming => Box::new(StreamingBackend::new()),
        BackendPreference::Polling => Box::new(PollingBackend::new(polling_chunk)),
        BackendPreference::Auto => Box::new(AutoBackend::new(
            Box::new(StreamingBackend::new()),
            Box::new(PollingBackend::new(polling_chunk)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use pretty_assertions::assert_eq;

    fn block(frames: usize, value: f32) -> AudioBuffer {
        AudioBuffer::from_channels(vec![vec![value; frames], vec![-value; frames]], 48000)
            .unwrap()
    }

    #[test]
    fn test_streaming_sends_copy_per_block() {
        let (tx, rx) = unbounded();
        let mut backend = StreamingBackend::new();
        backend.start(tx, 2).unwrap();
        let mut tap = block(128, 0.5);
        backend.capture(&tap);
        // Mutating the tap after capture must not change the chunk
        tap.apply_gain(0.0);
        backend.capture(&tap);
        backend.stop();

        let chunks: Vec<Chunk> = rx.try_iter().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0][0][0], 0.5);
        assert_eq!(chunks[0][1][127], -0.5);
        assert_eq!(chunks[1][0][0], 0.0);
        assert!(!backend.is_active());
    }

    #[test]
    fn test_polling_hands_over_full_chunks_and_tail() {
        let (tx, rx) = unbounded();
        let mut backend = PollingBackend::new(300);
        backend.start(tx, 2).unwrap();
        for _ in 0..5 {
            backend.capture(&block(128, 0.25));
        }
        let full: Vec<Chunk> = rx.try_iter().collect();
        assert_eq!(full.len(), 2);
        assert!(full.iter().all(|c| c[0].len() == 300));

        backend.stop();
        let tail: Vec<Chunk> = rx.try_iter().collect();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0][0].len(), 640 - 600);
    }

    #[test]
    fn test_polling_without_data_sends_nothing_on_stop() {
        let (tx, rx) = unbounded();
        let mut backend = PollingBackend::default();
        backend.start(tx, 1).unwrap();
        backend.stop();
        assert_eq!(rx.try_iter().count(), 0);
        assert_eq!(backend.chunk_frames(), DEFAULT_POLLING_CHUNK);
    }

    #[test]
    fn test_scripted_emits_in_order() {
        let (tx, rx) = unbounded();
        let script = vec![vec![vec![1.0; 4]], vec![vec![2.0; 4]], vec![vec![3.0; 2]]];
        let mut backend = ScriptedBackend::new(script);
        backend.start(tx, 1).unwrap();
        backend.capture(&block(4, 0.0));
        assert_eq!(backend.remaining(), 2);
        backend.stop();
        let values: Vec<f32> = rx.try_iter().map(|c| c[0][0]).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_auto_falls_back_when_primary_fails() {
        let (tx, rx) = unbounded();
        let mut backend = AutoBackend::new(
            Box::new(ScriptedBackend::unavailable()),
            Box::new(PollingBackend::new(64)),
        );
        backend.start(tx, 2).unwrap();
        assert_eq!(backend.kind(), BackendKind::Polling);
        backend.capture(&block(64, 0.1));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_select_backend_kinds() {
        assert_eq!(
            select_backend(BackendPreference::Polling, 4096).kind(),
            BackendKind::Polling
        );
        assert_eq!(
            select_backend(BackendPreference::Auto, 4096).kind(),
            BackendKind::Streaming
        );
        assert!(StreamingBackend::new().start(unbounded().0, 0).is_err());
    }
}
