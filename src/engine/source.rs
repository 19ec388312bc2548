//! Scheduled buffer sources
//!
//! A source plays a shared decoded buffer into a bus starting at a given
//! frame on the render clock, optionally skipping a number of frames at the
//! front. It stops early when its cancellation token is set and reports a
//! natural end over a crossbeam channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use tracing::debug;

use crate::engine::AudioBuffer;

/// Identifier handed out by the render context
pub type SourceId = u64;

/// Completion signal of a scheduled source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// The source played to the end of its buffer
    Ended(SourceId),
}

/// Shared stop flag; cancelling twice is harmless
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One buffer scheduled on the render clock
#[derive(Debug)]
pub struct ScheduledSource {
    id: SourceId,
    buffer: Arc<AudioBuffer>,
    start_frame: u64,
    /// Next frame of `buffer` to play
    cursor: usize,
    token: CancelToken,
    done: Sender<SourceEvent>,
    finished: bool,
}

impl ScheduledSource {
    pub fn new(
        id: SourceId,
        buffer: Arc<AudioBuffer>,
        start_frame: u64,
        offset_frames: usize,
        token: CancelToken,
        done: Sender<SourceEvent>,
    ) -> Self {
        Self {
            id,
            buffer,
            start_frame,
            cursor: offset_frames,
            token,
            done,
            finished: false,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Sum this source into `bus` for the block starting at `clock`
    ///
    /// Returns false once the source is finished, either because it was
    /// cancelled (silently) or because it ran out of frames (signalled).
    pub fn render_into(&mut self, clock: u64, bus: &mut AudioBuffer) -> bool {
        if self.finished {
            return false;
        }
        if self.token.is_cancelled() {
            self.finished = true;
            return false;
        }

        let block_end = clock + bus.len() as u64;
        if self.start_frame >= block_end {
            return true;
        }

        let dest_start = self.start_frame.saturating_sub(clock) as usize;
        let available = self.buffer.len().saturating_sub(self.cursor);
        let frames = (bus.len() - dest_start).min(available);
        let source_channels = self.buffer.num_channels();

        if frames > 0 && source_channels > 0 {
            for ch in 0..bus.num_channels() {
                let src = &self.buffer.channel(ch.min(source_channels - 1))
                    [self.cursor..self.cursor + frames];
                let dest = &mut bus.channel_mut(ch)[dest_start..dest_start + frames];
                for (d, s) in dest.iter_mut().zip(src) {
                    *d += s;
                }
            }
            self.cursor += frames;
        }

        if self.cursor >= self.buffer.len() {
            self.finished = true;
            debug!(source = self.id, "Scheduled source ended");
            // The receiver may already be gone during teardown
            let _ = self.done.send(SourceEvent::Ended(self.id));
            return false;
        }
        true
    }
}
