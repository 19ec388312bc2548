//! Capture assembly
//!
//! Chunks produced by a capture backend arrive on a crossbeam channel and
//! are appended to a `RecordingSession`. When recording stops the session is
//! concatenated into one contiguous buffer.

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use tracing::debug;
use uuid::Uuid;

use crate::engine::AudioBuffer;

/// One block of captured audio: one sample array per channel
pub type Chunk = Vec<Vec<f32>>;

/// Transient state of one recording
#[derive(Debug, Clone)]
pub struct RecordingSession {
    id: Uuid,
    chunks: Vec<Chunk>,
    total_frames: usize,
    channel_count: Option<usize>,
    sample_rate: u32,
    started_at: DateTime<Utc>,
}

impl RecordingSession {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            chunks: Vec::new(),
            total_frames: 0,
            channel_count: None,
            sample_rate,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames received so far (per channel)
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Channel count, fixed by the first non-empty chunk
    pub fn channel_count(&self) -> Option<usize> {
        self.channel_count
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Append a chunk
    ///
    /// Chunks with no channels or no frames are ignored. The first chunk
    /// fixes the session's channel count; the frame count of a chunk is the
    /// length of its first channel.
    pub fn append(&mut self, chunk: Chunk) {
        let frames = match chunk.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return,
        };
        if self.channel_count.is_none() {
            self.channel_count = Some(chunk.len());
        }
        self.total_frames += frames;
        self.chunks.push(chunk);
    }

    /// Concatenate every chunk in arrival order
    ///
    /// A chunk missing a channel contributes its first channel instead. An
    /// empty session yields a single silent mono frame.
    pub fn assemble(self) -> AudioBuffer {
        let channels = match self.channel_count {
            Some(count) if count > 0 && self.total_frames > 0 => count,
            _ => return AudioBuffer::new(1, 1, self.sample_rate),
        };

        let mut buffer = AudioBuffer::new(channels, self.total_frames, self.sample_rate);
        let mut offset = 0;
        for chunk in &self.chunks {
            let frames = chunk[0].len();
            for ch in 0..channels {
                let source = chunk.get(ch).unwrap_or(&chunk[0]);
                let count = frames.min(source.len());
                buffer.channel_mut(ch)[offset..offset + count].copy_from_slice(&source[..count]);
            }
            offset += frames;
        }
        buffer
    }
}

/// Receives chunks from the render side and owns the active session
#[derive(Debug, Default)]
pub struct CaptureAssembler {
    session: Option<RecordingSession>,
    receiver: Option<Receiver<Chunk>>,
}

impl CaptureAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session; the returned sender feeds it
    pub fn begin(&mut self, sample_rate: u32) -> Sender<Chunk> {
        let (sender, receiver) = channel::unbounded();
        let session = RecordingSession::new(sample_rate);
        debug!(session = %session.id(), sample_rate, "Recording session started");
        self.session = Some(session);
        self.receiver = Some(receiver);
        sender
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Move every chunk waiting on the channel into the session
    pub fn pump(&mut self) -> usize {
        let (Some(session), Some(receiver)) = (self.session.as_mut(), self.receiver.as_ref())
        else {
            return 0;
        };
        let mut received = 0;
        for chunk in receiver.try_iter() {
            session.append(chunk);
            received += 1;
        }
        received
    }

    /// Drain the channel and assemble the session
    ///
    /// Returns `None` if no session is active.
    pub fn finish(&mut self) -> Option<AudioBuffer> {
        self.pump();
        self.receiver = None;
        let session = self.session.take()?;
        debug!(
            session = %session.id(),
            chunks = session.chunk_count(),
            frames = session.total_frames(),
            "Recording session assembled"
        );
        Some(session.assemble())
    }

    /// Drop the active session without assembling it
    pub fn abandon(&mut self) {
        self.session = None;
        self.receiver = None;
    }
}
