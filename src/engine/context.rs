//! Render context
//!
//! Owns the render clock, the signal graph, the scheduled sources and the
//! two taps (recorder and master capture sink). Every call to
//! `render_block` advances the clock by the length of the output block.

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::debug;

use crate::capture::{CaptureBackend, InputStream};
use crate::dsp::{SignalGraph, BUS_CHANNELS};
use crate::engine::io::MediaEncoder;
use crate::engine::source::{CancelToken, ScheduledSource, SourceEvent, SourceId};
use crate::engine::AudioBuffer;
use crate::error::Result;

/// Bus a source feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTarget {
    Beat,
    Vocal,
}

/// Handle returned when a source is scheduled
#[derive(Debug, Clone)]
pub struct SourceHandle {
    pub id: SourceId,
    pub target: SourceTarget,
    pub token: CancelToken,
}

impl SourceHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

pub struct RenderContext {
    sample_rate: u32,
    clock: u64,
    graph: SignalGraph,

    sources: Vec<(SourceTarget, ScheduledSource)>,
    next_source_id: SourceId,
    events_tx: Sender<SourceEvent>,
    events_rx: Receiver<SourceEvent>,

    microphone: Option<Box<dyn InputStream>>,
    backend: Box<dyn CaptureBackend>,
    capture_sink: Option<Box<dyn MediaEncoder>>,

    beat_bus: AudioBuffer,
    vocal_bus: AudioBuffer,
    mic_block: AudioBuffer,
    master: AudioBuffer,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("sample_rate", &self.sample_rate)
            .field("clock", &self.clock)
            .field("sources", &self.sources.len())
            .field("microphone", &self.microphone.is_some())
            .field("backend", &self.backend.kind())
            .field("capture_sink", &self.capture_sink.is_some())
            .finish()
    }
}

impl RenderContext {
    pub fn new(graph: SignalGraph, backend: Box<dyn CaptureBackend>) -> Self {
        let sample_rate = graph.sample_rate();
        let block_size = graph.block_size();
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            sample_rate,
            clock: 0,
            graph,
            sources: Vec::new(),
            next_source_id: 1,
            events_tx,
            events_rx,
            microphone: None,
            backend,
            capture_sink: None,
            beat_bus: AudioBuffer::new(BUS_CHANNELS, block_size, sample_rate),
            vocal_bus: AudioBuffer::new(BUS_CHANNELS, block_size, sample_rate),
            mic_block: AudioBuffer::new(BUS_CHANNELS, block_size, sample_rate),
            master: AudioBuffer::new(BUS_CHANNELS, block_size, sample_rate),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered since the context was created
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Context time in seconds
    pub fn current_time(&self) -> f64 {
        self.clock as f64 / self.sample_rate as f64
    }

    pub fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SignalGraph {
        &mut self.graph
    }

    pub fn backend(&self) -> &dyn CaptureBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn CaptureBackend {
        self.backend.as_mut()
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Schedule `buffer` on `target` at context time `start`, skipping
    /// `offset` seconds of it
    pub fn schedule(
        &mut self,
        target: SourceTarget,
        buffer: Arc<AudioBuffer>,
        start: f64,
        offset: f64,
    ) -> SourceHandle {
        let id = self.next_source_id;
        self.next_source_id += 1;
        let token = CancelToken::new();
        let start_frame = self.seconds_to_frames(start);
        let offset_frames = self.seconds_to_frames(offset) as usize;
        debug!(id, ?target, start, offset, "Scheduling source");
        self.sources.push((
            target,
            ScheduledSource::new(
                id,
                buffer,
                start_frame,
                offset_frames,
                token.clone(),
                self.events_tx.clone(),
            ),
        ));
        SourceHandle { id, target, token }
    }

    /// Sources that have not finished yet
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Cancel every scheduled source
    pub fn stop_all(&mut self) {
        for (_, source) in self.sources.drain(..) {
            debug!(id = source.id(), "Stopping source");
        }
    }

    /// Completion signals since the last drain
    pub fn drain_events(&self) -> Vec<SourceEvent> {
        self.events_rx.try_iter().collect()
    }

    // ========================================================================
    // Taps
    // ========================================================================

    /// Route a microphone stream into the vocal bus
    pub fn attach_microphone(&mut self, stream: Box<dyn InputStream>) {
        self.detach_microphone();
        self.microphone = Some(stream);
    }

    /// Close and drop the microphone stream, if any
    pub fn detach_microphone(&mut self) -> bool {
        match self.microphone.take() {
            Some(mut stream) => {
                stream.close();
                true
            }
            None => false,
        }
    }

    pub fn has_microphone(&self) -> bool {
        self.microphone.is_some()
    }

    /// Attach an encoder to the master capture sink
    pub fn attach_capture_sink(&mut self, encoder: Box<dyn MediaEncoder>) {
        self.capture_sink = Some(encoder);
    }

    pub fn detach_capture_sink(&mut self) -> Option<Box<dyn MediaEncoder>> {
        self.capture_sink.take()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render `out.len()` frames into `out`
    pub fn render_block(&mut self, out: &mut AudioBuffer) -> Result<()> {
        let frames = out.len();
        if self.master.len() != frames {
            self.beat_bus.resize(frames);
            self.vocal_bus.resize(frames);
            self.mic_block.resize(frames);
            self.master.resize(frames);
        }

        self.beat_bus.clear();
        self.vocal_bus.clear();
        let clock = self.clock;
        let (beat_bus, vocal_bus) = (&mut self.beat_bus, &mut self.vocal_bus);
        self.sources.retain_mut(|(target, source)| match target {
            SourceTarget::Beat => source.render_into(clock, beat_bus),
            SourceTarget::Vocal => source.render_into(clock, vocal_bus),
        });

        if let Some(stream) = self.microphone.as_mut() {
            stream.read(&mut self.mic_block);
            self.vocal_bus.mix_from(&self.mic_block, 1.0);
        }

        self.graph
            .render(&mut self.beat_bus, &mut self.vocal_bus, &mut self.master);

        self.backend.capture(&self.vocal_bus);
        if let Some(sink) = self.capture_sink.as_mut() {
            sink.write_block(&self.master, frames)?;
        }

        out.copy_from(&self.master);
        self.clock += frames as u64;
        Ok(())
    }

    /// Release every tap and source
    pub fn close(&mut self) {
        self.stop_all();
        self.detach_microphone();
        self.backend.stop();
        self.capture_sink = None;
        self.graph.reset();
        debug!(clock = self.clock, "Render context closed");
    }
}
