//! Engine Controller
//!
//! The single owner of a studio session: loaded buffers, analysis results,
//! effect parameters, the render context and the transport. Every control
//! operation takes `&mut self`, so at most one runs at a time.
//!
//! The host drives audio by calling `process_block` from its output
//! callback (or not at all, for offline use through `export_mix`).

use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::analysis::{
    AlignmentInputs, AlignmentPlanner, BeatAnalysis, BeatAnalyzer, OnsetDetector,
    PlaybackAlignment, PlaybackPlan,
};
use crate::capture::{
    select_backend, BufferMicrophone, CaptureAssembler, CaptureBackend, Microphone,
    MicrophoneConstraints,
};
use crate::config::EngineConfig;
use crate::dsp::{
    CompressorSettings, CompressorUpdate, DelaySettings, DelayUpdate, EffectParameters,
    EqSettings, EqUpdate, ImpulseGenerator, ReverbSettings, ReverbUpdate, SignalGraph,
    VolumeSettings, VolumeUpdate, BUS_CHANNELS,
};
use crate::engine::context::{RenderContext, SourceHandle, SourceTarget};
use crate::engine::io::{decode_to_rate, AudioDecoder, EncodedMedia, WavDecoder};
use crate::engine::source::SourceEvent;
use crate::engine::transport::{EngineState, TransportManager};
use crate::engine::AudioBuffer;
use crate::error::{Result, StudioError};
use crate::render::{content_duration, MixRenderer};

/// Notifications published to subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    PlaybackStateChanged(bool),
    RecordingStateChanged(bool),
    /// New vocal duration in seconds, `None` when the take was cleared
    VocalUpdated(Option<f64>),
}

/// A loaded buffer plus what was derived from it
#[derive(Debug, Clone)]
struct Track {
    buffer: Arc<AudioBuffer>,
    waveform: Vec<f32>,
}

impl Track {
    fn new(buffer: AudioBuffer, resolution: usize) -> Self {
        let waveform = buffer.waveform(resolution);
        Self {
            buffer: Arc::new(buffer),
            waveform,
        }
    }

    fn duration(&self) -> f64 {
        self.buffer.duration_secs()
    }
}

pub struct EngineController {
    config: EngineConfig,
    params: EffectParameters,

    decoder: Box<dyn AudioDecoder>,
    microphone: Box<dyn Microphone>,
    /// Backend injected before `initialize`; the configured one otherwise
    pending_backend: Option<Box<dyn CaptureBackend>>,

    context: Option<RenderContext>,
    transport: TransportManager,
    playing: Vec<SourceHandle>,
    assembler: CaptureAssembler,

    beat: Option<Track>,
    beat_analysis: BeatAnalysis,
    vocal: Option<Track>,
    vocal_onset: Option<f64>,
    alignment: PlaybackAlignment,

    analyzer: BeatAnalyzer,
    onset_detector: OnsetDetector,
    planner: AlignmentPlanner,

    subscribers: Vec<Sender<EngineEvent>>,
}

impl std::fmt::Debug for EngineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineController")
            .field("state", &self.transport.state())
            .field("initialized", &self.context.is_some())
            .field("beat_duration", &self.beat_duration())
            .field("vocal_duration", &self.vocal_duration())
            .field("alignment", &self.alignment)
            .finish()
    }
}

impl EngineController {
    /// Create a controller; nothing is rendered until `initialize`
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport: TransportManager::new(config.sample_rate),
            config,
            params: EffectParameters::default(),
            decoder: Box::new(WavDecoder),
            microphone: Box::new(BufferMicrophone::silent()),
            pending_backend: None,
            context: None,
            playing: Vec::new(),
            assembler: CaptureAssembler::new(),
            beat: None,
            beat_analysis: BeatAnalysis::default(),
            vocal: None,
            vocal_onset: None,
            alignment: PlaybackAlignment::default(),
            analyzer: BeatAnalyzer::new(),
            onset_detector: OnsetDetector::new(),
            planner: AlignmentPlanner::new(),
            subscribers: Vec::new(),
        })
    }

    pub fn with_microphone(mut self, microphone: Box<dyn Microphone>) -> Self {
        self.microphone = microphone;
        self
    }

    pub fn with_decoder(mut self, decoder: Box<dyn AudioDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Use `backend` instead of the configured one at the next `initialize`
    pub fn with_capture_backend(mut self, backend: Box<dyn CaptureBackend>) -> Self {
        self.pending_backend = Some(backend);
        self
    }

    pub fn with_params(mut self, params: EffectParameters) -> Self {
        self.params = params.clamped();
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the render context and the graph; a no-op when already done
    pub fn initialize(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }
        let impulses = match self.config.reverb_seed {
            Some(seed) => ImpulseGenerator::seeded(seed),
            None => ImpulseGenerator::from_entropy(),
        };
        let graph = SignalGraph::new(
            self.config.sample_rate,
            self.config.block_size,
            self.params,
            impulses,
            self.config.partition_size,
        );
        let backend = self.pending_backend.take().unwrap_or_else(|| {
            select_backend(self.config.capture_backend, self.config.polling_chunk)
        });
        info!(
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            backend = %backend.kind(),
            "Engine initialized"
        );
        self.context = Some(RenderContext::new(graph, backend));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Stop everything and close the render context
    ///
    /// A recording in progress is discarded. The controller can be
    /// initialized again afterwards.
    pub fn dispose(&mut self) {
        let was_playing = self.transport.is_playing();
        let was_recording = self.transport.is_recording();
        self.stop_sources();
        self.assembler.abandon();
        if let Some(mut ctx) = self.context.take() {
            ctx.close();
        }
        self.transport.reset();
        if was_recording {
            self.emit(EngineEvent::RecordingStateChanged(false));
        }
        if was_playing {
            self.emit(EngineEvent::PlaybackStateChanged(false));
        }
        info!("Engine disposed");
    }

    fn context_mut(&mut self) -> Result<&mut RenderContext> {
        self.context.as_mut().ok_or(StudioError::GraphNotInitialized)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Decode and analyse a backing track
    ///
    /// On failure the previously loaded track stays in place.
    pub fn load_beat(&mut self, bytes: &[u8]) -> Result<BeatAnalysis> {
        let buffer = decode_to_rate(self.decoder.as_ref(), bytes, self.config.sample_rate)?;
        let analysis = self.analyzer.analyze(&buffer);
        info!(
            duration = analysis.duration,
            tempo = ?analysis.tempo,
            downbeat = ?analysis.downbeat_offset,
            "Backing track loaded"
        );
        self.beat = Some(Track::new(buffer, self.config.waveform_resolution));
        self.beat_analysis = analysis;
        Ok(analysis)
    }

    /// Decode an existing vocal take and detect its onset
    pub fn load_vocal(&mut self, bytes: &[u8]) -> Result<f64> {
        let buffer = decode_to_rate(self.decoder.as_ref(), bytes, self.config.sample_rate)?;
        info!(duration = buffer.duration_secs(), "Vocal take loaded");
        Ok(self.set_vocal(buffer))
    }

    fn set_vocal(&mut self, buffer: AudioBuffer) -> f64 {
        let onset = self.onset_detector.detect(&buffer);
        let track = Track::new(buffer, self.config.waveform_resolution);
        let duration = track.duration();
        debug!(onset, duration, "Vocal onset detected");
        self.vocal = Some(track);
        self.vocal_onset = Some(onset);
        self.alignment = PlaybackAlignment::default();
        self.emit(EngineEvent::VocalUpdated(Some(duration)));
        onset
    }

    /// Forget the vocal take; harmless when there is none
    pub fn clear_vocal_take(&mut self) {
        self.vocal = None;
        self.vocal_onset = None;
        self.alignment = PlaybackAlignment::default();
        self.emit(EngineEvent::VocalUpdated(None));
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Start the backing track and the vocal after the lead-in
    ///
    /// Any playback in progress is stopped first.
    ///
    /// # Returns
    /// The alignment applied to the vocal.
    pub fn start_playback(&mut self) -> Result<PlaybackAlignment> {
        self.context_mut()?;
        if self.transport.is_recording() {
            return Err(StudioError::AlreadyRecording);
        }
        if self.beat.is_none() && self.vocal.is_none() {
            return Err(StudioError::NoSourceLoaded);
        }

        let plan = self.schedule_aligned()?;
        self.transport.play();
        info!(
            shift = ?plan.alignment.alignment_shift,
            target = ?plan.alignment.quantized_target,
            "Playback started"
        );
        self.emit(EngineEvent::PlaybackStateChanged(true));
        Ok(plan.alignment)
    }

    /// Stop playback; a no-op when nothing is playing
    pub fn stop_playback(&mut self) {
        if !self.transport.is_playing() {
            return;
        }
        self.stop_sources();
        self.transport.stop();
        self.emit(EngineEvent::PlaybackStateChanged(false));
    }

    /// Schedule every loaded track at `now + lead-in` with the beat alignment
    fn schedule_aligned(&mut self) -> Result<PlaybackPlan> {
        self.stop_sources();
        let plan = self.plan_playback()?;
        let beat = self.beat.as_ref().map(|t| Arc::clone(&t.buffer));
        let vocal = self.vocal.as_ref().map(|t| Arc::clone(&t.buffer));
        let ctx = self.context_mut()?;
        let mut handles = Vec::with_capacity(2);
        if let Some(beat) = beat {
            handles.push(ctx.schedule(SourceTarget::Beat, beat, plan.beat_start, 0.0));
        }
        if let Some(vocal) = vocal {
            handles.push(ctx.schedule(
                SourceTarget::Vocal,
                vocal,
                plan.vocal_start,
                plan.vocal_offset,
            ));
        }
        self.playing = handles;
        self.alignment = plan.alignment;
        Ok(plan)
    }

    fn plan_playback(&mut self) -> Result<PlaybackPlan> {
        let lead_in = self.config.lead_in_secs;
        let start = self.context_mut()?.current_time() + lead_in;
        let inputs = AlignmentInputs {
            tempo: self.beat.as_ref().and(self.beat_analysis.tempo),
            downbeat_offset: self.beat.as_ref().and(self.beat_analysis.downbeat_offset),
            onset: self.vocal.as_ref().and(self.vocal_onset),
            vocal_duration: self.vocal_duration(),
        };
        Ok(self.planner.plan(&inputs, start))
    }

    fn stop_sources(&mut self) {
        for handle in self.playing.drain(..) {
            handle.stop();
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Start capturing the microphone
    ///
    /// With a backing track loaded, the aligned playback (beat and any
    /// existing take) runs underneath.
    pub fn start_recording(&mut self) -> Result<()> {
        self.context_mut()?;
        if self.transport.is_recording() {
            return Err(StudioError::AlreadyRecording);
        }

        if self.transport.is_playing() {
            self.stop_playback();
        }

        let sample_rate = self.config.sample_rate;
        // The transport reports Recording only, so no playback events here
        if self.beat.is_some() {
            self.schedule_aligned()?;
        }
        let with_backing = !self.playing.is_empty();

        let stream = match self.microphone.open(&MicrophoneConstraints::raw(sample_rate)) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Microphone unavailable, recording not started");
                self.stop_sources();
                return Err(e);
            }
        };

        let sink = self.assembler.begin(sample_rate);
        let ctx = self.context_mut()?;
        if let Err(e) = ctx.backend_mut().start(sink, BUS_CHANNELS) {
            let mut stream = stream;
            stream.close();
            self.assembler.abandon();
            self.stop_sources();
            return Err(e);
        }
        let backend = ctx.backend().kind();
        ctx.attach_microphone(stream);

        self.transport.record(with_backing)?;
        info!(%backend, with_backing, "Recording started");
        self.emit(EngineEvent::RecordingStateChanged(true));
        Ok(())
    }

    /// Stop capturing and turn the take into the vocal
    ///
    /// # Returns
    /// The assembled take, or `None` when no recording was running.
    pub fn stop_recording(&mut self) -> Result<Option<Arc<AudioBuffer>>> {
        if !self.transport.is_recording() {
            return Ok(None);
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.backend_mut().stop();
            ctx.detach_microphone();
        }
        self.stop_sources();
        self.transport.stop_recording();

        let take = self
            .assembler
            .finish()
            .unwrap_or_else(|| AudioBuffer::new(1, 1, self.config.sample_rate));
        info!(
            duration = take.duration_secs(),
            channels = take.num_channels(),
            "Recording stopped"
        );
        self.emit(EngineEvent::RecordingStateChanged(false));
        self.set_vocal(take);
        Ok(self.vocal.as_ref().map(|t| Arc::clone(&t.buffer)))
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Bounce the aligned mix to an encoded file
    pub fn export_mix(&mut self) -> Result<EncodedMedia> {
        self.context_mut()?;
        if self.transport.is_recording() {
            return Err(StudioError::AlreadyRecording);
        }
        let beat = self.beat.as_ref().map(|t| Arc::clone(&t.buffer));
        let vocal = self.vocal.as_ref().map(|t| Arc::clone(&t.buffer));
        if content_duration(beat.as_deref(), vocal.as_deref()) <= 0.0 {
            return Err(StudioError::NothingToExport);
        }

        self.stop_playback();
        let plan = self.plan_playback()?;
        self.alignment = plan.alignment;
        let renderer = MixRenderer::new(
            self.config.export_format()?,
            self.config.tail_margin_secs,
            self.config.block_size,
        );

        self.transport.play();
        self.emit(EngineEvent::PlaybackStateChanged(true));
        let ctx = self.context_mut()?;
        let result = renderer.render(ctx, beat.as_ref(), vocal.as_ref(), &plan);
        self.transport.stop();
        self.emit(EngineEvent::PlaybackStateChanged(false));
        result
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render one block into `out` and handle what it produced
    pub fn process_block(&mut self, out: &mut AudioBuffer) -> Result<()> {
        self.context_mut()?.render_block(out)?;
        self.transport.advance(out.len());
        self.poll_events();
        Ok(())
    }

    /// Collect captured chunks and source completions
    ///
    /// Playback returns to idle once every scheduled source has ended on
    /// its own.
    pub fn poll_events(&mut self) -> usize {
        self.assembler.pump();
        let events = match self.context.as_ref() {
            Some(ctx) => ctx.drain_events(),
            None => return 0,
        };
        let mut ended = 0;
        for SourceEvent::Ended(id) in events {
            let before = self.playing.len();
            self.playing.retain(|handle| handle.id != id);
            if self.playing.len() < before {
                ended += 1;
                debug!(id, "Source finished");
            }
        }
        if ended > 0 && self.playing.is_empty() && self.transport.is_playing() {
            self.transport.stop();
            info!("Playback finished");
            self.emit(EngineEvent::PlaybackStateChanged(false));
        }
        ended
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    pub fn update_volume(&mut self, update: VolumeUpdate) -> VolumeSettings {
        self.params.volume.apply(&update);
        let volume = self.params.volume;
        if let Some(ctx) = self.context.as_mut() {
            ctx.graph_mut().set_volume(volume);
        }
        volume
    }

    pub fn update_eq(&mut self, update: EqUpdate) -> EqSettings {
        self.params.eq.apply(&update);
        let eq = self.params.eq;
        if let Some(ctx) = self.context.as_mut() {
            ctx.graph_mut().set_eq(eq);
        }
        eq
    }

    pub fn update_compressor(&mut self, update: CompressorUpdate) -> CompressorSettings {
        self.params.compressor.apply(&update);
        let compressor = self.params.compressor;
        if let Some(ctx) = self.context.as_mut() {
            ctx.graph_mut().set_compressor(compressor);
        }
        compressor
    }

    pub fn update_delay(&mut self, update: DelayUpdate) -> DelaySettings {
        self.params.delay.apply(&update);
        let delay = self.params.delay;
        if let Some(ctx) = self.context.as_mut() {
            ctx.graph_mut().set_delay(delay);
        }
        delay
    }

    /// Impulse regeneration happens inside the graph when duration or decay
    /// changed
    pub fn update_reverb(&mut self, update: ReverbUpdate) -> ReverbSettings {
        self.params.reverb.apply(&update);
        let reverb = self.params.reverb;
        if let Some(ctx) = self.context.as_mut() {
            ctx.graph_mut().set_reverb(reverb);
        }
        reverb
    }

    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Receive every event published from now on
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: EngineEvent) {
        debug!(?event, "Engine event");
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.transport.state()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn is_recording(&self) -> bool {
        self.transport.is_recording()
    }

    pub fn tempo(&self) -> Option<f64> {
        self.beat.as_ref().and(self.beat_analysis.tempo)
    }

    pub fn downbeat_offset(&self) -> Option<f64> {
        self.beat.as_ref().and(self.beat_analysis.downbeat_offset)
    }

    pub fn beat_analysis(&self) -> Option<BeatAnalysis> {
        self.beat.as_ref().map(|_| self.beat_analysis)
    }

    pub fn vocal_onset(&self) -> Option<f64> {
        self.vocal_onset
    }

    /// Alignment chosen by the last playback or export
    pub fn last_alignment(&self) -> PlaybackAlignment {
        self.alignment
    }

    pub fn beat_waveform(&self) -> &[f32] {
        self.beat.as_ref().map(|t| t.waveform.as_slice()).unwrap_or(&[])
    }

    pub fn vocal_waveform(&self) -> &[f32] {
        self.vocal.as_ref().map(|t| t.waveform.as_slice()).unwrap_or(&[])
    }

    pub fn beat_buffer(&self) -> Option<Arc<AudioBuffer>> {
        self.beat.as_ref().map(|t| Arc::clone(&t.buffer))
    }

    pub fn vocal_buffer(&self) -> Option<Arc<AudioBuffer>> {
        self.vocal.as_ref().map(|t| Arc::clone(&t.buffer))
    }

    pub fn beat_duration(&self) -> f64 {
        self.beat.as_ref().map(Track::duration).unwrap_or(0.0)
    }

    pub fn vocal_duration(&self) -> f64 {
        self.vocal.as_ref().map(Track::duration).unwrap_or(0.0)
    }

    /// Length of the longer of the two tracks
    pub fn playback_duration(&self) -> f64 {
        self.beat_duration().max(self.vocal_duration())
    }

    /// Context time in seconds, zero before `initialize`
    pub fn current_time(&self) -> f64 {
        self.context.as_ref().map(RenderContext::current_time).unwrap_or(0.0)
    }

    /// Seconds since the current playback or recording started
    pub fn position(&self) -> f64 {
        self.transport.position_secs()
    }

    /// Frames captured so far in the current recording
    pub fn recorded_frames(&self) -> usize {
        self.assembler.session().map(|s| s.total_frames()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScriptedBackend;
    use crate::engine::io::{
        generate_click_track, generate_delayed_tone, ExportFormat, WavEncoder,
    };
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    const RATE: u32 = 8000;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: RATE,
            block_size: 64,
            partition_size: 64,
            reverb_seed: Some(3),
            ..Default::default()
        }
    }

    fn small_reverb() -> EffectParameters {
        let mut params = EffectParameters::default();
        params.reverb.duration = 0.5;
        params
    }

    fn engine() -> EngineController {
        let mut engine = EngineController::new(config())
            .unwrap()
            .with_params(small_reverb());
        engine.initialize().unwrap();
        engine
    }

    fn wav(buffer: &AudioBuffer) -> Vec<u8> {
        WavEncoder::encode_buffer(buffer, ExportFormat::default())
            .unwrap()
            .bytes
    }

    fn run(engine: &mut EngineController, blocks: usize) {
        let mut out = AudioBuffer::new(2, 64, RATE);
        for _ in 0..blocks {
            engine.process_block(&mut out).unwrap();
        }
    }

    #[test]
    fn test_operations_need_initialize() {
        let mut engine = EngineController::new(config()).unwrap();
        assert!(matches!(
            engine.start_playback(),
            Err(StudioError::GraphNotInitialized)
        ));
        assert!(matches!(
            engine.start_recording(),
            Err(StudioError::GraphNotInitialized)
        ));
        let mut out = AudioBuffer::new(2, 64, RATE);
        assert!(engine.process_block(&mut out).is_err());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut engine = engine();
        run(&mut engine, 2);
        engine.initialize().unwrap();
        // The existing context (and its clock) is kept
        assert_abs_diff_eq!(engine.current_time(), 128.0 / 8000.0);
    }

    #[test]
    fn test_playback_without_sources() {
        let mut engine = engine();
        let err = engine.start_playback().unwrap_err();
        assert_eq!(err.error_code(), "NO_SOURCE_LOADED");
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_decode_failure_keeps_previous_beat() {
        let mut engine = engine();
        let beat = AudioBuffer::from_channels(vec![vec![0.1; 800]], RATE).unwrap();
        engine.load_beat(&wav(&beat)).unwrap();
        let err = engine.load_beat(b"not a wav file").unwrap_err();
        assert_eq!(err.error_code(), "DECODE_FAILURE");
        assert_abs_diff_eq!(engine.beat_duration(), 0.1);
        assert!(!engine.beat_waveform().is_empty());
    }

    #[test]
    fn test_playback_ends_naturally() {
        let mut engine = engine();
        let events = engine.subscribe();
        let vocal = AudioBuffer::from_channels(vec![vec![0.2; 400]], RATE).unwrap();
        engine.load_vocal(&wav(&vocal)).unwrap();
        engine.start_playback().unwrap();
        assert!(engine.is_playing());

        // 0.1 s lead-in + 0.05 s of vocal = 1200 frames
        run(&mut engine, 30);
        assert!(!engine.is_playing());
        assert_eq!(engine.state(), EngineState::Idle);

        let received: Vec<EngineEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                EngineEvent::VocalUpdated(Some(0.05)),
                EngineEvent::PlaybackStateChanged(true),
                EngineEvent::PlaybackStateChanged(false),
            ]
        );
    }

    #[test]
    fn test_stop_playback_twice_is_noop() {
        let mut engine = engine();
        let beat = AudioBuffer::from_channels(vec![vec![0.1; 8000]], RATE).unwrap();
        engine.load_beat(&wav(&beat)).unwrap();
        let events = engine.subscribe();
        engine.start_playback().unwrap();
        engine.stop_playback();
        engine.stop_playback();
        assert_eq!(events.try_iter().count(), 2);
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_recording_produces_vocal() {
        let script = vec![
            vec![vec![0.0; 256], vec![0.0; 256]],
            vec![vec![0.5; 256], vec![0.5; 256]],
            vec![vec![0.5; 128], vec![0.5; 128]],
        ];
        let mut engine = EngineController::new(config())
            .unwrap()
            .with_params(small_reverb())
            .with_capture_backend(Box::new(ScriptedBackend::new(script)));
        engine.initialize().unwrap();

        engine.start_recording().unwrap();
        assert!(engine.is_recording());
        assert!(matches!(
            engine.start_recording(),
            Err(StudioError::AlreadyRecording)
        ));
        run(&mut engine, 1);
        assert_eq!(engine.recorded_frames(), 256);

        let take = engine.stop_recording().unwrap().unwrap();
        assert_eq!(take.len(), 640);
        assert_eq!(take.num_channels(), 2);
        assert_abs_diff_eq!(engine.vocal_onset().unwrap(), 0.032, epsilon = 1e-9);
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.stop_recording().unwrap().is_none());
    }

    #[test]
    fn test_overdub_plays_existing_take_aligned() {
        let mut engine = engine();
        engine
            .load_beat(&wav(&generate_click_track(120.0, 4.0, 0.01, RATE)))
            .unwrap();
        engine
            .load_vocal(&wav(&generate_delayed_tone(0.62, 1.0, 440.0, 0.8, RATE)))
            .unwrap();
        engine.update_volume(VolumeUpdate {
            beat: Some(0.0),
            ..Default::default()
        });
        let events = engine.subscribe();

        engine.start_recording().unwrap();
        assert_eq!(engine.state(), EngineState::Recording);
        let alignment = engine.last_alignment();
        assert_abs_diff_eq!(alignment.quantized_target.unwrap(), 0.5, epsilon = 1e-9);
        assert!(alignment.alignment_shift.unwrap() < 0.0);

        // Lead-in plus the trimmed 0.5 s of silence, then the old take
        let mut out = AudioBuffer::new(2, 64, RATE);
        let mut peak = 0.0f32;
        for _ in 0..100 {
            engine.process_block(&mut out).unwrap();
            peak = peak.max(out.peak());
        }
        assert!(peak > 0.1, "peak {}", peak);
        assert!(engine.is_recording());

        engine.stop_recording().unwrap();
        let received: Vec<EngineEvent> = events.try_iter().collect();
        assert_eq!(received[0], EngineEvent::RecordingStateChanged(true));
        assert!(!received.contains(&EngineEvent::PlaybackStateChanged(true)));
    }

    #[test]
    fn test_permission_denied_rolls_back() {
        let mut engine = EngineController::new(config())
            .unwrap()
            .with_params(small_reverb())
            .with_microphone(Box::new(BufferMicrophone::denied()));
        engine.initialize().unwrap();
        let beat = AudioBuffer::from_channels(vec![vec![0.1; 8000]], RATE).unwrap();
        engine.load_beat(&wav(&beat)).unwrap();

        let err = engine.start_recording().unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
        assert!(!engine.is_recording());
        assert!(!engine.is_playing());

        // The backing track scheduled for the take was cancelled
        let mut out = AudioBuffer::new(2, 64, RATE);
        for _ in 0..20 {
            engine.process_block(&mut out).unwrap();
        }
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_clear_vocal_take_resets_state() {
        let mut engine = engine();
        let vocal = generate_delayed_tone(0.3, 0.2, 440.0, 0.5, RATE);
        engine.load_vocal(&wav(&vocal)).unwrap();
        assert!(engine.vocal_onset().is_some());

        engine.clear_vocal_take();
        engine.clear_vocal_take();
        assert_eq!(engine.vocal_onset(), None);
        assert_eq!(engine.vocal_duration(), 0.0);
        assert!(engine.vocal_waveform().is_empty());
        assert_eq!(engine.last_alignment(), PlaybackAlignment::default());
    }

    #[test]
    fn test_export_with_nothing_loaded() {
        let mut engine = engine();
        let err = engine.export_mix().unwrap_err();
        assert!(matches!(err, StudioError::NothingToExport));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_parameters_stored_before_initialize() {
        let mut engine = EngineController::new(config()).unwrap();
        let volume = engine.update_volume(VolumeUpdate {
            vocal: Some(5.0),
            ..Default::default()
        });
        assert_eq!(volume.vocal, 2.0);
        let reverb = engine.update_reverb(ReverbUpdate {
            mix: Some(f32::NAN),
            duration: Some(0.5),
            ..Default::default()
        });
        assert_eq!(reverb.mix, 0.3);
        engine.initialize().unwrap();
        assert_eq!(engine.params().volume.vocal, 2.0);
        assert_eq!(engine.params().reverb.duration, 0.5);
    }

    #[test]
    fn test_dispose_then_operations_fail() {
        let mut engine = engine();
        let beat = AudioBuffer::from_channels(vec![vec![0.1; 8000]], RATE).unwrap();
        engine.load_beat(&wav(&beat)).unwrap();
        engine.start_playback().unwrap();
        engine.dispose();
        assert!(!engine.is_playing());
        assert!(!engine.is_initialized());
        assert!(matches!(
            engine.export_mix(),
            Err(StudioError::GraphNotInitialized)
        ));
        // Loaded material survives and the engine can be brought back
        engine.initialize().unwrap();
        assert!(engine.export_mix().is_ok());
    }
}
