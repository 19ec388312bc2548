//! Signal graph
//!
//! The fixed mixing topology of the studio:
//!
//! ```text
//! beat  -> beat gain ------------------------------------------+
//! vocal -> vocal gain -> low shelf -> presence -> high shelf   |
//!        -> compressor -> vocal post -+-> dry gain ------------+-> master gain
//!                                     +-> delay send ----------+
//!                                     +-> reverb send ---------+
//! ```
//!
//! The vocal post signal is left in the vocal bus after rendering so the
//! caller can tap it for recording.

use tracing::debug;

use crate::dsp::compressor::Compressor;
use crate::dsp::delay::FeedbackDelay;
use crate::dsp::eq::BiquadFilter;
use crate::dsp::gain::GainStage;
use crate::dsp::params::{
    CompressorSettings, DelaySettings, EffectParameters, EqSettings, ReverbSettings,
    VolumeSettings,
};
use crate::dsp::reverb::{ConvolutionReverb, ImpulseGenerator};
use crate::dsp::stage::Stage;
use crate::engine::AudioBuffer;

/// Channel count of every bus in the graph
pub const BUS_CHANNELS: usize = 2;

/// Owned, statically composed processing graph
#[derive(Debug)]
pub struct SignalGraph {
    sample_rate: u32,
    block_size: usize,
    params: EffectParameters,

    beat_gain: GainStage,
    vocal_gain: GainStage,
    eq_low: BiquadFilter,
    eq_mid: BiquadFilter,
    eq_high: BiquadFilter,
    compressor: Compressor,
    delay: FeedbackDelay,
    reverb_send: GainStage,
    reverb: ConvolutionReverb,
    reverb_wet: GainStage,
    master_gain: GainStage,

    impulses: ImpulseGenerator,
    impulse: AudioBuffer,

    delay_bus: AudioBuffer,
    reverb_bus: AudioBuffer,
}

impl SignalGraph {
    /// Build the graph and prepare every stage for `sample_rate`
    pub fn new(
        sample_rate: u32,
        block_size: usize,
        params: EffectParameters,
        impulses: ImpulseGenerator,
        partition_size: usize,
    ) -> Self {
        let mut graph = Self {
            sample_rate,
            block_size,
            params,
            beat_gain: GainStage::new(params.volume.beat),
            vocal_gain: GainStage::new(params.volume.vocal),
            eq_low: BiquadFilter::low_shelf(params.eq.low),
            eq_mid: BiquadFilter::presence(params.eq.mid),
            eq_high: BiquadFilter::high_shelf(params.eq.high),
            compressor: Compressor::new(params.compressor),
            delay: FeedbackDelay::new(params.delay),
            reverb_send: GainStage::new(params.reverb.mix),
            reverb: ConvolutionReverb::new(partition_size),
            reverb_wet: GainStage::new(params.reverb.mix),
            master_gain: GainStage::new(params.volume.master),
            impulses,
            impulse: AudioBuffer::new(BUS_CHANNELS, 0, sample_rate),
            delay_bus: AudioBuffer::new(BUS_CHANNELS, block_size, sample_rate),
            reverb_bus: AudioBuffer::new(BUS_CHANNELS, block_size, sample_rate),
        };

        graph.eq_low.prepare(sample_rate, block_size);
        graph.eq_mid.prepare(sample_rate, block_size);
        graph.eq_high.prepare(sample_rate, block_size);
        graph.compressor.prepare(sample_rate, block_size);
        graph.delay.prepare(sample_rate, block_size);
        graph.rebuild_impulse();
        graph.reverb.prepare(sample_rate, block_size);

        debug!(
            sample_rate,
            block_size,
            vocal_chain = ?graph.vocal_chain(),
            reverb_latency = graph.reverb.latency_frames(),
            "Signal graph constructed"
        );
        graph
    }

    /// Stage types on the vocal path, in processing order
    pub fn vocal_chain(&self) -> [&'static str; 5] {
        [
            self.vocal_gain.stage_type(),
            self.eq_low.stage_type(),
            self.eq_mid.stage_type(),
            self.eq_high.stage_type(),
            self.compressor.stage_type(),
        ]
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Values currently applied to the stages
    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    /// Impulse currently loaded into the convolver (before normalization)
    pub fn impulse(&self) -> &AudioBuffer {
        &self.impulse
    }

    /// Gain of the dry vocal path into the master
    pub fn dry_gain(&self) -> f32 {
        self.params.reverb.dry_gain()
    }

    // ========================================================================
    // Parameter setters
    // ========================================================================

    pub fn set_volume(&mut self, volume: VolumeSettings) {
        self.params.volume = volume;
        self.beat_gain.set_gain(volume.beat);
        self.vocal_gain.set_gain(volume.vocal);
        self.master_gain.set_gain(volume.master);
    }

    pub fn set_eq(&mut self, eq: EqSettings) {
        self.params.eq = eq;
        self.eq_low.set_gain_db(eq.low);
        self.eq_mid.set_gain_db(eq.mid);
        self.eq_high.set_gain_db(eq.high);
    }

    pub fn set_compressor(&mut self, compressor: CompressorSettings) {
        self.params.compressor = compressor;
        self.compressor.set_settings(compressor);
    }

    pub fn set_delay(&mut self, delay: DelaySettings) {
        self.params.delay = delay;
        self.delay.set_settings(delay);
    }

    /// Apply reverb settings, regenerating the impulse if its shape changed
    ///
    /// A new impulse clears the convolution state, so a tail still ringing
    /// is cut off rather than left to decay. A mix-only change keeps it.
    pub fn set_reverb(&mut self, reverb: ReverbSettings) {
        let reshape = reverb.duration != self.params.reverb.duration
            || reverb.decay != self.params.reverb.decay;
        self.params.reverb = reverb;
        self.reverb_send.set_gain(reverb.mix);
        self.reverb_wet.set_gain(reverb.mix);
        if reshape {
            self.rebuild_impulse();
        }
    }

    /// Apply every group at once
    pub fn apply(&mut self, params: &EffectParameters) {
        self.set_volume(params.volume);
        self.set_eq(params.eq);
        self.set_compressor(params.compressor);
        self.set_delay(params.delay);
        self.set_reverb(params.reverb);
    }

    fn rebuild_impulse(&mut self) {
        let reverb = self.params.reverb;
        self.impulse = self
            .impulses
            .generate(self.sample_rate, reverb.duration, reverb.decay);
        self.reverb.set_impulse(&self.impulse);
        debug!(
            frames = self.impulse.len(),
            duration = reverb.duration,
            decay = reverb.decay,
            "Reverb impulse regenerated"
        );
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render one block
    ///
    /// `beat` and `vocal` hold the summed source signals on entry. On return
    /// `master` holds the mix and `vocal` holds the vocal post signal.
    /// All three buffers must have the same length.
    pub fn render(
        &mut self,
        beat: &mut AudioBuffer,
        vocal: &mut AudioBuffer,
        master: &mut AudioBuffer,
    ) {
        let frames = master.len();
        if self.delay_bus.len() != frames {
            self.delay_bus.resize(frames);
            self.reverb_bus.resize(frames);
        }

        self.beat_gain.process(beat);

        self.vocal_gain.process(vocal);
        self.eq_low.process(vocal);
        self.eq_mid.process(vocal);
        self.eq_high.process(vocal);
        self.compressor.process(vocal);

        self.delay_bus.copy_from(vocal);
        self.delay.process(&mut self.delay_bus);

        self.reverb_bus.copy_from(vocal);
        self.reverb_send.process(&mut self.reverb_bus);
        self.reverb.process(&mut self.reverb_bus);
        self.reverb_wet.process(&mut self.reverb_bus);

        master.clear();
        master.mix_from(beat, 1.0);
        master.mix_from(vocal, self.dry_gain());
        master.mix_from(&self.delay_bus, 1.0);
        master.mix_from(&self.reverb_bus, 1.0);
        self.master_gain.process(master);
    }

    /// Clear every filter, delay line and reverb tail
    pub fn reset(&mut self) {
        self.eq_low.reset();
        self.eq_mid.reset();
        self.eq_high.reset();
        self.compressor.reset();
        self.delay.reset();
        self.reverb.reset();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::params::{ReverbUpdate, VolumeUpdate};
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    const RATE: u32 = 8000;

    fn graph(params: EffectParameters) -> SignalGraph {
        SignalGraph::new(RATE, 128, params, ImpulseGenerator::seeded(9), 128)
    }

    fn dry_only() -> EffectParameters {
        let mut params = EffectParameters::default();
        params.delay.mix = 0.0;
        params.reverb.mix = 0.0;
        params.compressor.ratio = 1.0;
        params
    }

    fn constant(value: f32) -> AudioBuffer {
        AudioBuffer::from_channels(vec![vec![value; 128], vec![value; 128]], RATE).unwrap()
    }

    #[test]
    fn test_vocal_chain_order() {
        let graph = graph(dry_only());
        assert_eq!(
            graph.vocal_chain(),
            ["gain", "lowshelf", "peaking", "highshelf", "compressor"]
        );
    }

    #[test]
    fn test_beat_path_gains() {
        let mut graph = graph(dry_only());
        let mut beat = constant(0.5);
        let mut vocal = constant(0.0);
        let mut master = constant(0.0);
        graph.render(&mut beat, &mut vocal, &mut master);
        // 0.5 * beat 0.85 * master 0.9
        assert_abs_diff_eq!(master.channel(0)[64], 0.5 * 0.85 * 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(master.channel(1)[127], 0.5 * 0.85 * 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_vocal_post_left_in_vocal_bus() {
        let mut params = dry_only();
        params.volume.vocal = 0.5;
        let mut graph = graph(params);
        let mut beat = constant(0.0);
        let mut vocal = constant(0.2);
        let mut master = constant(0.0);
        graph.render(&mut beat, &mut vocal, &mut master);
        assert_abs_diff_eq!(vocal.channel(0)[100], 0.1, epsilon = 1e-3);
        // Dry gain is 1 without reverb
        assert_abs_diff_eq!(master.channel(0)[100], 0.1 * 0.9, epsilon = 1e-3);
    }

    #[test]
    fn test_dry_gain_follows_reverb_mix() {
        let mut graph = graph(EffectParameters::default());
        assert_abs_diff_eq!(graph.dry_gain(), 0.805, epsilon = 1e-6);

        let mut reverb = graph.params().reverb;
        reverb.apply(&ReverbUpdate {
            mix: Some(1.2),
            ..Default::default()
        });
        graph.set_reverb(reverb);
        assert_abs_diff_eq!(graph.dry_gain(), 0.3);
    }

    #[test]
    fn test_reverb_shape_change_regenerates_impulse() {
        let mut graph = graph(EffectParameters::default());
        assert_eq!(graph.impulse().len(), (RATE as f32 * 2.5) as usize);
        let before = graph.impulse().clone();

        let mut reverb = graph.params().reverb;
        reverb.mix = 0.6;
        graph.set_reverb(reverb);
        assert_eq!(graph.impulse(), &before);

        reverb.duration = 1.0;
        graph.set_reverb(reverb);
        assert_eq!(graph.impulse().len(), RATE as usize);
    }

    #[test]
    fn test_reverb_tail_survives_mix_change_only() {
        let tail_energy = |reshape: bool| {
            let mut params = dry_only();
            params.reverb.mix = 0.5;
            let mut graph = graph(params);

            let mut beat = constant(0.0);
            let mut vocal = constant(0.0);
            vocal.set_sample(0, 0, 1.0);
            vocal.set_sample(1, 0, 1.0);
            let mut master = constant(0.0);
            graph.render(&mut beat, &mut vocal, &mut master);

            let mut reverb = graph.params().reverb;
            reverb.mix = 0.6;
            if reshape {
                reverb.decay = 3.0;
            }
            graph.set_reverb(reverb);

            let mut beat = constant(0.0);
            let mut vocal = constant(0.0);
            let mut master = constant(0.0);
            graph.render(&mut beat, &mut vocal, &mut master);
            master.channel(0).iter().map(|s| s.abs()).sum::<f32>()
        };
        assert!(tail_energy(false) > 1e-3);
        assert!(tail_energy(true) < 1e-4);
    }

    #[test]
    fn test_identical_seeds_identical_graphs() {
        let a = graph(EffectParameters::default());
        let b = graph(EffectParameters::default());
        assert_eq!(a.impulse(), b.impulse());
    }

    #[test]
    fn test_delay_echo_reaches_master() {
        let mut params = dry_only();
        params.delay = DelaySettings {
            time: 0.01,
            feedback: 0.0,
            mix: 1.0,
        };
        params.volume.master = 1.0;
        params.volume.vocal = 1.0;
        let mut graph = graph(params);

        let mut beat = constant(0.0);
        let mut vocal = constant(0.0);
        vocal.set_sample(0, 0, 1.0);
        vocal.set_sample(1, 0, 1.0);
        let mut master = constant(0.0);
        graph.render(&mut beat, &mut vocal, &mut master);

        // Dry click at frame 0, echo 80 frames later
        assert!(master.channel(0)[0] > 0.5);
        assert!(master.channel(0)[80] > 0.5);
    }

    #[test]
    fn test_apply_updates_every_stage() {
        let mut graph = graph(EffectParameters::default());
        let mut params = EffectParameters::default();
        params.volume.apply(&VolumeUpdate {
            master: Some(0.0),
            ..Default::default()
        });
        graph.apply(&params);

        let mut beat = constant(0.7);
        let mut vocal = constant(0.7);
        let mut master = constant(0.0);
        graph.render(&mut beat, &mut vocal, &mut master);
        assert_eq!(master.peak(), 0.0);
        assert_eq!(graph.params(), &params);
    }
}
