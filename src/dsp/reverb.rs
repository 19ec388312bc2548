//! Convolution reverb
//!
//! A synthetic impulse (decaying noise) convolved with the reverb send using
//! uniformly partitioned FFT convolution. Each partition is transformed once
//! when the impulse changes; at run time every full input partition costs one
//! forward FFT, one multiply-accumulate per impulse partition and one inverse
//! FFT. Output trails input by exactly one partition.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::dsp::stage::Stage;
use crate::engine::AudioBuffer;

/// Default partition length in frames
pub const DEFAULT_PARTITION_SIZE: usize = 256;

// Normalization constants used by platform convolvers
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

// ============================================================================
// Impulse generation
// ============================================================================

/// Seedable source of synthetic reverb impulses
///
/// Two generators built from the same seed produce identical impulses for the
/// same sequence of requests.
#[derive(Debug, Clone)]
pub struct ImpulseGenerator {
    rng: StdRng,
}

impl ImpulseGenerator {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a generator with a specific seed (for reproducible renders)
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Stereo decaying noise, `floor(sample_rate * duration)` frames long
    ///
    /// Frame `i` of each channel is uniform noise in [-1, 1] scaled by
    /// `(1 - i / length) ^ decay`.
    pub fn generate(&mut self, sample_rate: u32, duration: f32, decay: f32) -> AudioBuffer {
        let length = ((sample_rate as f64 * duration as f64).floor() as usize).max(1);
        let mut impulse = AudioBuffer::new(2, length, sample_rate);
        for ch in 0..impulse.num_channels() {
            for (i, sample) in impulse.channel_mut(ch).iter_mut().enumerate() {
                let envelope = (1.0 - i as f32 / length as f32).powf(decay);
                *sample = (self.rng.gen::<f32>() * 2.0 - 1.0) * envelope;
            }
        }
        impulse
    }
}

/// Scale applied to an impulse so differently sized impulses sound equally loud
pub fn normalization_scale(impulse: &AudioBuffer) -> f32 {
    let channels = impulse.num_channels();
    let length = impulse.len();
    if channels == 0 || length == 0 {
        return 1.0;
    }

    let sum_squares: f64 = impulse
        .channels()
        .iter()
        .flat_map(|ch| ch.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    let mut power = (sum_squares / (channels * length) as f64).sqrt() as f32;
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }

    let mut scale = GAIN_CALIBRATION / power;
    if impulse.sample_rate() > 0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / impulse.sample_rate() as f32;
    }
    scale
}

// ============================================================================
// Partitioned convolution
// ============================================================================

/// Per-channel running state
#[derive(Debug, Clone)]
struct ChannelState {
    /// Previous and current input partitions back to back
    window: Vec<f32>,
    input: Vec<f32>,
    output: Vec<f32>,
    /// Frequency-domain delay line, one spectrum per impulse partition
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
}

impl ChannelState {
    fn new(partition: usize, partitions: usize) -> Self {
        Self {
            window: vec![0.0; partition * 2],
            input: vec![0.0; partition],
            output: vec![0.0; partition],
            history: vec![vec![Complex::new(0.0, 0.0); partition * 2]; partitions],
            head: 0,
        }
    }

    fn clear(&mut self) {
        self.window.fill(0.0);
        self.input.fill(0.0);
        self.output.fill(0.0);
        for spectrum in &mut self.history {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.head = 0;
    }
}

/// Uniformly partitioned FFT convolver
pub struct ConvolutionReverb {
    partition: usize,
    normalize: bool,
    /// Impulse spectra: `[channel][partition]`
    impulse: Vec<Vec<Vec<Complex<f32>>>>,
    states: Vec<ChannelState>,
    position: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for ConvolutionReverb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionReverb")
            .field("partition", &self.partition)
            .field("partitions", &self.partitions())
            .field("normalize", &self.normalize)
            .finish()
    }
}

impl ConvolutionReverb {
    pub fn new(partition: usize) -> Self {
        let partition = partition.max(1);
        let fft_size = partition * 2;
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            partition,
            normalize: true,
            impulse: Vec::new(),
            states: Vec::new(),
            position: 0,
            forward,
            inverse,
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            accumulator: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn partition_size(&self) -> usize {
        self.partition
    }

    /// Number of impulse partitions currently loaded
    pub fn partitions(&self) -> usize {
        self.impulse.first().map(|p| p.len()).unwrap_or(0)
    }

    pub fn set_normalize(&mut self, normalize: bool) {
        self.normalize = normalize;
    }

    /// Replace the impulse and clear the running tail
    ///
    /// Runs on the control path; this is where partition spectra are built.
    pub fn set_impulse(&mut self, impulse: &AudioBuffer) {
        let scale = if self.normalize {
            normalization_scale(impulse)
        } else {
            1.0
        };
        let fft_size = self.partition * 2;
        let partitions = impulse.len().div_ceil(self.partition);

        let partition = self.partition;
        let forward = Arc::clone(&self.forward);
        let scratch = &mut self.scratch;
        let spectra: Vec<Vec<Vec<Complex<f32>>>> = impulse
            .channels()
            .iter()
            .map(|channel| {
                channel
                    .chunks(partition)
                    .map(|chunk| {
                        let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
                        for (bin, &sample) in spectrum.iter_mut().zip(chunk) {
                            *bin = Complex::new(sample * scale, 0.0);
                        }
                        forward.process_with_scratch(&mut spectrum, &mut scratch[..]);
                        spectrum
                    })
                    .collect()
            })
            .collect();
        self.impulse = spectra;

        let channels = self.states.len().max(2);
        self.states = (0..channels)
            .map(|_| ChannelState::new(self.partition, partitions))
            .collect();
        self.position = 0;
    }

    /// Convolve one full input partition of `ch` into its output partition
    fn convolve_partition(&mut self, ch: usize) {
        let n = self.partition;
        let fft_size = n * 2;
        let impulse_ch = ch.min(self.impulse.len().saturating_sub(1));
        let state = &mut self.states[ch];

        state.window.copy_within(n.., 0);
        state.window[n..].copy_from_slice(&state.input);

        for (bin, &sample) in self.spectrum.iter_mut().zip(&state.window) {
            *bin = Complex::new(sample, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let partitions = state.history.len();
        if partitions == 0 {
            state.output.fill(0.0);
            return;
        }
        state.head = (state.head + partitions - 1) % partitions;
        state.history[state.head].copy_from_slice(&self.spectrum);

        self.accumulator.fill(Complex::new(0.0, 0.0));
        for (k, ir) in self.impulse[impulse_ch].iter().enumerate() {
            let x = &state.history[(state.head + k) % partitions];
            for ((acc, &a), &b) in self.accumulator.iter_mut().zip(x).zip(ir) {
                *acc += a * b;
            }
        }
        self.inverse
            .process_with_scratch(&mut self.accumulator, &mut self.scratch);

        // Overlap-save: only the second half is free of wrap-around
        let norm = 1.0 / fft_size as f32;
        for (out, bin) in state.output.iter_mut().zip(&self.accumulator[n..]) {
            *out = bin.re * norm;
        }
    }
}

impl Stage for ConvolutionReverb {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.impulse.is_empty() {
            buffer.clear();
            return;
        }
        let channels = buffer.num_channels().min(self.states.len());
        let frames = buffer.len();
        let start = self.position;
        let mut position = start;

        for ch in 0..channels {
            position = start;
            for frame in 0..frames {
                let input = buffer.channel(ch)[frame];
                let state = &mut self.states[ch];
                state.input[position] = input;
                buffer.channel_mut(ch)[frame] = state.output[position];
                position += 1;
                if position == self.partition {
                    self.convolve_partition(ch);
                    position = 0;
                }
            }
        }
        for ch in channels..buffer.num_channels() {
            buffer.channel_mut(ch).fill(0.0);
        }
        self.position = position;
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {
        self.reset();
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            state.clear();
        }
        self.position = 0;
    }

    fn stage_type(&self) -> &'static str {
        "convolver"
    }

    fn latency_frames(&self) -> usize {
        self.partition
    }
}

// ============================================================================
// Tests
// ============================================================================
