//! Dynamics compressor for the vocal chain
//!
//! Linked stereo detection, quadratic soft knee, and separate attack and
//! release smoothing in the gain domain. Makeup gain follows the usual
//! platform compressor behaviour: the reduction a full-scale input would
//! receive is partially given back.

use crate::dsp::params::CompressorSettings;
use crate::dsp::stage::Stage;
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;

/// Exponent applied to the full-scale gain when computing makeup
const MAKEUP_EXPONENT: f32 = 0.6;

/// Detector floor; quieter input is treated as silence
const DETECTOR_FLOOR_DB: f32 = -120.0;

/// Soft-knee dynamics compressor
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    sample_rate: f32,
    attack_coeff: f32,
    release_coeff: f32,
    makeup_linear: f32,
    /// Smoothed linear gain applied to the current frame
    envelope: f32,
}

impl Compressor {
    pub fn new(settings: CompressorSettings) -> Self {
        let mut compressor = Self {
            settings,
            sample_rate: crate::engine::buffer::DEFAULT_SAMPLE_RATE as f32,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            makeup_linear: 1.0,
            envelope: 1.0,
        };
        compressor.update_coefficients();
        compressor
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: CompressorSettings) {
        self.settings = settings;
        self.update_coefficients();
    }

    /// Current gain reduction in dB (0 or negative)
    pub fn reduction_db(&self) -> f32 {
        linear_to_db(self.envelope).max(DETECTOR_FLOOR_DB)
    }

    /// Static gain computer: gain change in dB for a detector level
    pub fn compute_gain_db(&self, input_db: f32) -> f32 {
        let threshold = self.settings.threshold;
        let ratio = self.settings.ratio;
        let knee = self.settings.knee;
        let overshoot = input_db - threshold;
        let slope = 1.0 / ratio - 1.0;

        if knee > 0.0 && overshoot.abs() <= knee / 2.0 {
            let x = overshoot + knee / 2.0;
            slope * x * x / (2.0 * knee)
        } else if overshoot > 0.0 {
            slope * overshoot
        } else {
            0.0
        }
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = time_coefficient(self.settings.attack, self.sample_rate);
        self.release_coeff = time_coefficient(self.settings.release, self.sample_rate);
        let full_scale_gain = db_to_linear(self.compute_gain_db(0.0));
        self.makeup_linear = (1.0 / full_scale_gain).powf(MAKEUP_EXPONENT);
    }
}

/// One-pole smoothing coefficient for a time constant in seconds
fn time_coefficient(seconds: f32, sample_rate: f32) -> f32 {
    let samples = seconds * sample_rate;
    if samples <= 1.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressorSettings::default())
    }
}

impl Stage for Compressor {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        let channels = buffer.num_channels();
        let frames = buffer.len();

        for frame in 0..frames {
            // Linked detection: loudest channel drives every channel
            let mut level: f32 = 0.0;
            for ch in 0..channels {
                level = level.max(buffer.channel(ch)[frame].abs());
            }
            let input_db = linear_to_db(level).max(DETECTOR_FLOOR_DB);
            let target = db_to_linear(self.compute_gain_db(input_db));

            let coeff = if target < self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * target;

            let gain = self.envelope * self.makeup_linear;
            for ch in 0..channels {
                buffer.channel_mut(ch)[frame] *= gain;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.update_coefficients();
        self.reset();
    }

    fn reset(&mut self) {
        self.envelope = 1.0;
    }

    fn stage_type(&self) -> &'static str {
        "compressor"
    }
}

// ============================================================================
// Tests
// ============================================================================
