//! Tone-shaping biquad filters
//!
//! Low shelf, peaking and high shelf sections built from the Audio EQ
//! Cookbook. The vocal chain runs three of them in series.

use crate::dsp::stage::Stage;
use crate::engine::AudioBuffer;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Corner of the low shelf
pub const LOW_SHELF_HZ: f64 = 120.0;
/// Centre of the presence band
pub const MID_PEAK_HZ: f64 = 1800.0;
/// Corner of the high shelf
pub const HIGH_SHELF_HZ: f64 = 8000.0;

/// Filter shape of a biquad section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    /// Boost/cut below frequency
    LowShelf,
    /// Bell curve boost/cut
    Peaking,
    /// Boost/cut above frequency
    HighShelf,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Calculate biquad coefficients using Audio EQ Cookbook formulas
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    fn calculate(kind: BiquadKind, sample_rate: f64, frequency: f64, gain_db: f64, q: f64) -> Self {
        // Keep the corner below Nyquist so low render rates stay stable
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            BiquadKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            BiquadKind::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            BiquadKind::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Direct Form I
    #[inline]
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// One biquad section with a fixed shape, corner and Q
///
/// Only the gain is adjustable at runtime. Coefficients are recomputed when
/// the gain or the sample rate changes.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    kind: BiquadKind,
    frequency: f64,
    q: f64,
    gain_db: f32,
    sample_rate: f64,
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
}

impl BiquadFilter {
    pub fn new(kind: BiquadKind, frequency: f64, q: f64, gain_db: f32) -> Self {
        let mut filter = Self {
            kind,
            frequency,
            q,
            gain_db,
            sample_rate: crate::engine::buffer::DEFAULT_SAMPLE_RATE as f64,
            coeffs: BiquadCoeffs::default(),
            states: vec![BiquadState::default(); 2],
        };
        filter.update_coefficients();
        filter
    }

    /// Low shelf at 120 Hz with a unity shelf slope
    pub fn low_shelf(gain_db: f32) -> Self {
        Self::new(BiquadKind::LowShelf, LOW_SHELF_HZ, FRAC_1_SQRT_2, gain_db)
    }

    /// Peaking band at 1.8 kHz, Q 1
    pub fn presence(gain_db: f32) -> Self {
        Self::new(BiquadKind::Peaking, MID_PEAK_HZ, 1.0, gain_db)
    }

    /// High shelf at 8 kHz with a unity shelf slope
    pub fn high_shelf(gain_db: f32) -> Self {
        Self::new(BiquadKind::HighShelf, HIGH_SHELF_HZ, FRAC_1_SQRT_2, gain_db)
    }

    pub fn kind(&self) -> BiquadKind {
        self.kind
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn set_gain_db(&mut self, gain_db: f32) {
        if gain_db != self.gain_db {
            self.gain_db = gain_db;
            self.update_coefficients();
        }
    }

    /// Magnitude response in dB at `frequency`
    pub fn magnitude_db(&self, frequency: f64) -> f64 {
        let c = &self.coeffs;
        let w = 2.0 * PI * frequency / self.sample_rate;
        let (cos1, sin1) = (w.cos(), w.sin());
        let (cos2, sin2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = c.b0 + c.b1 * cos1 + c.b2 * cos2;
        let num_im = -(c.b1 * sin1 + c.b2 * sin2);
        let den_re = 1.0 + c.a1 * cos1 + c.a2 * cos2;
        let den_im = -(c.a1 * sin1 + c.a2 * sin2);
        let mag = ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt();
        20.0 * mag.log10()
    }

    fn update_coefficients(&mut self) {
        self.coeffs = BiquadCoeffs::calculate(
            self.kind,
            self.sample_rate,
            self.frequency,
            self.gain_db as f64,
            self.q,
        );
    }
}

impl Stage for BiquadFilter {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        let channels = buffer.num_channels();
        if self.states.len() < channels {
            self.states.resize(channels, BiquadState::default());
        }
        for ch in 0..channels {
            let state = &mut self.states[ch];
            for sample in buffer.channel_mut(ch).iter_mut() {
                *sample = state.process(*sample as f64, &self.coeffs) as f32;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate as f64 != self.sample_rate {
            self.sample_rate = sample_rate as f64;
            self.update_coefficients();
        }
        self.reset();
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            *state = BiquadState::default();
        }
    }

    fn stage_type(&self) -> &'static str {
        match self.kind {
            BiquadKind::LowShelf => "lowshelf",
            BiquadKind::Peaking => "peaking",
            BiquadKind::HighShelf => "highshelf",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::calculate_rms;
    use crate::engine::io::generate_test_tone;
    use approx::assert_abs_diff_eq;

    fn filtered_rms(mut filter: BiquadFilter, freq: f32) -> f32 {
        filter.prepare(48000, 128);
        let mut tone = generate_test_tone(freq, 0.5, 48000);
        filter.process(&mut tone);
        // Skip the transient
        calculate_rms(&tone.channel(0)[4800..])
    }

    #[test]
    fn test_flat_filters_are_transparent() {
        for filter in [
            BiquadFilter::low_shelf(0.0),
            BiquadFilter::presence(0.0),
            BiquadFilter::high_shelf(0.0),
        ] {
            assert_abs_diff_eq!(filter.magnitude_db(1000.0), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_low_shelf_boosts_lows_only() {
        let filter = BiquadFilter::low_shelf(12.0);
        assert_abs_diff_eq!(filter.magnitude_db(1.0), 12.0, epsilon = 0.05);
        assert_abs_diff_eq!(filter.magnitude_db(5000.0), 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_high_shelf_cuts_highs_only() {
        let filter = BiquadFilter::high_shelf(-12.0);
        assert_abs_diff_eq!(filter.magnitude_db(24000.0), -12.0, epsilon = 1e-3);
        assert_abs_diff_eq!(filter.magnitude_db(200.0), 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_presence_peak_at_centre() {
        let filter = BiquadFilter::presence(6.0);
        assert_abs_diff_eq!(filter.magnitude_db(MID_PEAK_HZ), 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_processing_matches_response() {
        let reference = calculate_rms(&generate_test_tone(1800.0, 0.5, 48000).channel(0)[4800..]);
        let boosted = filtered_rms(BiquadFilter::presence(6.0), 1800.0);
        assert_abs_diff_eq!(boosted - reference, 6.0, epsilon = 0.2);
    }

    #[test]
    fn test_set_gain_recomputes() {
        let mut filter = BiquadFilter::presence(0.0);
        filter.set_gain_db(-9.0);
        assert_eq!(filter.gain_db(), -9.0);
        assert_abs_diff_eq!(filter.magnitude_db(MID_PEAK_HZ), -9.0, epsilon = 1e-6);
    }

    #[test]
    fn test_prepare_at_low_rate_stays_stable() {
        let mut filter = BiquadFilter::high_shelf(12.0);
        filter.prepare(8000, 128);
        let mut tone = generate_test_tone(440.0, 0.5, 8000);
        filter.process(&mut tone);
        assert!(tone.is_finite());
        assert!(tone.peak() < 8.0);
    }
}
