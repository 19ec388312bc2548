//! Vocal onset detection
//!
//! The onset is the first point of a ~1000 Hz envelope that reaches 20% of
//! the take's peak. Silent takes start at zero.

use tracing::warn;

use crate::analysis::envelope::compute_envelope;
use crate::engine::AudioBuffer;

/// Envelope rate used for onset detection
pub const ONSET_ENVELOPE_RATE: u32 = 1000;
/// Fraction of the peak that counts as voice
pub const ONSET_THRESHOLD: f32 = 0.2;
/// Peaks at or below this level are treated as silence
pub const SILENCE_FLOOR: f32 = 1e-5;

/// Finds where the voice starts in a captured or imported take
#[derive(Debug, Clone, Copy, Default)]
pub struct OnsetDetector;

impl OnsetDetector {
    pub fn new() -> Self {
        Self
    }

    /// Onset in seconds from the start of `buffer`
    pub fn detect(&self, buffer: &AudioBuffer) -> f64 {
        let envelope = match compute_envelope(buffer, ONSET_ENVELOPE_RATE) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Onset detection failed");
                return 0.0;
            }
        };

        let peak = envelope.peak(envelope.len());
        if peak <= SILENCE_FLOOR {
            return 0.0;
        }
        envelope
            .first_at_or_above(peak * ONSET_THRESHOLD, envelope.len())
            .map(|index| envelope.time_of(index))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::generate_delayed_tone;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_onset_after_silence() {
        let take = generate_delayed_tone(0.62, 1.0, 220.0, 0.5, 48000);
        let onset = OnsetDetector::new().detect(&take);
        assert_abs_diff_eq!(onset, 0.62, epsilon = 0.005);
    }

    #[test]
    fn test_onset_ignores_quiet_bleed() {
        let mut take = generate_delayed_tone(0.3, 0.5, 220.0, 0.8, 48000);
        // Bleed well under 20% of the peak
        for sample in take.channel_mut(0)[..14400].iter_mut() {
            *sample = 0.05;
        }
        let onset = OnsetDetector::new().detect(&take);
        assert_abs_diff_eq!(onset, 0.3, epsilon = 0.005);
    }

    #[test]
    fn test_silent_take_starts_at_zero() {
        let take = AudioBuffer::new(2, 48000, 48000);
        assert_eq!(OnsetDetector::new().detect(&take), 0.0);

        let mut whisper = AudioBuffer::new(1, 48000, 48000);
        whisper.set_sample(0, 24000, 1e-6);
        assert_eq!(OnsetDetector::new().detect(&whisper), 0.0);
    }

    #[test]
    fn test_onset_uses_step_rate() {
        // 44.1 kHz: step 44, so one envelope point is 44 frames
        let mut take = AudioBuffer::new(1, 44100, 44100);
        take.set_sample(0, 44 * 100, 1.0);
        let onset = OnsetDetector::new().detect(&take);
        assert_abs_diff_eq!(onset, 100.0 / (44100.0 / 44.0), epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_buffer_is_zero() {
        assert_eq!(OnsetDetector::new().detect(&AudioBuffer::new(1, 100, 0)), 0.0);
    }
}
