//! Gain Stage
//!
//! Linear gain used for the beat, vocal, master and send buses.

use crate::dsp::stage::Stage;
use crate::engine::AudioBuffer;
use crate::impl_stateless_stage;

// ============================================================================
// Gain Stage
// ============================================================================

/// Multiplies every sample by a linear factor
///
/// # Example
/// ```
/// use takebooth::dsp::{GainStage, Stage};
/// use takebooth::engine::AudioBuffer;
///
/// let mut gain = GainStage::new(0.5);
/// let mut buffer = AudioBuffer::from_channels(vec![vec![1.0, -1.0]], 48000).unwrap();
/// gain.process(&mut buffer);
/// assert_eq!(buffer.channel(0), &[0.5, -0.5]);
/// ```
#[derive(Debug, Clone)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Default for GainStage {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Stage for GainStage {
    impl_stateless_stage!("gain");

    fn process(&mut self, buffer: &mut AudioBuffer) {
        // Unity gain optimization
        if (self.gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        buffer.apply_gain(self.gain);
    }
}

// ============================================================================
// Tests
// ============================================================================
