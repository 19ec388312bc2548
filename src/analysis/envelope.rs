//! Amplitude envelopes
//!
//! Decimated magnitude envelopes shared by tempo and onset analysis. Each
//! envelope point samples a single frame (no averaging over the step) and
//! takes the mean absolute value across channels.

use crate::engine::AudioBuffer;
use crate::error::{Result, StudioError};

/// Decimated amplitude envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub values: Vec<f32>,
    /// Envelope points per second (`sample_rate / step`)
    pub rate: f64,
    /// Source frames per envelope point
    pub step: usize,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest value among the first `limit` points
    pub fn peak(&self, limit: usize) -> f32 {
        self.values
            .iter()
            .take(limit)
            .copied()
            .fold(0.0_f32, f32::max)
    }

    /// Index of the first of the first `limit` points reaching `threshold`
    pub fn first_at_or_above(&self, threshold: f32, limit: usize) -> Option<usize> {
        self.values
            .iter()
            .take(limit)
            .position(|&v| v >= threshold)
    }

    /// Seconds corresponding to envelope index `index`
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 / self.rate
    }

    /// Symmetric moving average of `2 * half_width + 1` points
    ///
    /// Near the edges only the points that exist are averaged.
    pub fn smoothed(&self, half_width: usize) -> Envelope {
        let n = self.values.len();
        let values = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(half_width);
                let hi = (i + half_width).min(n - 1);
                let window = &self.values[lo..=hi];
                let sum: f64 = window.iter().map(|&v| v as f64).sum();
                (sum / window.len() as f64) as f32
            })
            .collect();
        Envelope {
            values,
            rate: self.rate,
            step: self.step,
        }
    }
}

/// Envelope of `buffer` at roughly `target_rate` points per second
///
/// `step = max(1, floor(sample_rate / target_rate))` and the envelope has
/// `floor(len / step)` points.
pub fn compute_envelope(buffer: &AudioBuffer, target_rate: u32) -> Result<Envelope> {
    let sample_rate = buffer.sample_rate();
    if sample_rate == 0 {
        return Err(StudioError::Analysis {
            reason: "buffer has a zero sample rate".to_string(),
        });
    }
    if buffer.num_channels() == 0 {
        return Err(StudioError::Analysis {
            reason: "buffer has no channels".to_string(),
        });
    }
    if target_rate == 0 {
        return Err(StudioError::Analysis {
            reason: "envelope rate must be positive".to_string(),
        });
    }

    let step = ((sample_rate / target_rate) as usize).max(1);
    let frames = buffer.len() / step;
    let values: Vec<f32> = (0..frames)
        .map(|i| buffer.frame_magnitude(i * step))
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StudioError::Analysis {
            reason: "buffer contains non-finite samples".to_string(),
        });
    }

    Ok(Envelope {
        values,
        rate: sample_rate as f64 / step as f64,
        step,
    })
}
