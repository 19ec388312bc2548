//! Playback alignment
//!
//! Snaps the vocal onset to the nearest multiple of the beat period. When
//! the snapped time is at or before the onset, the vocal is trimmed from the
//! front; otherwise its start is pushed back. The backing track always
//! starts at the lead-in.

use serde::{Deserialize, Serialize};

/// What the planner exposes after each playback or export
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackAlignment {
    /// `quantized_target - onset`; negative means the vocal was trimmed
    pub alignment_shift: Option<f64>,
    pub quantized_target: Option<f64>,
}

/// Concrete start times for one playback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackPlan {
    /// Context time at which the backing track starts
    pub beat_start: f64,
    /// Context time at which the vocal starts
    pub vocal_start: f64,
    /// Seconds skipped at the front of the vocal
    pub vocal_offset: f64,
    pub alignment: PlaybackAlignment,
}

/// Inputs to a single planning decision
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignmentInputs {
    pub tempo: Option<f64>,
    /// Carried for callers that display it; quantization does not use it
    pub downbeat_offset: Option<f64>,
    pub onset: Option<f64>,
    pub vocal_duration: f64,
}

/// Computes start offsets that put the vocal onset on the beat grid
#[derive(Debug, Clone, Copy, Default)]
pub struct AlignmentPlanner;

impl AlignmentPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan a playback whose sources start at `base_start`
    pub fn plan(&self, inputs: &AlignmentInputs, base_start: f64) -> PlaybackPlan {
        let unaligned = PlaybackPlan {
            beat_start: base_start,
            vocal_start: base_start,
            vocal_offset: 0.0,
            alignment: PlaybackAlignment::default(),
        };

        let (tempo, onset) = match (inputs.tempo, inputs.onset) {
            (Some(tempo), Some(onset)) if tempo > 0.0 && tempo.is_finite() && onset.is_finite() => {
                (tempo, onset)
            }
            _ => return unaligned,
        };

        let beat = 60.0 / tempo;
        let quantized = ((onset / beat).round() * beat).max(0.0);

        let mut plan = unaligned;
        if quantized <= onset {
            plan.vocal_offset = (onset - quantized).clamp(0.0, inputs.vocal_duration.max(0.0));
        } else {
            plan.vocal_start += quantized - onset;
        }
        plan.alignment = PlaybackAlignment {
            alignment_shift: Some(quantized - onset),
            quantized_target: Some(quantized),
        };
        plan
    }
}
