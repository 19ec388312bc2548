//! Tempo and downbeat estimation
//!
//! Autocorrelation of a smoothed ~500 Hz amplitude envelope over the lags
//! that correspond to 60-180 BPM. The downbeat is the first point of the
//! first eight seconds that reaches 60% of their peak.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::envelope::{compute_envelope, Envelope};
use crate::engine::AudioBuffer;
use crate::error::Result;

/// Envelope rate used for tempo analysis
pub const TEMPO_ENVELOPE_RATE: u32 = 500;
/// Half width of the smoothing window, in envelope points
pub const SMOOTHING_HALF_WIDTH: usize = 4;
pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 180.0;
/// Seconds at the start of the track searched for the downbeat
pub const DOWNBEAT_SEARCH_SECS: f64 = 8.0;
/// Fraction of the opening peak that marks the downbeat
pub const DOWNBEAT_THRESHOLD: f32 = 0.6;

/// Result of analysing a backing track
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BeatAnalysis {
    pub duration: f64,
    pub tempo: Option<f64>,
    pub downbeat_offset: Option<f64>,
}

/// Estimates tempo and downbeat of decoded backing tracks
#[derive(Debug, Clone, Copy, Default)]
pub struct BeatAnalyzer;

impl BeatAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyse `buffer`; failures are logged and reported as absent values
    pub fn analyze(&self, buffer: &AudioBuffer) -> BeatAnalysis {
        let duration = buffer.duration_secs();
        match self.try_analyze(buffer) {
            Ok((tempo, downbeat_offset)) => {
                debug!(?tempo, ?downbeat_offset, duration, "Beat analysis complete");
                BeatAnalysis {
                    duration,
                    tempo,
                    downbeat_offset,
                }
            }
            Err(e) => {
                warn!(error = %e, "Beat analysis failed");
                BeatAnalysis {
                    duration,
                    tempo: None,
                    downbeat_offset: None,
                }
            }
        }
    }

    fn try_analyze(&self, buffer: &AudioBuffer) -> Result<(Option<f64>, Option<f64>)> {
        let envelope = compute_envelope(buffer, TEMPO_ENVELOPE_RATE)?.smoothed(SMOOTHING_HALF_WIDTH);
        let tempo = estimate_tempo(&envelope);
        let downbeat = tempo.and_then(|_| estimate_downbeat(&envelope));
        Ok((tempo, downbeat))
    }
}

/// Autocorrelation score of `values` at `lag`
fn autocorrelation(values: &[f32], lag: usize) -> f64 {
    values
        .iter()
        .zip(values.iter().skip(lag))
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum()
}

/// Tempo in BPM from a smoothed envelope
///
/// The best-scoring lag wins, the lowest lag on ties. No tempo is reported
/// when no lag correlates positively.
pub fn estimate_tempo(envelope: &Envelope) -> Option<f64> {
    let min_lag = ((60.0 / MAX_BPM) * envelope.rate).floor() as usize;
    let max_lag = ((60.0 / MIN_BPM) * envelope.rate).floor() as usize;

    let mut best_lag = 0;
    let mut best_score = 0.0;
    for lag in min_lag.max(1)..=max_lag {
        let score = autocorrelation(&envelope.values, lag);
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 {
        return None;
    }
    Some(60.0 * envelope.rate / best_lag as f64)
}

/// Downbeat offset in seconds from a smoothed envelope
pub fn estimate_downbeat(envelope: &Envelope) -> Option<f64> {
    let window = envelope
        .len()
        .min((envelope.rate * DOWNBEAT_SEARCH_SECS).floor() as usize);
    // A silent window has a zero threshold, so its first point qualifies
    let peak = envelope.peak(window);
    envelope
        .first_at_or_above(peak * DOWNBEAT_THRESHOLD, window)
        .map(|index| envelope.time_of(index))
}
