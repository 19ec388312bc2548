//! Analysis Module
//!
//! Best-effort heuristics over decoded audio:
//! - Tempo and downbeat of backing tracks
//! - Onset of vocal takes
//! - Alignment of the vocal onset to the beat grid

pub mod alignment;
pub mod envelope;
pub mod onset;
pub mod tempo;

pub use alignment::{AlignmentInputs, AlignmentPlanner, PlaybackAlignment, PlaybackPlan};
pub use envelope::{compute_envelope, Envelope};
pub use onset::OnsetDetector;
pub use tempo::{BeatAnalysis, BeatAnalyzer};
