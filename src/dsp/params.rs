//! Effect parameters
//!
//! The full, always-defined record of every user-adjustable value plus the
//! partial updates the controller accepts. Every value is clamped on the way
//! in, so the stored record is always the last-clamped value.

use serde::{Deserialize, Serialize};

// ============================================================================
// Ranges
// ============================================================================

pub const VOLUME_RANGE: (f32, f32) = (0.0, 2.0);
pub const EQ_GAIN_RANGE_DB: (f32, f32) = (-12.0, 12.0);
pub const THRESHOLD_RANGE_DB: (f32, f32) = (-60.0, 0.0);
pub const KNEE_RANGE_DB: (f32, f32) = (0.0, 40.0);
pub const RATIO_RANGE: (f32, f32) = (1.0, 12.0);
pub const ATTACK_RANGE_SECS: (f32, f32) = (0.0, 1.0);
pub const RELEASE_RANGE_SECS: (f32, f32) = (0.0, 1.0);
pub const DELAY_TIME_RANGE_SECS: (f32, f32) = (0.0, 1.5);
pub const FEEDBACK_RANGE: (f32, f32) = (0.0, 0.95);
pub const SEND_MIX_RANGE: (f32, f32) = (0.0, 1.2);
pub const REVERB_DURATION_RANGE_SECS: (f32, f32) = (0.5, 6.0);
pub const REVERB_DECAY_RANGE: (f32, f32) = (0.1, 10.0);

/// Clamp `value` into `range`; non-finite input keeps `current`
#[inline]
fn clamped(current: f32, value: Option<f32>, range: (f32, f32)) -> f32 {
    match value {
        Some(v) if v.is_finite() => v.clamp(range.0, range.1),
        _ => current,
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Linear gains of the three mix buses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub beat: f32,
    pub vocal: f32,
    pub master: f32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            beat: 0.85,
            vocal: 1.0,
            master: 0.9,
        }
    }
}

/// Shelf and mid-band gains in dB
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EqSettings {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

/// Vocal compressor
///
/// Times are in seconds, levels in dB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub threshold: f32,
    pub knee: f32,
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold: -18.0,
            knee: 30.0,
            ratio: 3.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

/// Feedback delay send
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    pub time: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            time: 0.28,
            feedback: 0.35,
            mix: 0.25,
        }
    }
}

impl DelaySettings {
    /// Gain into the delay line; the wet return may exceed unity, the send may not
    pub fn input_gain(&self) -> f32 {
        self.mix.clamp(0.0, 1.0)
    }

    pub fn wet_gain(&self) -> f32 {
        self.mix.clamp(SEND_MIX_RANGE.0, SEND_MIX_RANGE.1)
    }
}

/// Convolution reverb send
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    /// Impulse length in seconds
    pub duration: f32,
    /// Exponent of the impulse decay curve
    pub decay: f32,
    pub mix: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            duration: 2.5,
            decay: 2.2,
            mix: 0.3,
        }
    }
}

impl ReverbSettings {
    /// Level of the dry vocal path for this reverb mix
    pub fn dry_gain(&self) -> f32 {
        compute_dry_gain(self.mix)
    }
}

/// Dry vocal level: more reverb pulls the dry signal down, never below 0.3
pub fn compute_dry_gain(reverb_mix: f32) -> f32 {
    (1.0 - reverb_mix * 0.65).clamp(0.3, 1.0)
}

/// Every adjustable value of the graph
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParameters {
    pub volume: VolumeSettings,
    pub eq: EqSettings,
    pub compressor: CompressorSettings,
    pub delay: DelaySettings,
    pub reverb: ReverbSettings,
}

impl EffectParameters {
    /// Re-clamp every field, e.g. after deserializing a params file
    pub fn clamped(mut self) -> Self {
        let volume = self.volume;
        self.volume = VolumeSettings::default();
        self.volume.apply(&VolumeUpdate {
            beat: Some(volume.beat),
            vocal: Some(volume.vocal),
            master: Some(volume.master),
        });

        let eq = self.eq;
        self.eq = EqSettings::default();
        self.eq.apply(&EqUpdate {
            low: Some(eq.low),
            mid: Some(eq.mid),
            high: Some(eq.high),
        });

        let comp = self.compressor;
        self.compressor = CompressorSettings::default();
        self.compressor.apply(&CompressorUpdate {
            threshold: Some(comp.threshold),
            knee: Some(comp.knee),
            ratio: Some(comp.ratio),
            attack: Some(comp.attack),
            release: Some(comp.release),
        });

        let delay = self.delay;
        self.delay = DelaySettings::default();
        self.delay.apply(&DelayUpdate {
            time: Some(delay.time),
            feedback: Some(delay.feedback),
            mix: Some(delay.mix),
        });

        let reverb = self.reverb;
        self.reverb = ReverbSettings::default();
        self.reverb.apply(&ReverbUpdate {
            duration: Some(reverb.duration),
            decay: Some(reverb.decay),
            mix: Some(reverb.mix),
        });

        self
    }
}

// ============================================================================
// Partial updates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeUpdate {
    pub beat: Option<f32>,
    pub vocal: Option<f32>,
    pub master: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EqUpdate {
    pub low: Option<f32>,
    pub mid: Option<f32>,
    pub high: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompressorUpdate {
    pub threshold: Option<f32>,
    pub knee: Option<f32>,
    pub ratio: Option<f32>,
    pub attack: Option<f32>,
    pub release: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DelayUpdate {
    pub time: Option<f32>,
    pub feedback: Option<f32>,
    pub mix: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReverbUpdate {
    pub duration: Option<f32>,
    pub decay: Option<f32>,
    pub mix: Option<f32>,
}

impl VolumeSettings {
    pub fn apply(&mut self, update: &VolumeUpdate) {
        self.beat = clamped(self.beat, update.beat, VOLUME_RANGE);
        self.vocal = clamped(self.vocal, update.vocal, VOLUME_RANGE);
        self.master = clamped(self.master, update.master, VOLUME_RANGE);
    }
}

impl EqSettings {
    pub fn apply(&mut self, update: &EqUpdate) {
        self.low = clamped(self.low, update.low, EQ_GAIN_RANGE_DB);
        self.mid = clamped(self.mid, update.mid, EQ_GAIN_RANGE_DB);
        self.high = clamped(self.high, update.high, EQ_GAIN_RANGE_DB);
    }
}

impl CompressorSettings {
    pub fn apply(&mut self, update: &CompressorUpdate) {
        self.threshold = clamped(self.threshold, update.threshold, THRESHOLD_RANGE_DB);
        self.knee = clamped(self.knee, update.knee, KNEE_RANGE_DB);
        self.ratio = clamped(self.ratio, update.ratio, RATIO_RANGE);
        self.attack = clamped(self.attack, update.attack, ATTACK_RANGE_SECS);
        self.release = clamped(self.release, update.release, RELEASE_RANGE_SECS);
    }
}

impl DelaySettings {
    pub fn apply(&mut self, update: &DelayUpdate) {
        self.time = clamped(self.time, update.time, DELAY_TIME_RANGE_SECS);
        self.feedback = clamped(self.feedback, update.feedback, FEEDBACK_RANGE);
        self.mix = clamped(self.mix, update.mix, SEND_MIX_RANGE);
    }
}

impl ReverbSettings {
    /// Apply an update; returns true when the impulse needs regenerating
    pub fn apply(&mut self, update: &ReverbUpdate) -> bool {
        let before = (self.duration, self.decay);
        self.duration = clamped(self.duration, update.duration, REVERB_DURATION_RANGE_SECS);
        self.decay = clamped(self.decay, update.decay, REVERB_DECAY_RANGE);
        self.mix = clamped(self.mix, update.mix, SEND_MIX_RANGE);
        before != (self.duration, self.decay)
    }
}

// ============================================================================
// Tests
// ============================================================================
