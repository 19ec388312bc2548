//! DSP Library
//!
//! Processing stages of the studio graph and the graph itself.
//! All stages implement the `Stage` trait for uniform processing.

mod compressor;
mod delay;
mod eq;
mod gain;
pub mod graph;
pub mod params;
mod reverb;
mod stage;

pub use compressor::Compressor;
pub use delay::FeedbackDelay;
pub use eq::{BiquadFilter, BiquadKind, HIGH_SHELF_HZ, LOW_SHELF_HZ, MID_PEAK_HZ};
pub use gain::GainStage;
pub use graph::{SignalGraph, BUS_CHANNELS};
pub use params::{
    compute_dry_gain, CompressorSettings, CompressorUpdate, DelaySettings, DelayUpdate,
    EffectParameters, EqSettings, EqUpdate, ReverbSettings, ReverbUpdate, VolumeSettings,
    VolumeUpdate,
};
pub use reverb::{normalization_scale, ConvolutionReverb, ImpulseGenerator, DEFAULT_PARTITION_SIZE};
pub use stage::Stage;
