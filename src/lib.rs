//! takebooth - Vocal Recording Studio Engine
//!
//! Load a backing track, record a vocal over it and bounce the mix.
//!
//! # Architecture
//!
//! - `dsp`: the fixed signal graph (gain, EQ, compressor, delay, reverb)
//! - `analysis`: tempo, downbeat and onset heuristics plus beat alignment
//! - `capture`: microphone input and chunked take assembly
//! - `render`: offline bounce of the aligned mix
//! - `engine`: buffers, I/O, the render context and the session controller

pub mod analysis;
pub mod capture;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod render;

pub use config::EngineConfig;
pub use engine::{AudioBuffer, EngineController, EngineEvent, EngineState};
pub use error::{Result, StudioError};
