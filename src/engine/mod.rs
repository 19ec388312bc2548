//! Audio Engine Module
//!
//! Core of the studio engine:
//! - Audio buffer management and encoded media I/O
//! - Scheduled sources and the block render context
//! - Transport state machine
//! - The session controller

pub mod buffer;
pub mod context;
pub mod controller;
pub mod io;
pub mod source;
pub mod transport;

pub use buffer::{calculate_rms, db_to_linear, linear_to_db, AudioBuffer};
pub use context::{RenderContext, SourceHandle, SourceTarget};
pub use controller::{EngineController, EngineEvent};
pub use io::{
    decode_to_rate, generate_click_track, generate_delayed_tone, generate_test_tone,
    AudioDecoder, EncodedMedia, ExportFormat, MediaEncoder, WavDecoder, WavEncoder,
};
pub use source::{CancelToken, ScheduledSource, SourceEvent, SourceId};
pub use transport::{EngineState, TransportManager};
