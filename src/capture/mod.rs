//! Capture Module
//!
//! Live vocal capture:
//! - Microphone access with raw-input constraints
//! - Backends that turn rendered blocks into chunks
//! - Assembly of chunks into one contiguous take

pub mod assembler;
pub mod backend;
pub mod microphone;

pub use assembler::{CaptureAssembler, Chunk, RecordingSession};
pub use backend::{
    select_backend, AutoBackend, BackendKind, BackendPreference, CaptureBackend,
    PollingBackend, ScriptedBackend, StreamingBackend, DEFAULT_POLLING_CHUNK,
};
pub use microphone::{BufferMicrophone, InputStream, Microphone, MicrophoneConstraints};
