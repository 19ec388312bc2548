//! Error handling for takebooth
//!
//! Every user-facing failure is a distinct variant so the calling layer can
//! tell a corrupt file from a refused microphone without parsing strings.

use thiserror::Error;

/// Result type alias for takebooth operations
pub type Result<T> = std::result::Result<T, StudioError>;

/// Main error type for takebooth operations
#[derive(Error, Debug)]
pub enum StudioError {
    // Input Errors
    #[error("Could not decode audio: {reason}")]
    DecodeFailure {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid audio buffer: {reason}")]
    InvalidAudio { reason: String },

    // Device Errors
    #[error("Microphone access denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Capture backend unavailable: {reason}")]
    CaptureBackend { reason: String },

    // Lifecycle Errors
    #[error("Audio engine not initialised")]
    GraphNotInitialized,

    #[error("Add a beat or record vocals before playback")]
    NoSourceLoaded,

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("Nothing to export. Load a beat or record vocals first.")]
    NothingToExport,

    // Output Errors
    #[error("Encoding failed: {reason}")]
    EncodingFailed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Internal, never surfaced by the controller
    #[error("Analysis failed: {reason}")]
    Analysis { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StudioError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            StudioError::DecodeFailure { .. } => "DECODE_FAILURE",
            StudioError::InvalidAudio { .. } => "INVALID_AUDIO",
            StudioError::PermissionDenied { .. } => "PERMISSION_DENIED",
            StudioError::CaptureBackend { .. } => "CAPTURE_BACKEND",
            StudioError::GraphNotInitialized => "GRAPH_NOT_INITIALIZED",
            StudioError::NoSourceLoaded => "NO_SOURCE_LOADED",
            StudioError::AlreadyRecording => "ALREADY_RECORDING",
            StudioError::NothingToExport => "NOTHING_TO_EXPORT",
            StudioError::EncodingFailed { .. } => "ENCODING_FAILED",
            StudioError::InvalidConfig { .. } => "INVALID_CONFIG",
            StudioError::Analysis { .. } => "ANALYSIS_FAILED",
            StudioError::Io(_) => "IO_ERROR",
            StudioError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// `GraphNotInitialized` is a programming error and is deliberately not
    /// recoverable: the caller skipped `initialize` or used a disposed engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StudioError::DecodeFailure { .. }
                | StudioError::PermissionDenied { .. }
                | StudioError::CaptureBackend { .. }
                | StudioError::NoSourceLoaded
                | StudioError::AlreadyRecording
                | StudioError::NothingToExport
                | StudioError::Analysis { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StudioError::DecodeFailure { .. } => vec![
                "Check that the file is a valid WAV file",
                "Try re-exporting the track from its source",
                "The previously loaded track is still available",
            ],
            StudioError::PermissionDenied { .. } => vec![
                "Allow microphone access and try again",
                "Check that no other application holds the input device",
            ],
            StudioError::NoSourceLoaded => vec![
                "Load a backing track",
                "Record or import a vocal take",
            ],
            StudioError::NothingToExport => vec![
                "Load a backing track or record vocals before exporting",
            ],
            StudioError::GraphNotInitialized => vec![
                "Call initialize() before using the engine",
                "A disposed engine must be initialized again",
            ],
            _ => vec![],
        }
    }

    /// Get a user-friendly message for this error
    pub fn friendly_message(&self) -> String {
        match self {
            StudioError::DecodeFailure { reason, .. } => {
                format!(
                    "That file couldn't be read as audio ({}). Your previous track is still loaded.",
                    reason
                )
            }
            StudioError::PermissionDenied { .. } => {
                "I need microphone access to record. Allow it and hit record again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
