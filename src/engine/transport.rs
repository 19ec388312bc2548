//! Transport State Machine for takebooth
//!
//! Tracks whether the engine is idle, playing, or recording. Recording may
//! run the backing track underneath; from the outside the engine is then
//! only "recording", never both.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{Result, StudioError};

/// Transport states representing the current mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Nothing is scheduled (default state)
    #[default]
    Idle,
    /// Sources are playing through the graph
    Playing,
    /// The microphone is being captured
    Recording,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Playing => write!(f, "Playing"),
            EngineState::Recording => write!(f, "Recording"),
        }
    }
}

/// Manages transport state and the playhead
#[derive(Debug, Clone)]
pub struct TransportManager {
    state: EngineState,

    /// Frames rendered since the current playback or recording started
    playhead_frames: u64,

    sample_rate: u32,

    /// Set when recording started the backing track itself
    backing_under_recording: bool,
}

impl Default for TransportManager {
    fn default() -> Self {
        Self::new(crate::engine::buffer::DEFAULT_SAMPLE_RATE)
    }
}

impl TransportManager {
    /// Create a new TransportManager with the specified sample rate
    ///
    /// # Example
    /// ```
    /// use takebooth::engine::TransportManager;
    /// let transport = TransportManager::new(48000);
    /// assert!(transport.is_idle());
    /// ```
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: EngineState::Idle,
            playhead_frames: 0,
            sample_rate,
            backing_under_recording: false,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Idle -> Playing
    ///
    /// Restarting while already playing rewinds the playhead. Returns true if
    /// the state changed.
    pub fn play(&mut self) -> bool {
        match self.state {
            EngineState::Idle => {
                self.state = EngineState::Playing;
                self.playhead_frames = 0;
                debug!("[TRANSPORT] Play");
                true
            }
            EngineState::Playing => {
                self.playhead_frames = 0;
                debug!("[TRANSPORT] Playback restarted");
                false
            }
            EngineState::Recording => {
                warn!("[TRANSPORT] Cannot play while recording - stop recording first");
                false
            }
        }
    }

    /// Playing -> Idle; a no-op in any other state
    ///
    /// Returns true if the state changed.
    pub fn stop(&mut self) -> bool {
        if self.state != EngineState::Playing {
            debug!(state = %self.state, "[TRANSPORT] Stop ignored");
            return false;
        }
        self.state = EngineState::Idle;
        debug!(
            position = self.position_secs(),
            "[TRANSPORT] Stopped"
        );
        true
    }

    /// Idle/Playing -> Recording
    ///
    /// `with_backing` records whether the backing track plays underneath.
    pub fn record(&mut self, with_backing: bool) -> Result<()> {
        if self.state == EngineState::Recording {
            return Err(StudioError::AlreadyRecording);
        }
        debug!(from = %self.state, with_backing, "[TRANSPORT] Recording started");
        self.state = EngineState::Recording;
        self.playhead_frames = 0;
        self.backing_under_recording = with_backing;
        Ok(())
    }

    /// Recording -> Idle
    ///
    /// Returns whether the backing track was playing underneath, or `None`
    /// if no recording was running.
    pub fn stop_recording(&mut self) -> Option<bool> {
        if self.state != EngineState::Recording {
            return None;
        }
        self.state = EngineState::Idle;
        let with_backing = std::mem::take(&mut self.backing_under_recording);
        debug!(
            position = self.position_secs(),
            with_backing,
            "[TRANSPORT] Recording stopped"
        );
        Some(with_backing)
    }

    /// Force Idle from any state
    pub fn reset(&mut self) {
        self.state = EngineState::Idle;
        self.playhead_frames = 0;
        self.backing_under_recording = false;
    }

    /// Advance the playhead (called once per rendered block)
    pub fn advance(&mut self, frames: usize) {
        if self.state != EngineState::Idle {
            self.playhead_frames += frames as u64;
        }
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == EngineState::Idle
    }

    pub fn is_playing(&self) -> bool {
        self.state == EngineState::Playing
    }

    pub fn is_recording(&self) -> bool {
        self.state == EngineState::Recording
    }

    /// Whether the current recording started the backing track
    pub fn backing_under_recording(&self) -> bool {
        self.backing_under_recording
    }

    /// Seconds since the current playback or recording started
    pub fn position_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.playhead_frames as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ============================================================================
// Tests
// ============================================================================
