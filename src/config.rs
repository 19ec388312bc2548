//! Engine configuration
//!
//! Stored as JSON. Missing fields take their defaults; the whole structure is
//! validated after loading.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capture::{BackendPreference, DEFAULT_POLLING_CHUNK};
use crate::dsp::DEFAULT_PARTITION_SIZE;
use crate::engine::buffer::{DEFAULT_SAMPLE_RATE, DEFAULT_WAVEFORM_RESOLUTION};
use crate::engine::io::ExportFormat;
use crate::error::{Result, StudioError};

/// Frames per render block
pub const DEFAULT_BLOCK_SIZE: usize = 128;
/// Delay between a start request and the first scheduled frame
pub const DEFAULT_LEAD_IN_SECS: f64 = 0.1;
/// Extra capture time after the longest source ends during export
pub const DEFAULT_TAIL_MARGIN_SECS: f64 = 0.6;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub lead_in_secs: f64,
    pub tail_margin_secs: f64,
    /// Buckets in each waveform summary
    pub waveform_resolution: usize,
    pub capture_backend: BackendPreference,
    /// Frames per chunk for the polling backend
    pub polling_chunk: usize,
    /// Partition length of the convolution reverb
    pub partition_size: usize,
    /// Fixed seed for reverb impulses; entropy when absent
    pub reverb_seed: Option<u64>,
    /// 16, 24 or 32 (float)
    pub export_bit_depth: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            lead_in_secs: DEFAULT_LEAD_IN_SECS,
            tail_margin_secs: DEFAULT_TAIL_MARGIN_SECS,
            waveform_resolution: DEFAULT_WAVEFORM_RESOLUTION,
            capture_backend: BackendPreference::Auto,
            polling_chunk: DEFAULT_POLLING_CHUNK,
            partition_size: DEFAULT_PARTITION_SIZE,
            reverb_seed: None,
            export_bit_depth: 32,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading engine config");
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(reason: String) -> Result<()> {
            Err(StudioError::InvalidConfig { reason })
        }

        if !(8000..=192_000).contains(&self.sample_rate) {
            return invalid(format!(
                "sample_rate must be within 8000..=192000, got {}",
                self.sample_rate
            ));
        }
        if self.block_size == 0 || self.block_size > 16384 {
            return invalid(format!("block_size must be within 1..=16384, got {}", self.block_size));
        }
        if !self.lead_in_secs.is_finite() || self.lead_in_secs < 0.0 {
            return invalid(format!("lead_in_secs must be >= 0, got {}", self.lead_in_secs));
        }
        if !self.tail_margin_secs.is_finite() || self.tail_margin_secs < 0.0 {
            return invalid(format!(
                "tail_margin_secs must be >= 0, got {}",
                self.tail_margin_secs
            ));
        }
        if self.waveform_resolution == 0 {
            return invalid("waveform_resolution must be positive".to_string());
        }
        if self.polling_chunk == 0 {
            return invalid("polling_chunk must be positive".to_string());
        }
        if !self.partition_size.is_power_of_two() {
            return invalid(format!(
                "partition_size must be a power of two, got {}",
                self.partition_size
            ));
        }
        self.export_format().map(|_| ())
    }

    pub fn export_format(&self) -> Result<ExportFormat> {
        ExportFormat::new(self.export_bit_depth)
    }
}
