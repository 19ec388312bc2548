//! Audio Buffer Management
//!
//! Provides the planar audio buffer used everywhere in takebooth: decoded
//! backing tracks, assembled vocal takes, and the scratch blocks the signal
//! graph renders into.

use crate::error::{StudioError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default render sample rate (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Number of buckets in a waveform summary
pub const DEFAULT_WAVEFORM_RESOLUTION: usize = 512;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
///
/// # Arguments
/// * `db` - Value in decibels
///
/// # Returns
/// Linear amplitude (0.0 to 1.0+ range)
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Calculate the RMS level of one channel in dB
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    linear_to_db((sum_squares / samples.len() as f64).sqrt() as f32)
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Planar multi-channel f32 audio
///
/// Each channel is a separate `Vec<f32>` and all channels have the same
/// length. Decoded tracks are wrapped in an `Arc` once loaded and never
/// mutated again; render scratch buffers are reused block after block.
///
/// # Example
/// ```
/// use takebooth::engine::AudioBuffer;
///
/// let buffer = AudioBuffer::new(2, 48000, 48000);
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.duration_secs(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is frames
    samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer
    pub fn new(num_channels: usize, num_frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_frames]; num_channels],
            sample_rate,
        }
    }

    /// Create a buffer from planar channel data
    ///
    /// Fails if there are no channels or the channels differ in length.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(StudioError::InvalidAudio {
                reason: "buffer needs at least one channel".to_string(),
            });
        }
        let len = samples[0].len();
        if let Some(bad) = samples.iter().position(|ch| ch.len() != len) {
            return Err(StudioError::InvalidAudio {
                reason: format!(
                    "channel {} has {} frames, expected {}",
                    bad,
                    samples[bad].len(),
                    len
                ),
            });
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a buffer from interleaved sample data
    pub fn from_interleaved(
        interleaved: &[f32],
        num_channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if num_channels == 0 {
            return Err(StudioError::InvalidAudio {
                reason: "channel count must be at least 1".to_string(),
            });
        }
        if interleaved.len() % num_channels != 0 {
            return Err(StudioError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
            });
        }

        let num_frames = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_frames); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Number of frames per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Immutable access to one channel
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Mutable access to one channel
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.samples
    }

    #[inline]
    pub fn get_sample(&self, channel: usize, index: usize) -> Option<f32> {
        self.samples
            .get(channel)
            .and_then(|ch| ch.get(index).copied())
    }

    #[inline]
    pub fn set_sample(&mut self, channel: usize, index: usize, value: f32) -> bool {
        if let Some(sample) = self.samples.get_mut(channel).and_then(|ch| ch.get_mut(index)) {
            *sample = value;
            return true;
        }
        false
    }

    /// Zero every sample without reallocating
    pub fn clear(&mut self) {
        for channel in &mut self.samples {
            channel.fill(0.0);
        }
    }

    /// Resize every channel to `num_frames`, zero-filling new frames
    ///
    /// Render scratch buffers are resized only when the host hands in a
    /// larger block than prepared for.
    pub fn resize(&mut self, num_frames: usize) {
        for channel in &mut self.samples {
            channel.resize(num_frames, 0.0);
        }
    }

    /// Copy `other` into this buffer, up-mixing mono to every channel
    ///
    /// Frames beyond the shorter of the two buffers are left untouched.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        let frames = self.len().min(other.len());
        if other.num_channels() == 0 {
            return;
        }
        for (ch, dest) in self.samples.iter_mut().enumerate() {
            let src = &other.samples[ch.min(other.num_channels() - 1)];
            dest[..frames].copy_from_slice(&src[..frames]);
        }
    }

    /// Sum `other * gain` into this buffer, up-mixing mono the same way
    pub fn mix_from(&mut self, other: &AudioBuffer, gain: f32) {
        let frames = self.len().min(other.len());
        if other.num_channels() == 0 {
            return;
        }
        for (ch, dest) in self.samples.iter_mut().enumerate() {
            let src = &other.samples[ch.min(other.num_channels() - 1)];
            for (d, s) in dest[..frames].iter_mut().zip(&src[..frames]) {
                *d += s * gain;
            }
        }
    }

    /// Multiply every sample by a linear gain
    pub fn apply_gain(&mut self, gain: f32) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Mean absolute value across channels at one frame
    #[inline]
    pub fn frame_magnitude(&self, frame: usize) -> f32 {
        let channels = self.num_channels();
        if channels == 0 {
            return 0.0;
        }
        let sum: f32 = self
            .samples
            .iter()
            .map(|ch| ch.get(frame).map(|s| s.abs()).unwrap_or(0.0))
            .sum();
        sum / channels as f32
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Fixed-resolution amplitude summary for waveform displays
    ///
    /// Splits the buffer into `resolution` buckets of equal frame count and
    /// keeps the peak channel-mean magnitude of each, then normalizes the
    /// summary by its own maximum so the loudest bucket reads 1.0.
    pub fn waveform(&self, resolution: usize) -> Vec<f32> {
        let total = self.len();
        if total == 0 || self.num_channels() == 0 || resolution == 0 {
            return Vec::new();
        }

        let per_bucket = (total / resolution).max(1);
        let bucket_count = resolution.min(total.div_ceil(per_bucket));
        let mut data: Vec<f32> = (0..bucket_count)
            .map(|bucket| {
                let start = bucket * per_bucket;
                let end = total.min(start + per_bucket);
                (start..end)
                    .map(|frame| self.frame_magnitude(frame))
                    .fold(0.0_f32, f32::max)
            })
            .collect();

        let max = data.iter().copied().fold(0.0_f32, f32::max);
        if max > 0.0 {
            for value in &mut data {
                *value = (*value / max).min(1.0);
            }
        }
        data
    }

    /// Resample to `target_rate` with linear interpolation
    ///
    /// Returns a clone when the rates already match.
    pub fn resampled(&self, target_rate: u32) -> AudioBuffer {
        if self.sample_rate == target_rate || self.sample_rate == 0 || target_rate == 0 {
            return self.clone();
        }
        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.len() as f64) / ratio).round() as usize;
        let samples = self
            .samples
            .iter()
            .map(|channel| resample_channel(channel, ratio, out_len))
            .collect();
        AudioBuffer {
            samples,
            sample_rate: target_rate,
        }
    }
}

fn resample_channel(input: &[f32], ratio: f64, out_len: usize) -> Vec<f32> {
    if input.is_empty() {
        return vec![0.0; out_len];
    }
    let last = input.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                return input[last];
            }
            let frac = (pos - idx as f64) as f32;
            input[idx] + (input[idx + 1] - input[idx]) * frac
        })
        .collect()
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(2, 0, DEFAULT_SAMPLE_RATE)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_db_to_linear() {
        assert_abs_diff_eq!(db_to_linear(0.0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(db_to_linear(-20.0), 0.1, epsilon = 1e-6);
        assert!(db_to_linear(-120.0) < 1e-5);
    }

    #[test]
    fn test_linear_to_db() {
        assert_abs_diff_eq!(linear_to_db(1.0), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(linear_to_db(0.5), -6.0206, epsilon = 1e-3);
        assert!(linear_to_db(0.0).is_infinite());
    }

    #[test]
    fn test_from_channels_rejects_ragged() {
        let result = AudioBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 48000);
        assert!(matches!(result, Err(StudioError::InvalidAudio { .. })));
        assert!(AudioBuffer::from_channels(Vec::new(), 48000).is_err());
    }

    #[test]
    fn test_from_interleaved_splits_channels() {
        let interleaved = vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2, 44100).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel(1), &[-0.1, -0.2, -0.3]);
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::new(1, 24000, 48000);
        assert_abs_diff_eq!(buffer.duration_secs(), 0.5);
        assert_eq!(AudioBuffer::new(1, 10, 0).duration_secs(), 0.0);
    }

    #[test]
    fn test_copy_from_upmixes_mono() {
        let mono = AudioBuffer::from_channels(vec![vec![0.5, -0.5, 0.25]], 48000).unwrap();
        let mut stereo = AudioBuffer::new(2, 3, 48000);
        stereo.copy_from(&mono);
        assert_eq!(stereo.channel(0), mono.channel(0));
        assert_eq!(stereo.channel(1), mono.channel(0));
    }

    #[test]
    fn test_mix_from_sums_with_gain() {
        let src = AudioBuffer::from_channels(vec![vec![1.0, 1.0], vec![0.5, 0.5]], 48000).unwrap();
        let mut dest = AudioBuffer::from_channels(vec![vec![0.1, 0.1], vec![0.1, 0.1]], 48000)
            .unwrap();
        dest.mix_from(&src, 0.5);
        assert_abs_diff_eq!(dest.channel(0)[0], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(dest.channel(1)[1], 0.35, epsilon = 1e-6);
    }

    #[test]
    fn test_frame_magnitude_is_channel_mean() {
        let buffer = AudioBuffer::from_channels(vec![vec![0.4], vec![-0.2]], 48000).unwrap();
        assert_abs_diff_eq!(buffer.frame_magnitude(0), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_waveform_normalized_to_own_peak() {
        let mut samples = vec![0.0_f32; 1024];
        samples[10] = 0.25;
        samples[900] = 0.5;
        let buffer = AudioBuffer::from_channels(vec![samples], 48000).unwrap();

        let waveform = buffer.waveform(8);
        assert_eq!(waveform.len(), 8);
        assert_abs_diff_eq!(waveform[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(waveform[7], 1.0, epsilon = 1e-6);
        assert!(waveform.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_waveform_short_buffer() {
        let buffer = AudioBuffer::from_channels(vec![vec![0.1, 0.2, 0.4]], 48000).unwrap();
        let waveform = buffer.waveform(512);
        assert_eq!(waveform.len(), 3);
        assert_abs_diff_eq!(waveform[2], 1.0);
        assert!(AudioBuffer::new(1, 0, 48000).waveform(512).is_empty());
    }

    #[test]
    fn test_waveform_silent_stays_zero() {
        let buffer = AudioBuffer::new(2, 2048, 48000);
        assert!(buffer.waveform(16).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_resample_halves_length() {
        let buffer = AudioBuffer::from_channels(vec![(0..100).map(|i| i as f32).collect()], 96000)
            .unwrap();
        let resampled = buffer.resampled(48000);
        assert_eq!(resampled.sample_rate(), 48000);
        assert_eq!(resampled.len(), 50);
        assert_abs_diff_eq!(resampled.channel(0)[10], 20.0, epsilon = 1e-4);
        assert_abs_diff_eq!(resampled.duration_secs(), buffer.duration_secs(), epsilon = 1e-3);
    }

    #[test]
    fn test_peak_and_finite() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![0.2, -0.9, 0.5]], 48000).unwrap();
        assert_abs_diff_eq!(buffer.peak(), 0.9);
        assert!(buffer.is_finite());
        buffer.set_sample(0, 1, f32::NAN);
        assert!(!buffer.is_finite());
    }
}
