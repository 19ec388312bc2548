//! Audio file I/O for takebooth
//!
//! Decoding of imported tracks and encoding of bounced mixes. WAV is the
//! only container; the decoder and encoder sit behind traits so hosts can
//! plug in their own codecs.
//!
//! Decoded audio is converted to 32-bit float and resampled to the render
//! context rate by the caller (see [`decode_to_rate`]).

use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::buffer::AudioBuffer;
use crate::error::{Result, StudioError};

/// MIME type of everything the bundled encoder produces
pub const WAV_MIME_TYPE: &str = "audio/wav";

// ============================================================================
// Export Format
// ============================================================================

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFormat {
    /// Bit depth: 16, 24 (integer) or 32 (float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat { bit_depth: 32 }
    }
}

impl ExportFormat {
    /// Create a format with the given bit depth, rejecting unsupported ones
    pub fn new(bit_depth: u16) -> Result<Self> {
        match bit_depth {
            16 | 24 | 32 => Ok(ExportFormat { bit_depth }),
            other => Err(StudioError::InvalidConfig {
                reason: format!("{}-bit export (only 16, 24, 32 supported)", other),
            }),
        }
    }

    fn wav_spec(&self, channels: u16, sample_rate: u32) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: self.bit_depth,
            sample_format: if self.bit_depth == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        }
    }
}

// ============================================================================
// Encoded Media
// ============================================================================

/// A finished, self-contained encoded recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedMedia {
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Nominal duration of the encoded audio in seconds
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Lower-case hex SHA-256 of `bytes`
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl EncodedMedia {
    fn new(bytes: Vec<u8>, duration_secs: f64, sample_rate: u32, channels: u16) -> Self {
        let checksum = format!("{:x}", Sha256::digest(&bytes));
        EncodedMedia {
            mime_type: WAV_MIME_TYPE.to_string(),
            bytes,
            duration_secs,
            sample_rate,
            channels,
            checksum,
            created_at: Utc::now(),
        }
    }

    /// Size of the encoded payload in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the encoded bytes to disk
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Turns encoded bytes into planar float audio
pub trait AudioDecoder: Send {
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer>;
}

/// WAV decoder backed by `hound`
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<AudioBuffer> {
        let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| StudioError::DecodeFailure {
            reason: format!("not a readable WAV stream: {}", e),
            source: Some(Box::new(e)),
        })?;

        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 || spec.sample_rate == 0 {
            return Err(StudioError::DecodeFailure {
                reason: "WAV header declares no channels or a zero sample rate".to_string(),
                source: None,
            });
        }

        let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
        if interleaved.len() < channels {
            return Err(StudioError::DecodeFailure {
                reason: "WAV stream contains no audio frames".to_string(),
                source: None,
            });
        }

        // A truncated final frame is dropped rather than rejected
        let whole = interleaved.len() - interleaved.len() % channels;
        AudioBuffer::from_interleaved(&interleaved[..whole], channels, spec.sample_rate)
    }
}

/// Decode `bytes` and resample the result to `sample_rate`
pub fn decode_to_rate(
    decoder: &dyn AudioDecoder,
    bytes: &[u8],
    sample_rate: u32,
) -> Result<AudioBuffer> {
    let decoded = decoder.decode(bytes)?;
    if decoded.sample_rate() != sample_rate {
        tracing::debug!(
            from = decoded.sample_rate(),
            to = sample_rate,
            "Resampling decoded audio"
        );
        return Ok(decoded.resampled(sample_rate));
    }
    Ok(decoded)
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    fn decode_err(e: hound::Error) -> StudioError {
        StudioError::DecodeFailure {
            reason: format!("failed to read samples: {}", e),
            source: Some(Box::new(e)),
        }
    }

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(decode_err),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                other => {
                    return Err(StudioError::DecodeFailure {
                        reason: format!("{}-bit integer audio is not supported", other),
                        source: None,
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(decode_err)
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Incremental encoder attached to a capture sink
///
/// Blocks are appended as they are rendered; `finish` seals the stream and
/// may be called at most once per `begin`.
pub trait MediaEncoder: Send {
    fn begin(&mut self, channels: u16, sample_rate: u32) -> Result<()>;
    fn write_block(&mut self, block: &AudioBuffer, frames: usize) -> Result<()>;
    fn finish(&mut self) -> Result<EncodedMedia>;
}

/// WAV encoder backed by `hound`
#[derive(Debug, Default)]
pub struct WavEncoder {
    format: ExportFormat,
    channels: u16,
    sample_rate: u32,
    interleaved: Vec<f32>,
    active: bool,
}

impl WavEncoder {
    pub fn new(format: ExportFormat) -> Self {
        WavEncoder {
            format,
            ..Default::default()
        }
    }

    /// Encode a whole buffer in one go
    pub fn encode_buffer(buffer: &AudioBuffer, format: ExportFormat) -> Result<EncodedMedia> {
        let mut encoder = WavEncoder::new(format);
        encoder.begin(buffer.num_channels() as u16, buffer.sample_rate())?;
        encoder.write_block(buffer, buffer.len())?;
        encoder.finish()
    }
}

impl MediaEncoder for WavEncoder {
    fn begin(&mut self, channels: u16, sample_rate: u32) -> Result<()> {
        if channels == 0 || sample_rate == 0 {
            return Err(StudioError::EncodingFailed {
                reason: "encoder needs at least one channel and a non-zero rate".to_string(),
                source: None,
            });
        }
        self.channels = channels;
        self.sample_rate = sample_rate;
        self.interleaved.clear();
        self.active = true;
        Ok(())
    }

    fn write_block(&mut self, block: &AudioBuffer, frames: usize) -> Result<()> {
        if !self.active {
            return Err(StudioError::EncodingFailed {
                reason: "write before begin".to_string(),
                source: None,
            });
        }
        let frames = frames.min(block.len());
        let channels = self.channels as usize;
        self.interleaved.reserve(frames * channels);
        for frame in 0..frames {
            for ch in 0..channels {
                let src = ch.min(block.num_channels().saturating_sub(1));
                self.interleaved
                    .push(block.get_sample(src, frame).unwrap_or(0.0));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<EncodedMedia> {
        if !self.active {
            return Err(StudioError::EncodingFailed {
                reason: "finish called on an idle encoder".to_string(),
                source: None,
            });
        }
        self.active = false;

        fn encode_err(e: hound::Error) -> StudioError {
            StudioError::EncodingFailed {
                reason: e.to_string(),
                source: Some(Box::new(e)),
            }
        }

        let spec = self.format.wav_spec(self.channels, self.sample_rate);
        let mut bytes = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec).map_err(encode_err)?;
            match self.format.bit_depth {
                16 => {
                    for &sample in &self.interleaved {
                        let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        writer.write_sample(scaled).map_err(encode_err)?;
                    }
                }
                24 => {
                    for &sample in &self.interleaved {
                        // 24-bit stored as i32 in hound
                        let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                        writer.write_sample(scaled).map_err(encode_err)?;
                    }
                }
                _ => {
                    for &sample in &self.interleaved {
                        writer.write_sample(sample).map_err(encode_err)?;
                    }
                }
            }
            writer.finalize().map_err(encode_err)?;
        }

        let frames = self.interleaved.len() / self.channels as usize;
        let duration = frames as f64 / self.sample_rate as f64;
        self.interleaved = Vec::new();
        Ok(EncodedMedia::new(bytes, duration, self.sample_rate, self.channels))
    }
}

// ============================================================================
// Test signals
// ============================================================================

/// Generate a mono sine wave
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut buffer = AudioBuffer::new(1, num_samples, sample_rate);

    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    for (i, sample) in buffer.channel_mut(0).iter_mut().enumerate() {
        *sample = (angular_freq * i as f32).sin();
    }

    buffer
}

/// Generate a mono click track
///
/// Each beat is a full-scale rectangular click `click_secs` long, starting
/// on frame 0. Handy for checking tempo detection.
pub fn generate_click_track(
    bpm: f64,
    duration_secs: f64,
    click_secs: f64,
    sample_rate: u32,
) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f64) as usize;
    let mut buffer = AudioBuffer::new(1, num_samples, sample_rate);
    if bpm <= 0.0 {
        return buffer;
    }

    let period = (60.0 / bpm * sample_rate as f64).round() as usize;
    let width = ((click_secs * sample_rate as f64) as usize).max(1);
    let channel = buffer.channel_mut(0);
    let mut start = 0;
    while start < num_samples {
        let end = num_samples.min(start + width);
        channel[start..end].fill(1.0);
        start += period.max(1);
    }
    buffer
}

/// Generate a mono buffer of silence followed by a sine burst
pub fn generate_delayed_tone(
    silence_secs: f64,
    tone_secs: f64,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
) -> AudioBuffer {
    let silent = (silence_secs * sample_rate as f64) as usize;
    let tone = (tone_secs * sample_rate as f64) as usize;
    let mut buffer = AudioBuffer::new(1, silent + tone, sample_rate);
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    for (i, sample) in buffer.channel_mut(0)[silent..].iter_mut().enumerate() {
        *sample = amplitude * (angular_freq * i as f32).sin();
    }
    buffer
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use test_case::test_case;

    #[test]
    fn test_generate_test_tone() {
        let buffer = generate_test_tone(440.0, 1.0, 48000);

        assert_eq!(buffer.len(), 48000);
        assert_eq!(buffer.num_channels(), 1);

        // Half a cycle in, the sine should be back near zero
        let half_cycle = (48000.0 / 440.0 / 2.0) as usize;
        assert!(buffer.channel(0)[half_cycle].abs() < 0.1);
    }

    #[test]
    fn test_click_track_spacing() {
        let clicks = generate_click_track(120.0, 2.0, 0.01, 8000);
        let channel = clicks.channel(0);
        assert_eq!(channel[0], 1.0);
        assert_eq!(channel[79], 1.0);
        assert_eq!(channel[80], 0.0);
        assert_eq!(channel[4000], 1.0);
        assert_eq!(channel[3999], 0.0);
    }

    #[test_case(16 ; "sixteen bit")]
    #[test_case(24 ; "twenty four bit")]
    #[test_case(32 ; "float")]
    fn test_wav_encode_decode(bit_depth: u16) {
        let tone = generate_test_tone(440.0, 0.1, 48000);
        let media = WavEncoder::encode_buffer(&tone, ExportFormat::new(bit_depth).unwrap())
            .unwrap();
        assert_eq!(media.mime_type, WAV_MIME_TYPE);
        assert_abs_diff_eq!(media.duration_secs, 0.1, epsilon = 1e-3);

        let decoded = WavDecoder.decode(&media.bytes).unwrap();
        assert_eq!(decoded.len(), tone.len());
        for (a, b) in decoded.channel(0).iter().zip(tone.channel(0)) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = WavDecoder.decode(b"definitely not audio").unwrap_err();
        assert_eq!(err.error_code(), "DECODE_FAILURE");
    }

    #[test]
    fn test_decode_to_rate_resamples() {
        let tone = generate_test_tone(100.0, 0.5, 16000);
        let media = WavEncoder::encode_buffer(&tone, ExportFormat::default()).unwrap();
        let decoded = decode_to_rate(&WavDecoder, &media.bytes, 48000).unwrap();
        assert_eq!(decoded.sample_rate(), 48000);
        assert_abs_diff_eq!(decoded.duration_secs(), 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_checksum_is_stable() {
        let tone = generate_test_tone(440.0, 0.05, 8000);
        let a = WavEncoder::encode_buffer(&tone, ExportFormat::default()).unwrap();
        let b = WavEncoder::encode_buffer(&tone, ExportFormat::default()).unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 64);
    }

    #[test]
    fn test_encoder_lifecycle_errors() {
        let mut encoder = WavEncoder::new(ExportFormat::default());
        assert!(encoder.finish().is_err());
        assert!(encoder
            .write_block(&AudioBuffer::new(1, 4, 8000), 4)
            .is_err());
        assert!(ExportFormat::new(12).is_err());
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let tone = generate_test_tone(440.0, 0.05, 8000);
        let media = WavEncoder::encode_buffer(&tone, ExportFormat::default()).unwrap();
        media.write_to(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, media.bytes);
    }
}
