//! Feedback delay send
//!
//! Send gain into a circular delay line whose output is fed back into its
//! own input, followed by a wet return gain. Only the wet signal leaves the
//! stage; the dry vocal reaches the master through its own path.

use crate::dsp::params::{DelaySettings, DELAY_TIME_RANGE_SECS};
use crate::dsp::stage::Stage;
use crate::engine::AudioBuffer;

/// Feedback delay line with send and return gains
#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    settings: DelaySettings,
    sample_rate: u32,
    /// Circular buffer per channel
    lines: Vec<Vec<f32>>,
    write_pos: usize,
    delay_frames: usize,
}

impl FeedbackDelay {
    pub fn new(settings: DelaySettings) -> Self {
        let mut delay = Self {
            settings,
            sample_rate: crate::engine::buffer::DEFAULT_SAMPLE_RATE,
            lines: Vec::new(),
            write_pos: 0,
            delay_frames: 1,
        };
        delay.update_delay_frames();
        delay
    }

    pub fn settings(&self) -> &DelaySettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: DelaySettings) {
        self.settings = settings;
        self.update_delay_frames();
    }

    /// Delay in frames; a feedback loop needs at least one frame
    pub fn delay_frames(&self) -> usize {
        self.delay_frames
    }

    fn line_len(&self) -> usize {
        (DELAY_TIME_RANGE_SECS.1 as f64 * self.sample_rate as f64).ceil() as usize + 1
    }

    fn update_delay_frames(&mut self) {
        let frames = (self.settings.time as f64 * self.sample_rate as f64).round() as usize;
        self.delay_frames = frames.clamp(1, self.line_len() - 1);
    }
}

impl Default for FeedbackDelay {
    fn default() -> Self {
        Self::new(DelaySettings::default())
    }
}

impl Stage for FeedbackDelay {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        let channels = buffer.num_channels();
        if self.lines.len() < channels {
            let len = self.line_len();
            self.lines.resize(channels, vec![0.0; len]);
        }

        let send = self.settings.input_gain();
        let wet = self.settings.wet_gain();
        let feedback = self.settings.feedback;
        let start = self.write_pos;
        let mut write_pos = start;

        for (ch, line) in self.lines.iter_mut().enumerate().take(channels) {
            let len = line.len();
            write_pos = start;
            for sample in buffer.channel_mut(ch).iter_mut() {
                let read_pos = (write_pos + len - self.delay_frames) % len;
                let delayed = line[read_pos];
                line[write_pos] = *sample * send + delayed * feedback;
                *sample = delayed * wet;
                write_pos = (write_pos + 1) % len;
            }
        }
        self.write_pos = write_pos;
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        let len = self.line_len();
        self.lines = vec![vec![0.0; len]; 2];
        self.write_pos = 0;
        self.update_delay_frames();
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.write_pos = 0;
    }

    fn stage_type(&self) -> &'static str {
        "delay"
    }

    fn latency_frames(&self) -> usize {
        self.delay_frames
    }
}

// ============================================================================
// Tests
// ============================================================================
