//! Mix Renderer
//!
//! Bounces the current session offline: schedules the backing track and the
//! vocal the same way playback does, attaches an encoder to the master
//! capture sink and pumps the render context block by block until the
//! content plus a tail margin has been captured.

use std::sync::Arc;

use tracing::{debug, info};

use crate::analysis::PlaybackPlan;
use crate::dsp::BUS_CHANNELS;
use crate::engine::context::{RenderContext, SourceTarget};
use crate::engine::io::{EncodedMedia, ExportFormat, MediaEncoder, WavEncoder};
use crate::engine::AudioBuffer;
use crate::error::{Result, StudioError};

/// Length of the bounce for the given sources, before the tail margin
pub fn content_duration(beat: Option<&AudioBuffer>, vocal: Option<&AudioBuffer>) -> f64 {
    let beat = beat.map(AudioBuffer::duration_secs).unwrap_or(0.0);
    let vocal = vocal.map(AudioBuffer::duration_secs).unwrap_or(0.0);
    beat.max(vocal)
}

/// Offline bounce of the session mix
#[derive(Debug, Clone, Copy)]
pub struct MixRenderer {
    format: ExportFormat,
    tail_margin_secs: f64,
    block_size: usize,
}

impl MixRenderer {
    pub fn new(format: ExportFormat, tail_margin_secs: f64, block_size: usize) -> Self {
        Self {
            format,
            tail_margin_secs: tail_margin_secs.max(0.0),
            block_size: block_size.max(1),
        }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Frames captured for a bounce of `content_secs`
    pub fn deadline_frames(&self, content_secs: f64, sample_rate: u32) -> u64 {
        ((content_secs + self.tail_margin_secs) * sample_rate as f64).round() as u64
    }

    /// Bounce `beat` and `vocal` following `plan`
    ///
    /// Start times in `plan` are context times; capture starts at the
    /// current clock. Any playback already scheduled on the context is
    /// stopped first, and the graph's filter and reverb state is cleared so
    /// repeated bounces render identically.
    ///
    /// # Returns
    /// The encoded master, force-finished at the deadline.
    pub fn render(
        &self,
        ctx: &mut RenderContext,
        beat: Option<&Arc<AudioBuffer>>,
        vocal: Option<&Arc<AudioBuffer>>,
        plan: &PlaybackPlan,
    ) -> Result<EncodedMedia> {
        let content = content_duration(beat.map(|b| b.as_ref()), vocal.map(|v| v.as_ref()));
        if content <= 0.0 {
            return Err(StudioError::NothingToExport);
        }

        ctx.stop_all();
        ctx.graph_mut().reset();

        if let Some(beat) = beat {
            ctx.schedule(SourceTarget::Beat, Arc::clone(beat), plan.beat_start, 0.0);
        }
        if let Some(vocal) = vocal {
            ctx.schedule(
                SourceTarget::Vocal,
                Arc::clone(vocal),
                plan.vocal_start,
                plan.vocal_offset,
            );
        }

        let sample_rate = ctx.sample_rate();
        let mut encoder = WavEncoder::new(self.format);
        encoder.begin(BUS_CHANNELS as u16, sample_rate)?;
        ctx.attach_capture_sink(Box::new(encoder));

        let deadline = self.deadline_frames(content, sample_rate);
        info!(
            content_secs = content,
            deadline_frames = deadline,
            "Rendering mix"
        );

        let pumped = self.pump(ctx, deadline);
        let sink = ctx.detach_capture_sink();
        ctx.stop_all();
        // Completion signals of the bounce sources are not playback events
        let _ = ctx.drain_events();
        pumped?;

        let mut sink = sink.ok_or_else(|| StudioError::EncodingFailed {
            reason: "capture sink was detached during rendering".to_string(),
            source: None,
        })?;
        let media = sink.finish()?;
        info!(
            bytes = media.len(),
            duration = media.duration_secs,
            checksum = %media.checksum,
            "Mix rendered"
        );
        Ok(media)
    }

    fn pump(&self, ctx: &mut RenderContext, deadline: u64) -> Result<()> {
        let mut block = AudioBuffer::new(BUS_CHANNELS, self.block_size, ctx.sample_rate());
        let mut rendered = 0u64;
        while rendered < deadline {
            let frames = (deadline - rendered).min(self.block_size as u64) as usize;
            if block.len() != frames {
                block.resize(frames);
            }
            ctx.render_block(&mut block)?;
            rendered += frames as u64;
        }
        debug!(rendered, "Capture deadline reached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AlignmentInputs, AlignmentPlanner};
    use crate::capture::PollingBackend;
    use crate::dsp::{EffectParameters, ImpulseGenerator, SignalGraph};
    use crate::engine::io::{AudioDecoder, WavDecoder};
    use approx::assert_relative_eq;

    const RATE: u32 = 8000;

    fn context() -> RenderContext {
        let mut params = EffectParameters::default();
        params.reverb.duration = 0.5;
        let graph = SignalGraph::new(RATE, 128, params, ImpulseGenerator::seeded(9), 128);
        RenderContext::new(graph, Box::new(PollingBackend::default()))
    }

    fn tone(secs: f64) -> Arc<AudioBuffer> {
        let frames = (secs * RATE as f64) as usize;
        let data = (0..frames)
            .map(|i| (i as f32 * 0.05).sin() * 0.3)
            .collect();
        Arc::new(AudioBuffer::from_channels(vec![data], RATE).unwrap())
    }

    fn plan(start: f64) -> PlaybackPlan {
        AlignmentPlanner::new().plan(&AlignmentInputs::default(), start)
    }

    #[test]
    fn test_content_duration_is_longest_source() {
        let beat = tone(1.0);
        let vocal = tone(0.25);
        assert_relative_eq!(content_duration(Some(&beat), Some(&vocal)), 1.0);
        assert_relative_eq!(content_duration(None, Some(&vocal)), 0.25);
        assert_eq!(content_duration(None, None), 0.0);
    }

    #[test]
    fn test_nothing_to_export() {
        let mut ctx = context();
        let renderer = MixRenderer::new(ExportFormat::default(), 0.6, 128);
        let err = renderer.render(&mut ctx, None, None, &plan(0.1)).unwrap_err();
        assert!(matches!(err, StudioError::NothingToExport));
        assert_eq!(ctx.clock(), 0);
    }

    #[test]
    fn test_bounce_length_is_content_plus_tail() {
        let mut ctx = context();
        let renderer = MixRenderer::new(ExportFormat::default(), 0.6, 128);
        let beat = tone(0.5);
        let media = renderer.render(&mut ctx, Some(&beat), None, &plan(0.1)).unwrap();

        assert_eq!(media.mime_type, "audio/wav");
        assert_eq!(media.channels, 2);
        assert_relative_eq!(media.duration_secs, 1.1, epsilon = 1e-9);
        assert_eq!(ctx.clock(), renderer.deadline_frames(0.5, RATE));
        assert_eq!(ctx.active_sources(), 0);

        let decoded = WavDecoder.decode(&media.bytes).unwrap();
        assert_eq!(decoded.len(), 8800);
        assert!(decoded.peak() > 0.0);
        // Lead-in is silent
        assert_eq!(decoded.channel(0)[..800].iter().fold(0.0f32, |m, s| m.max(s.abs())), 0.0);
    }

    #[test]
    fn test_repeated_bounces_are_identical() {
        let mut ctx = context();
        let renderer = MixRenderer::new(ExportFormat::default(), 0.2, 128);
        let beat = tone(0.3);
        let vocal = tone(0.2);
        let start = ctx.current_time() + 0.1;
        let first = renderer
            .render(&mut ctx, Some(&beat), Some(&vocal), &plan(start))
            .unwrap();
        let start = ctx.current_time() + 0.1;
        let second = renderer
            .render(&mut ctx, Some(&beat), Some(&vocal), &plan(start))
            .unwrap();
        assert_eq!(first.checksum, second.checksum);
    }
}
