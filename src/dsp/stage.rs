//! Stage trait definition
//!
//! Every node of the signal graph is a `Stage`: it owns its state and
//! processes one block of planar audio in place.

use crate::engine::AudioBuffer;

/// Base trait for all processing stages
///
/// `prepare` is the only place a stage may allocate. After it has run for a
/// given sample rate and block size, `process` must not allocate for blocks
/// up to that size.
pub trait Stage: Send {
    /// Process audio buffer in-place
    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Prepare the stage for processing
    ///
    /// Called when the render context is created or its rate changes.
    fn prepare(&mut self, sample_rate: u32, max_block_size: usize);

    /// Clear filter history, delay lines and convolution tails
    fn reset(&mut self);

    /// Short identifier used in logs
    fn stage_type(&self) -> &'static str;

    /// Frames of delay this stage adds to its input
    fn latency_frames(&self) -> usize {
        0
    }
}

/// Helper macro for stages that only scale their input
#[macro_export]
macro_rules! impl_stateless_stage {
    ($stage_type:expr) => {
        fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

        fn reset(&mut self) {}

        fn stage_type(&self) -> &'static str {
            $stage_type
        }
    };
}
