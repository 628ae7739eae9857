//! The uniform surface every capture-side stage exposes to the processor.

use crate::error::Error;

/// Stream shape a stage is (re)built for. Derived from the active
/// [`ProcessingConfig`](crate::ProcessingConfig) on every reinitialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StageFormat {
    /// Full-band processing rate of the capture path.
    pub(crate) sample_rate_hz: usize,
    /// Rate of the lowest band: 16 kHz for 32 and 48 kHz streams, otherwise
    /// the processing rate.
    pub(crate) split_rate_hz: usize,
    /// Capture channels the stages see, 1 once beamforming collapsed them.
    pub(crate) num_proc_channels: usize,
    pub(crate) num_output_channels: usize,
    pub(crate) num_reverse_channels: usize,
}

impl Default for StageFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16000,
            split_rate_hz: 16000,
            num_proc_channels: 1,
            num_output_channels: 1,
            num_reverse_channels: 1,
        }
    }
}

impl StageFormat {
    /// Samples per channel in one 10 ms full-band chunk.
    pub(crate) fn num_frames(&self) -> usize {
        self.sample_rate_hz / 100
    }

    /// Samples per channel in one 10 ms chunk of a single band.
    pub(crate) fn num_frames_per_band(&self) -> usize {
        self.split_rate_hz / 100
    }

    pub(crate) fn num_bands(&self) -> usize {
        self.sample_rate_hz / self.split_rate_hz
    }
}

/// Lifecycle shared by the capture-side stages.
///
/// Processing itself is stage specific (stages differ in which view of the
/// [`AudioBuffer`](crate::audio_buffer::AudioBuffer) they read and in what
/// they return), so it lives in inherent methods.
pub(crate) trait ProcessingComponent {
    /// Rebuilds per-channel state for `format`. Settings survive.
    fn initialize(&mut self, format: &StageFormat);

    fn is_enabled(&self) -> bool;

    /// Switches the stage on or off. Turning a stage on starts it from a
    /// clean state.
    fn enable(&mut self, enable: bool) -> Result<(), Error>;
}
