//! Descriptions of the four audio streams the processor sees.

/// Rate, channel count and keyboard-channel presence of one stream.
///
/// `num_frames` is derived: one 10 ms chunk at `sample_rate_hz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamConfig {
    sample_rate_hz: usize,
    num_channels: usize,
    has_keyboard: bool,
    num_frames: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(16000, 1)
    }
}

impl StreamConfig {
    pub fn new(sample_rate_hz: usize, num_channels: usize) -> Self {
        Self::with_keyboard(sample_rate_hz, num_channels, false)
    }

    /// A stream that carries one extra keyboard-microphone channel after its
    /// `num_channels` audio channels.
    pub fn with_keyboard(sample_rate_hz: usize, num_channels: usize, has_keyboard: bool) -> Self {
        Self {
            sample_rate_hz,
            num_channels,
            has_keyboard,
            num_frames: sample_rate_hz / 100,
        }
    }

    #[inline]
    pub fn sample_rate_hz(&self) -> usize {
        self.sample_rate_hz
    }

    /// Audio channels, not counting the keyboard channel.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    #[inline]
    pub fn has_keyboard(&self) -> bool {
        self.has_keyboard
    }

    /// Frames per 10 ms chunk.
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_channels * self.num_frames
    }

    /// Channel slices a caller must pass, keyboard channel included.
    #[inline]
    pub(crate) fn num_buffer_channels(&self) -> usize {
        self.num_channels + usize::from(self.has_keyboard)
    }
}

/// Channel arrangement for the layout-based entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    MonoAndKeyboard,
    Stereo,
    StereoAndKeyboard,
}

impl ChannelLayout {
    pub fn num_channels(self) -> usize {
        match self {
            Self::Mono | Self::MonoAndKeyboard => 1,
            Self::Stereo | Self::StereoAndKeyboard => 2,
        }
    }

    pub fn has_keyboard(self) -> bool {
        matches!(self, Self::MonoAndKeyboard | Self::StereoAndKeyboard)
    }

    pub fn stream_config(self, sample_rate_hz: usize) -> StreamConfig {
        StreamConfig::with_keyboard(sample_rate_hz, self.num_channels(), self.has_keyboard())
    }
}

/// Index into [`ProcessingConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Input = 0,
    Output = 1,
    ReverseInput = 2,
    ReverseOutput = 3,
}

/// The input, output, reverse-input and reverse-output stream formats.
///
/// Whenever the active value differs from the one a call implies, the
/// processor re-derives its internal formats and buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessingConfig {
    streams: [StreamConfig; 4],
}

impl ProcessingConfig {
    pub fn new(
        input: StreamConfig,
        output: StreamConfig,
        reverse_input: StreamConfig,
        reverse_output: StreamConfig,
    ) -> Self {
        Self {
            streams: [input, output, reverse_input, reverse_output],
        }
    }

    pub fn stream(&self, name: StreamName) -> &StreamConfig {
        &self.streams[name as usize]
    }

    pub fn stream_mut(&mut self, name: StreamName) -> &mut StreamConfig {
        &mut self.streams[name as usize]
    }

    pub fn streams(&self) -> &[StreamConfig; 4] {
        &self.streams
    }

    pub fn input_stream(&self) -> &StreamConfig {
        self.stream(StreamName::Input)
    }

    pub fn output_stream(&self) -> &StreamConfig {
        self.stream(StreamName::Output)
    }

    pub fn reverse_input_stream(&self) -> &StreamConfig {
        self.stream(StreamName::ReverseInput)
    }

    pub fn reverse_output_stream(&self) -> &StreamConfig {
        self.stream(StreamName::ReverseOutput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_follow_rate() {
        let c = StreamConfig::new(48000, 2);
        assert_eq!(c.num_frames(), 480);
        assert_eq!(c.num_samples(), 960);
        assert_eq!(c.num_buffer_channels(), 2);
    }

    #[test]
    fn keyboard_is_part_of_equality() {
        assert_ne!(
            StreamConfig::new(16000, 1),
            StreamConfig::with_keyboard(16000, 1, true)
        );
        assert_eq!(
            ChannelLayout::StereoAndKeyboard
                .stream_config(32000)
                .num_buffer_channels(),
            3
        );
    }

    #[test]
    fn processing_config_compares_every_stream() {
        let a = ProcessingConfig::default();
        let mut b = a;
        assert_eq!(a, b);
        *b.stream_mut(StreamName::ReverseOutput) = StreamConfig::new(8000, 1);
        assert_ne!(a, b);
        assert_eq!(b.reverse_output_stream().sample_rate_hz(), 8000);
    }
}
