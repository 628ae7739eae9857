//! Interleaved 16-bit frame used by the integer entry points.

/// Voice activity flag carried alongside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadActivity {
    Active,
    Passive,
    #[default]
    Unknown,
}

/// Interleaved S16 samples for one chunk of audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<i16>,
    samples_per_channel: usize,
    sample_rate_hz: usize,
    num_channels: usize,
    /// Written back by the capture path when voice detection runs.
    pub vad_activity: VadActivity,
}

impl AudioFrame {
    /// A silent 10 ms frame.
    pub fn new(sample_rate_hz: usize, num_channels: usize) -> Self {
        let samples_per_channel = sample_rate_hz / 100;
        Self {
            data: vec![0; samples_per_channel * num_channels],
            samples_per_channel,
            sample_rate_hz,
            num_channels,
            vad_activity: VadActivity::Unknown,
        }
    }

    /// Wraps interleaved samples. A trailing partial sample group is
    /// dropped.
    pub fn from_interleaved(sample_rate_hz: usize, num_channels: usize, mut data: Vec<i16>) -> Self {
        assert!(num_channels > 0, "a frame needs at least one channel");
        let samples_per_channel = data.len() / num_channels;
        data.truncate(samples_per_channel * num_channels);
        Self {
            data,
            samples_per_channel,
            sample_rate_hz,
            num_channels,
            vad_activity: VadActivity::Unknown,
        }
    }

    pub fn sample_rate_hz(&self) -> usize {
        self.sample_rate_hz
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    pub fn data(&self) -> &[i16] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [i16] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frame_is_ten_ms_of_silence() {
        let frame = AudioFrame::new(32000, 2);
        assert_eq!(frame.samples_per_channel(), 320);
        assert_eq!(frame.data().len(), 640);
        assert!(frame.data().iter().all(|&s| s == 0));
        assert_eq!(frame.vad_activity, VadActivity::Unknown);
    }

    #[test]
    fn from_interleaved_drops_partial_group() {
        let frame = AudioFrame::from_interleaved(16000, 2, vec![1, 2, 3, 4, 5]);
        assert_eq!(frame.samples_per_channel(), 2);
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
    }
}
