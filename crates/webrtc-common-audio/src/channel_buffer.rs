//! Deinterleaved, optionally band-split sample storage.
//!
//! One contiguous allocation holds every channel; inside a channel the bands
//! follow each other:
//!
//! ```text
//! [ ch0: band0 | band1 | band2 ][ ch1: band0 | band1 | band2 ]
//! ```
//!
//! Stages that work per band (echo control, gain control) ask for
//! `channel(band, ch)`, stages that work per channel ask for `bands(ch)`.

use derive_more::Debug;

/// Multi-channel audio storage with `num_bands` equally sized bands per
/// channel.
#[derive(Debug, Clone)]
pub struct ChannelBuffer<T> {
    #[debug(skip)]
    data: Vec<T>,
    num_frames: usize,
    num_frames_per_band: usize,
    num_allocated_channels: usize,
    num_channels: usize,
    num_bands: usize,
}

impl<T: Copy + Default> ChannelBuffer<T> {
    /// Allocates a zeroed buffer. `num_frames` must split evenly into
    /// `num_bands`.
    pub fn new(num_frames: usize, num_channels: usize, num_bands: usize) -> Self {
        assert!(num_bands > 0, "num_bands must be > 0");
        assert!(num_channels > 0, "num_channels must be > 0");
        assert!(
            num_frames.is_multiple_of(num_bands),
            "num_frames ({num_frames}) must be divisible by num_bands ({num_bands})"
        );
        Self {
            data: vec![T::default(); num_frames * num_channels],
            num_frames,
            num_frames_per_band: num_frames / num_bands,
            num_allocated_channels: num_channels,
            num_channels,
            num_bands,
        }
    }

    pub fn new_single_band(num_frames: usize, num_channels: usize) -> Self {
        Self::new(num_frames, num_channels, 1)
    }

    /// Zeroes every allocated sample.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }
}

impl<T> ChannelBuffer<T> {
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    #[inline]
    pub fn num_frames_per_band(&self) -> usize {
        self.num_frames_per_band
    }

    /// Channels currently in use. Can be lower than the allocation after
    /// [`set_num_channels`](Self::set_num_channels).
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    #[inline]
    pub fn num_allocated_channels(&self) -> usize {
        self.num_allocated_channels
    }

    #[inline]
    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    /// Narrows or widens the visible channel count without reallocating.
    pub fn set_num_channels(&mut self, num_channels: usize) {
        assert!(
            num_channels <= self.num_allocated_channels,
            "num_channels ({num_channels}) exceeds allocated ({})",
            self.num_allocated_channels
        );
        self.num_channels = num_channels;
    }

    #[inline]
    fn band_start(&self, band: usize, channel: usize) -> usize {
        debug_assert!(band < self.num_bands);
        debug_assert!(channel < self.num_allocated_channels);
        channel * self.num_frames + band * self.num_frames_per_band
    }

    /// One band of one channel.
    #[inline]
    pub fn channel(&self, band: usize, channel: usize) -> &[T] {
        let start = self.band_start(band, channel);
        &self.data[start..start + self.num_frames_per_band]
    }

    #[inline]
    pub fn channel_mut(&mut self, band: usize, channel: usize) -> &mut [T] {
        let start = self.band_start(band, channel);
        &mut self.data[start..start + self.num_frames_per_band]
    }

    /// All bands of `channel`, concatenated.
    #[inline]
    pub fn bands(&self, channel: usize) -> &[T] {
        let start = self.band_start(0, channel);
        &self.data[start..start + self.num_frames]
    }

    #[inline]
    pub fn bands_mut(&mut self, channel: usize) -> &mut [T] {
        let start = self.band_start(0, channel);
        &mut self.data[start..start + self.num_frames]
    }

    /// Per-band mutable views of one channel, so several bands can be
    /// written in the same pass.
    pub fn split_bands_mut(&mut self, channel: usize) -> Vec<&mut [T]> {
        let per_band = self.num_frames_per_band;
        self.bands_mut(channel).chunks_exact_mut(per_band).collect()
    }

    /// Band `band` of every visible channel.
    pub fn band_channels(&self, band: usize) -> Vec<&[T]> {
        (0..self.num_channels)
            .map(|ch| self.channel(band, ch))
            .collect()
    }

    /// Full-band views of every visible channel.
    pub fn channels(&self) -> Vec<&[T]> {
        (0..self.num_channels).map(|ch| self.bands(ch)).collect()
    }

    /// Mutable full-band views of every visible channel.
    pub fn channels_mut(&mut self) -> Vec<&mut [T]> {
        let frames = self.num_frames;
        let visible = self.num_channels;
        self.data
            .chunks_exact_mut(frames)
            .take(visible)
            .collect()
    }
}

impl<T: Copy> ChannelBuffer<T> {
    /// Copies the visible channels of `other`, which must have the same
    /// shape.
    pub fn copy_from(&mut self, other: &Self) {
        assert_eq!(self.num_frames, other.num_frames, "frame count mismatch");
        assert_eq!(self.num_bands, other.num_bands, "band count mismatch");
        self.set_num_channels(other.num_channels);
        for ch in 0..other.num_channels {
            self.bands_mut(ch).copy_from_slice(other.bands(ch));
        }
    }
}
