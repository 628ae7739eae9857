//! Remixing and resampling between two chunk formats.
//!
//! Both sides hold the same duration of audio, so the frame counts stand in
//! for the sample rates. Remixing only goes to or from mono.

use webrtc_common_audio::audio_util;
use webrtc_common_audio::channel_buffer::ChannelBuffer;
use webrtc_common_audio::push_resampler::PushResampler;

#[derive(Debug)]
pub(crate) struct AudioConverter {
    src_channels: usize,
    src_frames: usize,
    dst_channels: usize,
    dst_frames: usize,
    // Empty when the frame counts match.
    resamplers: Vec<PushResampler<f32>>,
    staging: ChannelBuffer<f32>,
}

impl AudioConverter {
    pub(crate) fn new(
        src_channels: usize,
        src_frames: usize,
        dst_channels: usize,
        dst_frames: usize,
    ) -> Self {
        assert!(
            src_channels == dst_channels || src_channels == 1 || dst_channels == 1,
            "cannot remix {src_channels} channels into {dst_channels}"
        );
        let mid_channels = src_channels.min(dst_channels);
        let resamplers = if src_frames == dst_frames {
            Vec::new()
        } else {
            (0..mid_channels)
                .map(|_| PushResampler::new(src_frames, dst_frames))
                .collect()
        };
        Self {
            src_channels,
            src_frames,
            dst_channels,
            dst_frames,
            resamplers,
            staging: ChannelBuffer::new(src_frames, mid_channels, 1),
        }
    }

    /// Converts one chunk. Downmixing happens before resampling and
    /// upmixing after it, so the resamplers always run on the smaller
    /// channel count.
    pub(crate) fn convert(&mut self, src: &[&[f32]], dst: &mut [&mut [f32]]) {
        assert!(src.len() >= self.src_channels, "too few source channels");
        assert!(dst.len() >= self.dst_channels, "too few destination channels");
        let mid_channels = self.staging.num_channels();

        if self.src_channels > self.dst_channels {
            audio_util::downmix_to_mono_f32(&src[..self.src_channels], self.staging.bands_mut(0));
        } else {
            for ch in 0..mid_channels {
                self.staging
                    .bands_mut(ch)
                    .copy_from_slice(&src[ch][..self.src_frames]);
            }
        }

        for ch in 0..mid_channels {
            let out = &mut dst[ch][..self.dst_frames];
            match self.resamplers.get_mut(ch) {
                Some(resampler) => {
                    resampler.resample(self.staging.bands(ch), out);
                }
                None => out.copy_from_slice(self.staging.bands(ch)),
            }
        }

        if let Some((first, rest)) = dst[..self.dst_channels].split_first_mut() {
            for out in rest.iter_mut().skip(mid_channels - 1) {
                out[..self.dst_frames].copy_from_slice(&first[..self.dst_frames]);
            }
        }
    }

    pub(crate) fn src_channels(&self) -> usize {
        self.src_channels
    }

    pub(crate) fn dst_channels(&self) -> usize {
        self.dst_channels
    }

    pub(crate) fn dst_frames(&self) -> usize {
        self.dst_frames
    }
}
