//! Single-channel streaming resampler for fixed-size 10 ms blocks.
//!
//! Each call converts one block of `src_frames` samples into `dst_frames`
//! samples by linear interpolation. The last input sample of a block is kept
//! as history so consecutive blocks join without a discontinuity; the price
//! is a constant delay of one input sample.
//!
//! ```
//! use webrtc_common_audio::push_resampler::PushResampler;
//!
//! // 48 kHz to 16 kHz.
//! let mut resampler = PushResampler::<f32>::new(480, 160);
//! let input = vec![0.25_f32; 480];
//! let mut output = vec![0.0_f32; 160];
//! assert_eq!(resampler.resample(&input, &mut output), 160);
//! ```

use std::marker::PhantomData;

use derive_more::Debug;

use crate::audio_util::float_s16_to_s16;

/// Sample types the resampler accepts.
pub trait Sample: Copy + Default + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Sample for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Sample for i16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        float_s16_to_s16(v)
    }
}

#[derive(Debug)]
pub struct PushResampler<T: Sample> {
    src_frames: usize,
    dst_frames: usize,
    history: f32,
    #[debug(skip)]
    _sample: PhantomData<T>,
}

impl<T: Sample> PushResampler<T> {
    pub fn new(src_frames: usize, dst_frames: usize) -> Self {
        assert!(src_frames > 0, "src_frames must be > 0");
        assert!(dst_frames > 0, "dst_frames must be > 0");
        Self {
            src_frames,
            dst_frames,
            history: 0.0,
            _sample: PhantomData,
        }
    }

    pub fn src_frames(&self) -> usize {
        self.src_frames
    }

    pub fn dst_frames(&self) -> usize {
        self.dst_frames
    }

    /// Resamples one block and returns the number of samples written.
    pub fn resample(&mut self, src: &[T], dst: &mut [T]) -> usize {
        assert_eq!(src.len(), self.src_frames, "source length mismatch");
        assert!(dst.len() >= self.dst_frames, "destination too short");

        if self.src_frames == self.dst_frames {
            dst[..self.dst_frames].copy_from_slice(src);
            self.history = src[self.src_frames - 1].to_f32();
            return self.dst_frames;
        }

        let at = |i: isize| -> f32 {
            if i < 0 {
                self.history
            } else {
                src[i as usize].to_f32()
            }
        };
        let (src_frames, dst_frames) = (self.src_frames as i64, self.dst_frames as i64);
        for (k, out) in dst.iter_mut().take(self.dst_frames).enumerate() {
            // Output k sits at input position (k + 1) * src / dst - 1, kept as
            // an exact fraction over dst so the last output lands on the last
            // input. Position -1 is the previous block's last sample.
            let num = (k as i64 + 1) * src_frames - dst_frames;
            let i = num.div_euclid(dst_frames) as isize;
            let rem = num.rem_euclid(dst_frames);
            let a = at(i);
            let frac = rem as f32 / dst_frames as f32;
            let b = if rem > 0 { at(i + 1) } else { a };
            *out = T::from_f32(a + (b - a) * frac);
        }
        self.history = src[self.src_frames - 1].to_f32();
        self.dst_frames
    }
}
