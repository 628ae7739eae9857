//! Channel buffer holding both an S16 and a FloatS16 view of the same audio.
//!
//! Exactly one view is authoritative after a write. Each view carries a
//! freshness flag; taking a mutable view refreshes it from the other one if
//! needed and marks the other one stale. Conversions only ever happen inside
//! [`refresh_int`](IfChannelBuffer::refresh_int) and
//! [`refresh_float`](IfChannelBuffer::refresh_float).

use derive_more::Debug;

use crate::audio_util::float_s16_to_s16;
use crate::channel_buffer::ChannelBuffer;

#[derive(Debug)]
pub struct IfChannelBuffer {
    #[debug(skip)]
    ibuf: ChannelBuffer<i16>,
    #[debug(skip)]
    fbuf: ChannelBuffer<f32>,
    int_fresh: bool,
    float_fresh: bool,
}

impl IfChannelBuffer {
    pub fn new(num_frames: usize, num_channels: usize, num_bands: usize) -> Self {
        Self {
            ibuf: ChannelBuffer::new(num_frames, num_channels, num_bands),
            fbuf: ChannelBuffer::new(num_frames, num_channels, num_bands),
            int_fresh: true,
            float_fresh: true,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.fbuf.num_frames()
    }

    pub fn num_frames_per_band(&self) -> usize {
        self.fbuf.num_frames_per_band()
    }

    pub fn num_bands(&self) -> usize {
        self.fbuf.num_bands()
    }

    /// Channel count of the authoritative view.
    pub fn num_channels(&self) -> usize {
        if self.float_fresh {
            self.fbuf.num_channels()
        } else {
            self.ibuf.num_channels()
        }
    }

    pub fn set_num_channels(&mut self, num_channels: usize) {
        self.ibuf.set_num_channels(num_channels);
        self.fbuf.set_num_channels(num_channels);
    }

    pub fn is_int_fresh(&self) -> bool {
        self.int_fresh
    }

    pub fn is_float_fresh(&self) -> bool {
        self.float_fresh
    }

    /// Brings the S16 view up to date with the float view.
    pub fn refresh_int(&mut self) {
        if self.int_fresh {
            return;
        }
        debug_assert!(self.float_fresh);
        let num_channels = self.fbuf.num_channels();
        self.ibuf.set_num_channels(num_channels);
        for ch in 0..num_channels {
            let src = self.fbuf.bands(ch);
            for (d, &s) in self.ibuf.bands_mut(ch).iter_mut().zip(src) {
                *d = float_s16_to_s16(s);
            }
        }
        self.int_fresh = true;
    }

    /// Brings the float view up to date with the S16 view.
    pub fn refresh_float(&mut self) {
        if self.float_fresh {
            return;
        }
        debug_assert!(self.int_fresh);
        let num_channels = self.ibuf.num_channels();
        self.fbuf.set_num_channels(num_channels);
        for ch in 0..num_channels {
            let src = self.ibuf.bands(ch);
            for (d, &s) in self.fbuf.bands_mut(ch).iter_mut().zip(src) {
                *d = f32::from(s);
            }
        }
        self.float_fresh = true;
    }

    /// Writable S16 view. The float view becomes stale.
    pub fn ibuf(&mut self) -> &mut ChannelBuffer<i16> {
        self.refresh_int();
        self.float_fresh = false;
        &mut self.ibuf
    }

    /// Writable float view. The S16 view becomes stale.
    pub fn fbuf(&mut self) -> &mut ChannelBuffer<f32> {
        self.refresh_float();
        self.int_fresh = false;
        &mut self.fbuf
    }

    /// Read-only S16 view, refreshed first.
    pub fn ibuf_const(&mut self) -> &ChannelBuffer<i16> {
        self.refresh_int();
        &self.ibuf
    }

    /// Read-only float view, refreshed first.
    pub fn fbuf_const(&mut self) -> &ChannelBuffer<f32> {
        self.refresh_float();
        &self.fbuf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_write_invalidates_int() {
        let mut buf = IfChannelBuffer::new(4, 1, 1);
        buf.fbuf()
            .bands_mut(0)
            .copy_from_slice(&[1.4, -2.6, 40000.0, 0.5]);
        assert!(!buf.is_int_fresh());
        assert_eq!(buf.ibuf_const().bands(0), &[1, -3, 32767, 1]);
        assert!(buf.is_int_fresh());
        assert!(buf.is_float_fresh());
    }

    #[test]
    fn int_write_invalidates_float() {
        let mut buf = IfChannelBuffer::new(2, 2, 1);
        buf.ibuf().bands_mut(1).copy_from_slice(&[-7, 9]);
        assert!(!buf.is_float_fresh());
        assert_eq!(buf.fbuf_const().bands(1), &[-7.0, 9.0]);
    }

    #[test]
    fn channel_count_follows_authoritative_view() {
        let mut buf = IfChannelBuffer::new(2, 3, 1);
        buf.fbuf().set_num_channels(1);
        assert_eq!(buf.num_channels(), 1);
        assert_eq!(buf.ibuf_const().num_channels(), 1);
        buf.set_num_channels(3);
        assert_eq!(buf.num_channels(), 3);
    }

    #[test]
    fn repeated_reads_do_not_reconvert() {
        let mut buf = IfChannelBuffer::new(1, 1, 1);
        buf.ibuf().bands_mut(0)[0] = 12;
        let _ = buf.fbuf_const();
        // Both fresh now; a write through the int view must flip only float.
        buf.ibuf().bands_mut(0)[0] = 13;
        assert!(buf.is_int_fresh());
        assert!(!buf.is_float_fresh());
        assert_eq!(buf.fbuf_const().bands(0), &[13.0]);
    }
}
