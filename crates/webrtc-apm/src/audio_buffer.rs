//! Per-stream working buffer of the processing pipeline.
//!
//! Audio enters at the stream rate, is downmixed and resampled into a
//! full-band [`IfChannelBuffer`] at the processing rate and, for 32 and
//! 48 kHz, split into 16 kHz-wide bands. Stages read and write whichever
//! sample format they run in; the buffer only converts when a stale view is
//! asked for.

use webrtc_common_audio::audio_util::{
    self, float_s16_to_float, float_s16_to_s16, float_to_float_s16,
};
use webrtc_common_audio::channel_buffer::ChannelBuffer;
use webrtc_common_audio::if_channel_buffer::IfChannelBuffer;
use webrtc_common_audio::push_resampler::PushResampler;

use crate::audio_frame::{AudioFrame, VadActivity};
use crate::splitting_filter::SplittingFilter;
use crate::stream_config::StreamConfig;

/// Index of the 0-8 kHz band.
pub(crate) const LOW_BAND: usize = 0;

fn num_bands_for(num_frames: usize) -> usize {
    match num_frames {
        320 => 2,
        480 => 3,
        _ => 1,
    }
}

fn grow_resamplers(
    resamplers: &mut Vec<PushResampler<f32>>,
    count: usize,
    src_frames: usize,
    dst_frames: usize,
) {
    while resamplers.len() < count {
        resamplers.push(PushResampler::new(src_frames, dst_frames));
    }
}

#[derive(Debug)]
pub(crate) struct AudioBuffer {
    input_num_frames: usize,
    num_input_channels: usize,
    proc_num_frames: usize,
    num_proc_channels: usize,
    output_num_frames: usize,

    num_channels: usize,
    num_bands: usize,
    num_split_frames: usize,

    data: IfChannelBuffer,
    split_data: Option<IfChannelBuffer>,
    splitting_filter: Option<SplittingFilter>,

    // Created on the first frame that needs them.
    input_resamplers: Vec<PushResampler<f32>>,
    output_resamplers: Vec<PushResampler<f32>>,
    input_scratch: Vec<f32>,
    input_s16: Vec<i16>,
    output_scratch: Vec<f32>,
    output_s16: ChannelBuffer<i16>,

    mixed_low_pass: Vec<i16>,
    mixed_low_pass_valid: bool,
    low_pass_reference: ChannelBuffer<i16>,
    reference_copied: bool,
    keyboard: Vec<f32>,
    has_keyboard_data: bool,
    activity: VadActivity,
}

impl AudioBuffer {
    /// Frame counts are per 10 ms chunk. `num_proc_channels` must be 1 or
    /// equal to `num_input_channels`.
    pub(crate) fn new(
        input_num_frames: usize,
        num_input_channels: usize,
        proc_num_frames: usize,
        num_proc_channels: usize,
        output_num_frames: usize,
    ) -> Self {
        assert!(input_num_frames > 0 && proc_num_frames > 0 && output_num_frames > 0);
        assert!(num_input_channels > 0 && num_proc_channels > 0);
        assert!(
            num_proc_channels == 1 || num_proc_channels == num_input_channels,
            "cannot map {num_input_channels} input channels onto {num_proc_channels}"
        );

        let num_bands = num_bands_for(proc_num_frames);
        let num_split_frames = proc_num_frames / num_bands;
        let (split_data, splitting_filter) = if num_bands > 1 {
            (
                Some(IfChannelBuffer::new(proc_num_frames, num_proc_channels, num_bands)),
                Some(SplittingFilter::new(num_proc_channels, num_bands, proc_num_frames)),
            )
        } else {
            (None, None)
        };

        Self {
            input_num_frames,
            num_input_channels,
            proc_num_frames,
            num_proc_channels,
            output_num_frames,
            num_channels: num_proc_channels,
            num_bands,
            num_split_frames,
            data: IfChannelBuffer::new(proc_num_frames, num_proc_channels, 1),
            split_data,
            splitting_filter,
            input_resamplers: Vec::new(),
            output_resamplers: Vec::new(),
            input_scratch: vec![0.0; input_num_frames],
            input_s16: vec![0; input_num_frames],
            output_scratch: vec![0.0; output_num_frames],
            output_s16: ChannelBuffer::new(output_num_frames, num_proc_channels, 1),
            mixed_low_pass: vec![0; num_split_frames],
            mixed_low_pass_valid: false,
            low_pass_reference: ChannelBuffer::new(num_split_frames, num_proc_channels, 1),
            reference_copied: false,
            keyboard: vec![0.0; input_num_frames],
            has_keyboard_data: false,
            activity: VadActivity::Unknown,
        }
    }

    #[inline]
    pub(crate) fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Narrows the visible channels, e.g. after beamforming.
    pub(crate) fn set_num_channels(&mut self, num_channels: usize) {
        assert!(
            num_channels <= self.num_proc_channels,
            "{num_channels} channels requested, {} allocated",
            self.num_proc_channels
        );
        self.num_channels = num_channels;
        self.data.set_num_channels(num_channels);
        if let Some(split) = &mut self.split_data {
            split.set_num_channels(num_channels);
        }
    }

    #[inline]
    pub(crate) fn num_frames(&self) -> usize {
        self.proc_num_frames
    }

    #[inline]
    pub(crate) fn num_frames_per_band(&self) -> usize {
        self.num_split_frames
    }

    #[inline]
    pub(crate) fn num_bands(&self) -> usize {
        self.num_bands
    }

    #[inline]
    pub(crate) fn num_keyboard_frames(&self) -> usize {
        self.input_num_frames
    }

    fn init_for_new_data(&mut self) {
        self.has_keyboard_data = false;
        self.mixed_low_pass_valid = false;
        self.reference_copied = false;
        self.activity = VadActivity::Unknown;
        self.set_num_channels(self.num_proc_channels);
    }

    /// Takes a deinterleaved float chunk in [-1, 1]. A keyboard channel, if
    /// the stream has one, follows the audio channels.
    pub(crate) fn copy_from(&mut self, data: &[&[f32]], config: &StreamConfig) {
        assert_eq!(config.num_frames(), self.input_num_frames, "input frame count");
        assert_eq!(config.num_channels(), self.num_input_channels, "input channel count");
        assert!(data.len() >= config.num_buffer_channels(), "missing channel data");
        self.init_for_new_data();

        let n = self.input_num_frames;
        if config.has_keyboard() {
            self.keyboard.copy_from_slice(&data[config.num_channels()][..n]);
            self.has_keyboard_data = true;
        }

        let resample = n != self.proc_num_frames;
        if resample {
            grow_resamplers(
                &mut self.input_resamplers,
                self.num_proc_channels,
                n,
                self.proc_num_frames,
            );
        }
        let downmix = self.num_input_channels > 1 && self.num_proc_channels == 1;
        let dst = self.data.fbuf();
        for ch in 0..self.num_proc_channels {
            if downmix {
                audio_util::downmix_to_mono_f32(
                    &data[..self.num_input_channels],
                    &mut self.input_scratch,
                );
            } else {
                self.input_scratch.copy_from_slice(&data[ch][..n]);
            }
            for v in &mut self.input_scratch {
                *v = float_to_float_s16(*v);
            }
            if resample {
                self.input_resamplers[ch].resample(&self.input_scratch, dst.bands_mut(ch));
            } else {
                dst.bands_mut(ch).copy_from_slice(&self.input_scratch);
            }
        }
    }

    /// Writes the processed chunk as deinterleaved float in [-1, 1],
    /// repeating channel 0 into any extra output channels.
    pub(crate) fn copy_to(&mut self, config: &StreamConfig, dest: &mut [&mut [f32]]) {
        assert_eq!(config.num_frames(), self.output_num_frames, "output frame count");
        assert!(
            config.num_channels() == self.num_channels || self.num_channels == 1,
            "cannot map {} channels onto {}",
            self.num_channels,
            config.num_channels()
        );
        let n = self.output_num_frames;
        let resample = n != self.proc_num_frames;
        if resample {
            grow_resamplers(
                &mut self.output_resamplers,
                self.num_proc_channels,
                self.proc_num_frames,
                n,
            );
        }
        let src = self.data.fbuf_const();
        for ch in 0..self.num_channels {
            let out = &mut dest[ch][..n];
            if resample {
                self.output_resamplers[ch].resample(src.bands(ch), out);
            } else {
                out.copy_from_slice(src.bands(ch));
            }
            for v in out.iter_mut() {
                *v = float_s16_to_float(*v);
            }
        }
        if let Some((first, rest)) = dest[..config.num_channels()].split_first_mut() {
            for out in rest.iter_mut().skip(self.num_channels - 1) {
                out[..n].copy_from_slice(&first[..n]);
            }
        }
    }

    /// Takes an interleaved S16 frame, downmixing to mono when the buffer
    /// runs a single channel.
    pub(crate) fn deinterleave_from(&mut self, frame: &AudioFrame) {
        assert_eq!(frame.num_channels(), self.num_input_channels, "input channel count");
        assert_eq!(frame.samples_per_channel(), self.input_num_frames, "input frame count");
        self.init_for_new_data();
        self.activity = frame.vad_activity;

        let interleaved = frame.data();
        if self.input_num_frames == self.proc_num_frames {
            let ibuf = self.data.ibuf();
            if self.num_proc_channels == 1 {
                audio_util::downmix_interleaved_to_mono_i16(
                    interleaved,
                    self.num_input_channels,
                    ibuf.bands_mut(0),
                );
            } else {
                audio_util::deinterleave(interleaved, self.num_proc_channels, &mut ibuf.channels_mut());
            }
            return;
        }

        grow_resamplers(
            &mut self.input_resamplers,
            self.num_proc_channels,
            self.input_num_frames,
            self.proc_num_frames,
        );
        let dst = self.data.fbuf();
        for ch in 0..self.num_proc_channels {
            if self.num_proc_channels == 1 {
                audio_util::downmix_interleaved_to_mono_i16(
                    interleaved,
                    self.num_input_channels,
                    &mut self.input_s16,
                );
            } else {
                let picked = interleaved.iter().skip(ch).step_by(self.num_input_channels);
                for (d, &s) in self.input_s16.iter_mut().zip(picked) {
                    *d = s;
                }
            }
            audio_util::convert_slice(&self.input_s16, &mut self.input_scratch, f32::from);
            self.input_resamplers[ch].resample(&self.input_scratch, dst.bands_mut(ch));
        }
    }

    /// Writes the VAD decision into `frame` and, when `data_changed`, the
    /// processed samples too.
    pub(crate) fn interleave_to(&mut self, frame: &mut AudioFrame, data_changed: bool) {
        frame.vad_activity = self.activity;
        if !data_changed {
            return;
        }
        assert!(
            frame.num_channels() == self.num_channels || self.num_channels == 1,
            "cannot map {} channels onto {}",
            self.num_channels,
            frame.num_channels()
        );
        assert_eq!(frame.samples_per_channel(), self.output_num_frames, "output frame count");

        let out_channels = frame.num_channels();
        let src = if self.proc_num_frames == self.output_num_frames {
            self.data.ibuf_const()
        } else {
            grow_resamplers(
                &mut self.output_resamplers,
                self.num_proc_channels,
                self.proc_num_frames,
                self.output_num_frames,
            );
            let fbuf = self.data.fbuf_const();
            self.output_s16.set_num_channels(self.num_channels);
            for ch in 0..self.num_channels {
                self.output_resamplers[ch].resample(fbuf.bands(ch), &mut self.output_scratch);
                audio_util::convert_slice(
                    &self.output_scratch,
                    self.output_s16.bands_mut(ch),
                    float_s16_to_s16,
                );
            }
            &self.output_s16
        };
        if out_channels == self.num_channels {
            audio_util::interleave(&src.channels(), frame.data_mut());
        } else {
            audio_util::upmix_mono_to_interleaved(src.bands(0), out_channels, frame.data_mut());
        }
    }

    /// Full-band float view; marks the S16 view stale.
    pub(crate) fn channels_f(&mut self) -> &mut ChannelBuffer<f32> {
        self.mixed_low_pass_valid = false;
        self.data.fbuf()
    }

    pub(crate) fn channels_const_f(&mut self) -> &ChannelBuffer<f32> {
        self.data.fbuf_const()
    }

    /// Full-band S16 view; marks the float view stale.
    pub(crate) fn channels(&mut self) -> &mut ChannelBuffer<i16> {
        self.mixed_low_pass_valid = false;
        self.data.ibuf()
    }

    pub(crate) fn channels_const(&mut self) -> &ChannelBuffer<i16> {
        self.data.ibuf_const()
    }

    /// Band-split float view. Single-band buffers hand out the full band.
    pub(crate) fn split_bands_f(&mut self) -> &mut ChannelBuffer<f32> {
        self.mixed_low_pass_valid = false;
        match &mut self.split_data {
            Some(split) => split.fbuf(),
            None => self.data.fbuf(),
        }
    }

    pub(crate) fn split_bands_const_f(&mut self) -> &ChannelBuffer<f32> {
        match &mut self.split_data {
            Some(split) => split.fbuf_const(),
            None => self.data.fbuf_const(),
        }
    }

    pub(crate) fn split_bands(&mut self) -> &mut ChannelBuffer<i16> {
        self.mixed_low_pass_valid = false;
        match &mut self.split_data {
            Some(split) => split.ibuf(),
            None => self.data.ibuf(),
        }
    }

    pub(crate) fn split_bands_const(&mut self) -> &ChannelBuffer<i16> {
        match &mut self.split_data {
            Some(split) => split.ibuf_const(),
            None => self.data.ibuf_const(),
        }
    }

    /// Low band of all channels averaged to mono, as S16. Cached until a
    /// mutable view is handed out.
    pub(crate) fn mixed_low_pass_data(&mut self) -> &[i16] {
        if self.num_channels == 1 {
            return self.split_bands_const().channel(LOW_BAND, 0);
        }
        if !self.mixed_low_pass_valid {
            let split = match &mut self.split_data {
                Some(split) => split.ibuf_const(),
                None => self.data.ibuf_const(),
            };
            audio_util::downmix_to_mono_i16(&split.band_channels(LOW_BAND), &mut self.mixed_low_pass);
            self.mixed_low_pass_valid = true;
        }
        &self.mixed_low_pass
    }

    /// Snapshots the low band before noise suppression touches it.
    pub(crate) fn copy_low_pass_to_reference(&mut self) {
        self.reference_copied = true;
        let split = match &mut self.split_data {
            Some(split) => split.ibuf_const(),
            None => self.data.ibuf_const(),
        };
        self.low_pass_reference.set_num_channels(self.num_channels);
        for ch in 0..self.num_channels {
            self.low_pass_reference
                .bands_mut(ch)
                .copy_from_slice(split.channel(LOW_BAND, ch));
        }
    }

    /// The snapshot taken by [`copy_low_pass_to_reference`](Self::copy_low_pass_to_reference)
    /// during this chunk, if any.
    pub(crate) fn low_pass_reference(&self, channel: usize) -> Option<&[i16]> {
        self.reference_copied
            .then(|| self.low_pass_reference.bands(channel))
    }

    /// The keyboard channel of this chunk, at the input rate.
    pub(crate) fn keyboard_data(&self) -> Option<&[f32]> {
        self.has_keyboard_data.then_some(self.keyboard.as_slice())
    }

    pub(crate) fn set_activity(&mut self, activity: VadActivity) {
        self.activity = activity;
    }

    pub(crate) fn activity(&self) -> VadActivity {
        self.activity
    }

    pub(crate) fn split_into_frequency_bands(&mut self) {
        if let (Some(filter), Some(split)) = (&mut self.splitting_filter, &mut self.split_data) {
            filter.analysis(&mut self.data, split);
        }
    }

    pub(crate) fn merge_frequency_bands(&mut self) {
        if let (Some(filter), Some(split)) = (&mut self.splitting_filter, &mut self.split_data) {
            filter.synthesis(split, &mut self.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use webrtc_apm_proptest::comparison::{assert_f32_near, assert_i16_near, energy};

    use super::*;

    #[test]
    fn set_num_channels_narrows_both_views() {
        let mut ab = AudioBuffer::new(480, 2, 480, 2, 480);
        ab.set_num_channels(1);
        assert_eq!(ab.num_channels(), 1);
        assert_eq!(ab.channels_const_f().num_channels(), 1);
        assert_eq!(ab.split_bands_const().num_channels(), 1);
    }

    #[test]
    #[should_panic(expected = "allocated")]
    fn set_num_channels_cannot_widen() {
        let mut ab = AudioBuffer::new(160, 1, 160, 1, 160);
        ab.set_num_channels(2);
    }

    #[test]
    fn new_chunk_restores_channel_count() {
        let mut ab = AudioBuffer::new(160, 2, 160, 2, 160);
        ab.set_num_channels(1);
        let ch = [0.1f32; 160];
        ab.copy_from(&[&ch, &ch], &StreamConfig::new(16000, 2));
        assert_eq!(ab.num_channels(), 2);
    }

    #[test]
    fn float_round_trip_without_resampling() {
        let mut ab = AudioBuffer::new(320, 2, 320, 2, 320);
        let config = StreamConfig::new(32000, 2);
        let left: Vec<f32> = (0..320).map(|i| (i as f32 / 320.0) - 0.5).collect();
        let right: Vec<f32> = left.iter().map(|v| -v).collect();
        ab.copy_from(&[&left, &right], &config);

        let mut out_l = vec![0.0f32; 320];
        let mut out_r = vec![0.0f32; 320];
        ab.copy_to(&config, &mut [&mut out_l, &mut out_r]);
        assert_f32_near(&out_l, &left, 1e-6);
        assert_f32_near(&out_r, &right, 1e-6);
    }

    #[test]
    fn resampling_preserves_energy() {
        let mut ab = AudioBuffer::new(320, 1, 320, 1, 480);
        let input: Vec<f32> = (0..320)
            .map(|i| 0.5 * (2.0 * PI * 100.0 * i as f32 / 32000.0).sin())
            .collect();
        ab.copy_from(&[&input], &StreamConfig::new(32000, 1));
        let mut out = vec![0.0f32; 480];
        ab.copy_to(&StreamConfig::new(48000, 1), &mut [&mut out]);

        let resampled = energy(&out);
        let reference = energy(&input);
        assert!((resampled - reference).abs() < 0.02 * reference, "{resampled} vs {reference}");
    }

    #[test]
    fn copy_from_downmixes_by_averaging() {
        let mut ab = AudioBuffer::new(160, 2, 160, 1, 160);
        let ch0 = [0.25f32; 160];
        let ch1 = [0.75f32; 160];
        ab.copy_from(&[&ch0, &ch1], &StreamConfig::new(16000, 2));
        assert_eq!(ab.num_channels(), 1);
        assert!(ab.channels_const_f().bands(0).iter().all(|&s| (s - 16384.0).abs() < 1.0));
    }

    #[test]
    fn copy_to_upmixes_mono() {
        let mut ab = AudioBuffer::new(160, 1, 160, 1, 160);
        let ch = [0.5f32; 160];
        ab.copy_from(&[&ch], &StreamConfig::new(16000, 1));
        let mut a = vec![0.0f32; 160];
        let mut b = vec![0.0f32; 160];
        ab.copy_to(&StreamConfig::new(16000, 2), &mut [&mut a, &mut b]);
        assert_eq!(a, b);
        assert!((a[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn keyboard_channel_is_kept_for_one_chunk() {
        let mut ab = AudioBuffer::new(160, 1, 160, 1, 160);
        let audio = [0.0f32; 160];
        let keys = [0.3f32; 160];
        ab.copy_from(&[&audio, &keys], &StreamConfig::with_keyboard(16000, 1, true));
        assert_eq!(ab.keyboard_data(), Some(&keys[..]));
        assert_eq!(ab.num_keyboard_frames(), 160);

        ab.copy_from(&[&audio], &StreamConfig::new(16000, 1));
        assert_eq!(ab.keyboard_data(), None);
    }

    #[test]
    fn interleaved_round_trip_stereo() {
        let mut ab = AudioBuffer::new(160, 2, 160, 2, 160);
        let samples: Vec<i16> = (0..320).map(|i| i as i16 * 7 - 1000).collect();
        let mut frame = AudioFrame::from_interleaved(16000, 2, samples.clone());
        ab.deinterleave_from(&frame);
        assert!(ab.data.is_int_fresh());

        frame.data_mut().fill(0);
        ab.interleave_to(&mut frame, true);
        assert_eq!(frame.data(), samples.as_slice());
    }

    #[test]
    fn int_and_float_views_agree() {
        let mut ab = AudioBuffer::new(160, 1, 160, 1, 160);
        let samples: Vec<i16> = (0..160).map(|i| (i as i16 - 80) * 300).collect();
        ab.deinterleave_from(&AudioFrame::from_interleaved(16000, 1, samples.clone()));
        let float: Vec<f32> = ab.channels_const_f().bands(0).to_vec();
        for (f, s) in float.iter().zip(&samples) {
            assert_eq!(*f, f32::from(*s));
        }

        ab.channels_f().bands_mut(0)[0] = 1234.4;
        assert!(!ab.data.is_int_fresh());
        assert_eq!(ab.channels_const().bands(0)[0], 1234);
    }

    #[test]
    fn unchanged_data_only_carries_activity() {
        let mut ab = AudioBuffer::new(160, 1, 160, 1, 160);
        ab.deinterleave_from(&AudioFrame::from_interleaved(16000, 1, vec![500; 160]));
        ab.set_activity(VadActivity::Active);

        let mut frame = AudioFrame::new(16000, 1);
        ab.interleave_to(&mut frame, false);
        assert_eq!(frame.vad_activity, VadActivity::Active);
        assert!(frame.data().iter().all(|&s| s == 0));
    }

    #[test]
    fn interleave_upmixes_mono_and_resamples() {
        let mut ab = AudioBuffer::new(160, 1, 160, 1, 320);
        ab.deinterleave_from(&AudioFrame::from_interleaved(16000, 1, vec![1000; 160]));
        let mut frame = AudioFrame::new(32000, 2);
        ab.interleave_to(&mut frame, true);
        // The first output samples interpolate from the silent history.
        assert_i16_near(&frame.data()[8..], &[1000; 632], 1);
        assert_eq!(frame.data()[10], frame.data()[11]);
    }

    #[test]
    fn deinterleave_resamples_to_processing_rate() {
        let mut ab = AudioBuffer::new(480, 2, 160, 2, 480);
        let samples: Vec<i16> = (0..960).map(|i| if i % 2 == 0 { 800 } else { -800 }).collect();
        ab.deinterleave_from(&AudioFrame::from_interleaved(48000, 2, samples));
        let buf = ab.channels_const();
        assert!(buf.bands(0)[1..].iter().all(|&s| s == 800));
        assert!(buf.bands(1)[1..].iter().all(|&s| s == -800));
    }

    #[test]
    fn mixed_low_pass_is_cached_until_written() {
        let mut ab = AudioBuffer::new(320, 2, 320, 2, 320);
        let samples: Vec<i16> = (0..640).map(|i| if i % 2 == 0 { 1000 } else { 3000 }).collect();
        ab.deinterleave_from(&AudioFrame::from_interleaved(32000, 2, samples));
        ab.split_into_frequency_bands();
        let first = ab.mixed_low_pass_data().to_vec();
        assert_eq!(first.len(), 160);
        assert!(ab.mixed_low_pass_valid);

        ab.split_bands().channel_mut(LOW_BAND, 0).fill(0);
        assert!(!ab.mixed_low_pass_valid);
        let low1 = ab.split_bands_const().channel(LOW_BAND, 1).to_vec();
        let mixed = ab.mixed_low_pass_data().to_vec();
        for (m, l) in mixed.iter().zip(&low1) {
            assert_eq!(*m, l / 2);
        }
    }

    #[test]
    fn low_pass_reference_lives_for_one_chunk() {
        let mut ab = AudioBuffer::new(160, 1, 160, 1, 160);
        let frame = AudioFrame::from_interleaved(16000, 1, vec![42; 160]);
        ab.deinterleave_from(&frame);
        assert_eq!(ab.low_pass_reference(0), None);

        ab.copy_low_pass_to_reference();
        ab.split_bands().channel_mut(LOW_BAND, 0).fill(0);
        assert!(ab.low_pass_reference(0).is_some_and(|r| r.iter().all(|&s| s == 42)));

        ab.deinterleave_from(&frame);
        assert_eq!(ab.low_pass_reference(0), None);
        assert_eq!(ab.activity(), VadActivity::Unknown);
    }

    #[test]
    fn band_layout_follows_processing_rate() {
        for (frames, bands) in [(80, 1), (160, 1), (320, 2), (480, 3)] {
            let ab = AudioBuffer::new(frames, 1, frames, 1, frames);
            assert_eq!(ab.num_bands(), bands);
            assert_eq!(ab.num_frames_per_band(), frames / bands);
        }
    }

    #[test]
    fn split_and_merge_keep_low_tone() {
        let mut ab = AudioBuffer::new(480, 1, 480, 1, 480);
        let config = StreamConfig::new(48000, 1);
        let mut last_in = Vec::new();
        let mut last_out = vec![0.0f32; 480];
        for chunk in 0..4 {
            let input: Vec<f32> = (0..480)
                .map(|i| 0.25 * (2.0 * PI * 1000.0 * (chunk * 480 + i) as f32 / 48000.0).sin())
                .collect();
            ab.copy_from(&[&input], &config);
            ab.split_into_frequency_bands();
            let low = energy(ab.split_bands_const_f().channel(LOW_BAND, 0));
            let high = energy(ab.split_bands_const_f().channel(2, 0));
            assert!(low > 10.0 * high, "low {low} high {high}");
            ab.merge_frequency_bands();
            ab.copy_to(&config, &mut [&mut last_out]);
            last_in = input;
        }
        let ratio = energy(&last_out) / energy(&last_in);
        assert!((0.7..1.3).contains(&ratio), "energy ratio {ratio}");
    }
}
