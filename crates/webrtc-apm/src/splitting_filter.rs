//! Band splitting for super-wideband processing.
//!
//! 32 kHz frames go through a two-band allpass QMF on the S16 view of the
//! buffers. 48 kHz frames go through [`ThreeBandFilterBank`] on the float
//! view. Either way every band ends up `num_frames / num_bands` long.

use webrtc_common_audio::audio_util::float_s16_to_s16;
use webrtc_common_audio::if_channel_buffer::IfChannelBuffer;

use crate::three_band_filter_bank::{NUM_BANDS as THREE_BANDS, ThreeBandFilterBank};

/// Samples per band for a 10 ms frame at 32 kHz.
const QMF_BAND_FRAMES: usize = 160;

// Q16 allpass coefficients of the two polyphase branches. Analysis runs the
// odd samples through `A` and the even ones through `B`; synthesis swaps them.
const ALLPASS_A_Q16: [u16; 3] = [6418, 36982, 57261];
const ALLPASS_B_Q16: [u16; 3] = [21333, 49062, 63010];

fn q16(c: [u16; 3]) -> [f32; 3] {
    c.map(|v| f32::from(v) / 65536.0)
}

/// First-order allpass `y[n] = x[n-1] + a * (x[n] - y[n-1])`.
#[derive(Debug, Clone, Copy, Default)]
struct AllPassSection {
    a: f32,
    last_in: f32,
    last_out: f32,
}

/// Three allpass sections in series, filtering in place.
#[derive(Debug, Clone, Copy)]
struct AllPassChain([AllPassSection; 3]);

impl AllPassChain {
    fn new(coeffs: [f32; 3]) -> Self {
        Self(coeffs.map(|a| AllPassSection {
            a,
            ..AllPassSection::default()
        }))
    }

    fn run(&mut self, data: &mut [f32]) {
        for section in &mut self.0 {
            for v in data.iter_mut() {
                let y = section.last_in + section.a * (*v - section.last_out);
                section.last_in = *v;
                section.last_out = y;
                *v = y;
            }
        }
    }
}

/// Two-band QMF state for one channel.
#[derive(Debug, Clone)]
struct Qmf {
    analysis_odd: AllPassChain,
    analysis_even: AllPassChain,
    synthesis_sum: AllPassChain,
    synthesis_diff: AllPassChain,
    odd: [f32; QMF_BAND_FRAMES],
    even: [f32; QMF_BAND_FRAMES],
}

impl Qmf {
    fn new() -> Self {
        let a = q16(ALLPASS_A_Q16);
        let b = q16(ALLPASS_B_Q16);
        Self {
            analysis_odd: AllPassChain::new(a),
            analysis_even: AllPassChain::new(b),
            synthesis_sum: AllPassChain::new(b),
            synthesis_diff: AllPassChain::new(a),
            odd: [0.0; QMF_BAND_FRAMES],
            even: [0.0; QMF_BAND_FRAMES],
        }
    }

    fn analyze(&mut self, input: &[i16], low: &mut [i16], high: &mut [i16]) {
        let n = low.len();
        debug_assert_eq!(input.len(), 2 * n);
        debug_assert!(n <= QMF_BAND_FRAMES);
        for (k, pair) in input.chunks_exact(2).enumerate() {
            self.even[k] = f32::from(pair[0]);
            self.odd[k] = f32::from(pair[1]);
        }
        self.analysis_odd.run(&mut self.odd[..n]);
        self.analysis_even.run(&mut self.even[..n]);
        for k in 0..n {
            low[k] = float_s16_to_s16(0.5 * (self.odd[k] + self.even[k]));
            high[k] = float_s16_to_s16(0.5 * (self.odd[k] - self.even[k]));
        }
    }

    fn synthesize(&mut self, low: &[i16], high: &[i16], output: &mut [i16]) {
        let n = low.len();
        debug_assert_eq!(output.len(), 2 * n);
        for k in 0..n {
            let (l, h) = (f32::from(low[k]), f32::from(high[k]));
            self.odd[k] = l + h;
            self.even[k] = l - h;
        }
        self.synthesis_sum.run(&mut self.odd[..n]);
        self.synthesis_diff.run(&mut self.even[..n]);
        for (k, pair) in output.chunks_exact_mut(2).enumerate() {
            pair[0] = float_s16_to_s16(self.even[k]);
            pair[1] = float_s16_to_s16(self.odd[k]);
        }
    }
}

#[derive(Debug)]
enum Banks {
    Two(Vec<Qmf>),
    Three(Vec<ThreeBandFilterBank>),
}

/// Splits full-band channels into 2 or 3 bands and merges them back.
#[derive(Debug)]
pub(crate) struct SplittingFilter {
    banks: Banks,
}

impl SplittingFilter {
    /// `num_frames` is the full-band frame length per channel.
    pub(crate) fn new(num_channels: usize, num_bands: usize, num_frames: usize) -> Self {
        let banks = match num_bands {
            2 => Banks::Two((0..num_channels).map(|_| Qmf::new()).collect()),
            3 => Banks::Three(
                (0..num_channels)
                    .map(|_| ThreeBandFilterBank::new(num_frames))
                    .collect(),
            ),
            n => panic!("unsupported band count {n}"),
        };
        Self { banks }
    }

    pub(crate) fn num_bands(&self) -> usize {
        match self.banks {
            Banks::Two(_) => 2,
            Banks::Three(_) => THREE_BANDS,
        }
    }

    /// Fills `bands` from the full-band `data`.
    pub(crate) fn analysis(&mut self, data: &mut IfChannelBuffer, bands: &mut IfChannelBuffer) {
        self.check_shapes(data, bands);
        let num_channels = data.num_channels();
        let per_band = bands.num_frames_per_band();
        match &mut self.banks {
            Banks::Two(qmfs) => {
                let src = data.ibuf_const();
                let dst = bands.ibuf();
                dst.set_num_channels(num_channels);
                for (ch, qmf) in qmfs.iter_mut().enumerate().take(num_channels) {
                    let (low, high) = dst.bands_mut(ch).split_at_mut(per_band);
                    qmf.analyze(src.bands(ch), low, high);
                }
            }
            Banks::Three(filters) => {
                let src = data.fbuf_const();
                let dst = bands.fbuf();
                dst.set_num_channels(num_channels);
                for (ch, bank) in filters.iter_mut().enumerate().take(num_channels) {
                    let (b0, rest) = dst.bands_mut(ch).split_at_mut(per_band);
                    let (b1, b2) = rest.split_at_mut(per_band);
                    bank.analysis(src.bands(ch), &mut [b0, b1, b2]);
                }
            }
        }
    }

    /// Rebuilds the full-band `data` from `bands`.
    pub(crate) fn synthesis(&mut self, bands: &mut IfChannelBuffer, data: &mut IfChannelBuffer) {
        self.check_shapes(data, bands);
        let num_channels = bands.num_channels();
        let per_band = bands.num_frames_per_band();
        match &mut self.banks {
            Banks::Two(qmfs) => {
                let src = bands.ibuf_const();
                let dst = data.ibuf();
                dst.set_num_channels(num_channels);
                for (ch, qmf) in qmfs.iter_mut().enumerate().take(num_channels) {
                    let (low, high) = src.bands(ch).split_at(per_band);
                    qmf.synthesize(low, high, dst.bands_mut(ch));
                }
            }
            Banks::Three(filters) => {
                let src = bands.fbuf_const();
                let dst = data.fbuf();
                dst.set_num_channels(num_channels);
                for (ch, bank) in filters.iter_mut().enumerate().take(num_channels) {
                    let split = [src.channel(0, ch), src.channel(1, ch), src.channel(2, ch)];
                    bank.synthesis(&split, dst.bands_mut(ch));
                }
            }
        }
    }

    fn check_shapes(&self, data: &IfChannelBuffer, bands: &IfChannelBuffer) {
        assert_eq!(bands.num_bands(), self.num_bands(), "band count mismatch");
        assert_eq!(
            data.num_frames(),
            bands.num_frames_per_band() * bands.num_bands(),
            "full-band and split frame counts disagree"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use webrtc_apm_proptest::comparison::{energy, max_cross_correlation};

    use super::*;

    fn tone(freq_hz: f32, amplitude: f32, rate_hz: f32, start: usize, out: &mut [f32]) {
        for (k, v) in out.iter_mut().enumerate() {
            *v += amplitude * (2.0 * PI * freq_hz * (start + k) as f32 / rate_hz).sin();
        }
    }

    #[test]
    fn three_bands_separate_tones_and_reconstruct() {
        let frequencies = [1000.0, 12000.0, 18000.0];
        let amplitude = 8192.0f32;
        let threshold = amplitude * amplitude / 4.0;
        let mut filter = SplittingFilter::new(1, 3, 480);
        let mut input = IfChannelBuffer::new(480, 1, 1);
        let mut bands = IfChannelBuffer::new(480, 1, 3);
        let mut output = IfChannelBuffer::new(480, 1, 1);

        for chunk in 0..8usize {
            let present: [bool; 3] = [0, 1, 2].map(|b| chunk & (1 << b) != 0);
            {
                let ch = input.fbuf().bands_mut(0);
                ch.fill(0.0);
                for (b, &f) in frequencies.iter().enumerate() {
                    let amp = if present[b] { amplitude } else { 0.0 };
                    tone(f, amp, 48000.0, chunk * 480, ch);
                }
            }

            filter.analysis(&mut input, &mut bands);
            for (b, &is_present) in present.iter().enumerate() {
                let e = energy(bands.fbuf_const().channel(b, 0));
                assert_eq!(e > threshold, is_present, "chunk {chunk} band {b} energy {e}");
            }

            filter.synthesis(&mut bands, &mut output);
            if present.iter().any(|&p| p) {
                let x = max_cross_correlation(input.fbuf_const().bands(0), output.fbuf_const().bands(0));
                assert!(x > threshold, "chunk {chunk}: xcorr {x}");
            }
        }
    }

    #[test]
    fn two_bands_keep_low_tone_low_and_reconstruct() {
        let amplitude = 4096.0f32;
        let mut filter = SplittingFilter::new(1, 2, 320);
        let mut input = IfChannelBuffer::new(320, 1, 1);
        let mut bands = IfChannelBuffer::new(320, 1, 2);
        let mut output = IfChannelBuffer::new(320, 1, 1);

        for chunk in 0..10usize {
            {
                let ch = input.fbuf().bands_mut(0);
                ch.fill(0.0);
                tone(500.0, amplitude, 32000.0, chunk * 320, ch);
            }
            filter.analysis(&mut input, &mut bands);
            assert!(bands.is_int_fresh());
            assert!(!bands.is_float_fresh());

            let low = energy(bands.fbuf_const().channel(0, 0));
            let high = energy(bands.fbuf_const().channel(1, 0));
            if chunk >= 2 {
                assert!(low > 5.0 * high, "chunk {chunk}: low {low} high {high}");
            }

            filter.synthesis(&mut bands, &mut output);
            if chunk >= 2 {
                let x = max_cross_correlation(input.fbuf_const().bands(0), output.fbuf_const().bands(0));
                assert!(x > amplitude * amplitude / 4.0, "chunk {chunk}: xcorr {x}");
            }
        }
    }

    #[test]
    fn silence_stays_silent() {
        for (num_bands, frames) in [(2, 320), (3, 480)] {
            let mut filter = SplittingFilter::new(1, num_bands, frames);
            let mut input = IfChannelBuffer::new(frames, 1, 1);
            let mut bands = IfChannelBuffer::new(frames, 1, num_bands);
            filter.analysis(&mut input, &mut bands);
            assert!(bands.fbuf_const().bands(0).iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn channels_are_filtered_independently() {
        for (num_bands, frames) in [(2, 320), (3, 480)] {
            let channels = 3;
            let mut filter = SplittingFilter::new(channels, num_bands, frames);
            let mut input = IfChannelBuffer::new(frames, channels, 1);
            let mut bands = IfChannelBuffer::new(frames, channels, num_bands);
            {
                let buf = input.fbuf();
                for ch in 0..channels {
                    tone(1000.0, 1000.0 * (ch + 1) as f32, 16000.0, 0, buf.bands_mut(ch));
                }
            }
            filter.analysis(&mut input, &mut bands);
            let low: Vec<f32> = (0..channels)
                .map(|ch| energy(bands.fbuf_const().channel(0, ch)))
                .collect();
            assert!(low[0] > 0.0);
            assert!(low[1] > low[0] && low[2] > low[1], "{low:?}");
        }
    }

    #[test]
    fn narrowed_channel_count_reaches_bands() {
        let mut filter = SplittingFilter::new(2, 2, 320);
        let mut input = IfChannelBuffer::new(320, 2, 1);
        let mut bands = IfChannelBuffer::new(320, 2, 2);
        input.set_num_channels(1);
        filter.analysis(&mut input, &mut bands);
        assert_eq!(bands.num_channels(), 1);
    }

    #[test]
    #[should_panic(expected = "frame counts disagree")]
    fn rejects_mismatched_shapes() {
        let mut filter = SplittingFilter::new(1, 2, 320);
        let mut input = IfChannelBuffer::new(480, 1, 1);
        let mut bands = IfChannelBuffer::new(320, 1, 2);
        filter.analysis(&mut input, &mut bands);
    }
}
