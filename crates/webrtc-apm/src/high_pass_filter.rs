//! High-pass filter removing DC and rumble from the low band of the capture
//! signal.

use webrtc_common_audio::audio_util::float_s16_to_s16;
use webrtc_common_audio::cascaded_biquad_filter::{BiQuadCoefficients, CascadedBiQuadFilter};

use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::audio_processing::AudioProcessing;
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};

// Second-order sections in Q12, cutoff around 80 Hz.
const COEFFICIENTS_8KHZ: ([i16; 3], [i16; 2]) = ([3798, -7596, 3798], [7807, -3733]);
const COEFFICIENTS_16KHZ: ([i16; 3], [i16; 2]) = ([4012, -8024, 4012], [8002, -3913]);

fn coefficients_for(split_rate_hz: usize) -> BiQuadCoefficients {
    let (b, a) = if split_rate_hz == 8000 {
        COEFFICIENTS_8KHZ
    } else {
        COEFFICIENTS_16KHZ
    };
    BiQuadCoefficients::from_q12(b, a)
}

/// Per-channel high-pass filter running on the S16 low band.
#[derive(Debug)]
pub(crate) struct HighPassFilter {
    enabled: bool,
    format: StageFormat,
    filters: Vec<CascadedBiQuadFilter>,
    scratch: Vec<f32>,
}

impl HighPassFilter {
    pub(crate) fn new() -> Self {
        let mut filter = Self {
            enabled: false,
            format: StageFormat::default(),
            filters: Vec::new(),
            scratch: Vec::new(),
        };
        filter.initialize(&StageFormat::default());
        filter
    }

    pub(crate) fn process_capture_audio(&mut self, audio: &mut AudioBuffer) {
        if !self.enabled {
            return;
        }
        let num_channels = audio.num_channels();
        debug_assert!(num_channels <= self.filters.len());
        let bands = audio.split_bands();
        for (ch, filter) in self.filters.iter_mut().enumerate().take(num_channels) {
            let low = bands.channel_mut(LOW_BAND, ch);
            self.scratch.clear();
            self.scratch.extend(low.iter().map(|&s| f32::from(s)));
            filter.process_in_place(&mut self.scratch);
            for (dst, &src) in low.iter_mut().zip(&self.scratch) {
                *dst = float_s16_to_s16(src);
            }
        }
    }
}

impl ProcessingComponent for HighPassFilter {
    fn initialize(&mut self, format: &StageFormat) {
        self.format = *format;
        let coefficients = [coefficients_for(format.split_rate_hz)];
        self.filters = (0..format.num_proc_channels)
            .map(|_| CascadedBiQuadFilter::new(&coefficients))
            .collect();
        self.scratch = Vec::with_capacity(format.num_frames_per_band());
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, enable: bool) -> Result<(), Error> {
        if enable && !self.enabled {
            for filter in &mut self.filters {
                filter.reset();
            }
        }
        self.enabled = enable;
        Ok(())
    }
}

/// Switches the capture high-pass filter. Returned by
/// [`AudioProcessing::high_pass_filter`].
#[derive(Debug, Clone, Copy)]
pub struct HighPassFilterHandle<'a> {
    apm: &'a AudioProcessing,
}

impl<'a> HighPassFilterHandle<'a> {
    pub(crate) fn new(apm: &'a AudioProcessing) -> Self {
        Self { apm }
    }

    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        self.apm.lock_capture().high_pass_filter.enable(enable)
    }

    pub fn is_enabled(&self) -> bool {
        self.apm.lock_capture().high_pass_filter.is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(rate: usize, samples: impl Fn(usize) -> i16) -> AudioBuffer {
        let frames = rate / 100;
        let mut audio = AudioBuffer::new(frames, 1, frames, 1, frames);
        for (i, s) in audio.channels().bands_mut(0).iter_mut().enumerate() {
            *s = samples(i);
        }
        audio
    }

    fn enabled_filter(rate: usize) -> HighPassFilter {
        let mut hpf = HighPassFilter::new();
        hpf.initialize(&StageFormat {
            sample_rate_hz: rate,
            split_rate_hz: rate,
            ..StageFormat::default()
        });
        hpf.enable(true).unwrap();
        hpf
    }

    fn dc_attenuation_db(rate: usize) -> f32 {
        let mut hpf = enabled_filter(rate);
        let dc = 10000i16;
        let mut after = 0.0f32;
        // Let the filter settle for 200 ms before measuring.
        for _ in 0..20 {
            let mut audio = buffer_with(rate, |_| dc);
            hpf.process_capture_audio(&mut audio);
            after = audio
                .channels_const()
                .bands(0)
                .iter()
                .map(|&s| f32::from(s).powi(2))
                .sum();
        }
        let before = f32::from(dc).powi(2) * (rate / 100) as f32;
        10.0 * (before / after.max(1.0)).log10()
    }

    #[test]
    fn removes_dc_at_8khz() {
        assert!(dc_attenuation_db(8000) > 40.0);
    }

    #[test]
    fn removes_dc_at_16khz() {
        assert!(dc_attenuation_db(16000) > 40.0);
    }

    #[test]
    fn passes_speech_band_tone() {
        let rate = 16000;
        let mut hpf = enabled_filter(rate);
        let tone = |n: usize| {
            (8000.0 * (2.0 * std::f32::consts::PI * 1000.0 * n as f32 / rate as f32).sin()) as i16
        };
        let mut ratio = 0.0;
        for frame in 0..10 {
            let mut audio = buffer_with(rate, |i| tone(frame * 160 + i));
            let input: f32 = audio
                .channels_const()
                .bands(0)
                .iter()
                .map(|&s| f32::from(s).powi(2))
                .sum();
            hpf.process_capture_audio(&mut audio);
            let output: f32 = audio
                .channels_const()
                .bands(0)
                .iter()
                .map(|&s| f32::from(s).powi(2))
                .sum();
            ratio = output / input;
        }
        assert!((0.8..1.25).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn disabled_filter_is_transparent() {
        let mut hpf = HighPassFilter::new();
        let mut audio = buffer_with(16000, |_| 1234);
        hpf.process_capture_audio(&mut audio);
        assert!(audio.channels_const().bands(0).iter().all(|&s| s == 1234));
    }

    #[test]
    fn reinitializing_changes_channel_count() {
        let mut hpf = enabled_filter(16000);
        hpf.initialize(&StageFormat {
            num_proc_channels: 2,
            ..StageFormat::default()
        });
        let mut audio = AudioBuffer::new(160, 2, 160, 2, 160);
        for ch in 0..2 {
            audio.channels().bands_mut(ch).fill(5000);
        }
        hpf.process_capture_audio(&mut audio);
        for ch in 0..2 {
            assert!(audio.channels_const().bands(ch)[159] < 5000);
        }
    }
}
