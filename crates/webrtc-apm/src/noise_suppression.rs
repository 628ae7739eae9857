//! Stationary noise suppression.
//!
//! The low band is tracked in the STFT domain: a quantile estimator follows
//! the noise floor of every bin, and a directed-decision Wiener filter
//! derived from it attenuates the bins. Higher bands are delayed by one
//! chunk to stay aligned with the low band and scaled by the mean low-band
//! gain.

use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::audio_processing::AudioProcessing;
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};
use crate::spectrum::Stft;

/// Maximum attenuation applied to noise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Level {
    /// 6 dB.
    Low,
    /// 12 dB.
    #[default]
    Moderate,
    /// 18 dB.
    High,
    /// 21 dB.
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SuppressionParams {
    over_subtraction_factor: f32,
    minimum_attenuating_gain: f32,
}

impl Level {
    fn suppression_params(self) -> SuppressionParams {
        let (over_subtraction_factor, minimum_attenuating_gain) = match self {
            Self::Low => (1.0, 0.5),
            Self::Moderate => (1.0, 0.25),
            Self::High => (1.1, 0.125),
            Self::VeryHigh => (1.25, 0.09),
        };
        SuppressionParams {
            over_subtraction_factor,
            minimum_attenuating_gain,
        }
    }
}

const SIMULTANEOUS_ESTIMATES: usize = 3;
const LONG_STARTUP_PHASE_BLOCKS: u32 = 200;
const SHORT_STARTUP_PHASE_BLOCKS: u32 = 50;
const PRIOR_SNR_SMOOTHING: f32 = 0.98;
// Mean over lower quartile of a Rayleigh-distributed magnitude.
const QUARTILE_TO_MEAN: f32 = 1.65;

/// Tracks the lower quartile of each bin's log-magnitude with staggered
/// restarts so the estimate follows slow changes in the noise floor.
#[derive(Debug, Clone)]
struct QuantileNoiseEstimator {
    num_bins: usize,
    density: Vec<f32>,
    log_quantile: Vec<f32>,
    quantile: Vec<f32>,
    counter: [u32; SIMULTANEOUS_ESTIMATES],
    num_updates: u32,
}

impl QuantileNoiseEstimator {
    fn new(num_bins: usize) -> Self {
        let mut counter = [0; SIMULTANEOUS_ESTIMATES];
        for (i, c) in counter.iter_mut().enumerate() {
            *c = LONG_STARTUP_PHASE_BLOCKS * (i as u32 + 1) / SIMULTANEOUS_ESTIMATES as u32;
        }
        Self {
            num_bins,
            density: vec![0.3; SIMULTANEOUS_ESTIMATES * num_bins],
            log_quantile: vec![8.0; SIMULTANEOUS_ESTIMATES * num_bins],
            quantile: vec![0.0; num_bins],
            counter,
            num_updates: 1,
        }
    }

    fn estimate(&mut self, magnitude: &[f32], noise: &mut [f32]) {
        const WIDTH: f32 = 0.01;
        let mut promote = None;
        for s in 0..SIMULTANEOUS_ESTIMATES {
            let offset = s * self.num_bins;
            let one_by_counter = 1.0 / (self.counter[s] as f32 + 1.0);
            for (i, &m) in magnitude.iter().enumerate() {
                let j = offset + i;
                let log_m = m.max(1e-10).ln();
                let delta = if self.density[j] > 1.0 {
                    40.0 / self.density[j]
                } else {
                    40.0
                };
                let step = delta * one_by_counter;
                if log_m > self.log_quantile[j] {
                    self.log_quantile[j] += 0.25 * step;
                } else {
                    self.log_quantile[j] -= 0.75 * step;
                }
                if (log_m - self.log_quantile[j]).abs() < WIDTH {
                    self.density[j] = (self.counter[s] as f32 * self.density[j] + 0.5 / WIDTH) * one_by_counter;
                }
            }
            if self.counter[s] >= LONG_STARTUP_PHASE_BLOCKS {
                self.counter[s] = 0;
                if self.num_updates >= LONG_STARTUP_PHASE_BLOCKS {
                    promote = Some(offset);
                }
            }
            self.counter[s] += 1;
        }
        if self.num_updates < LONG_STARTUP_PHASE_BLOCKS {
            promote = Some((SIMULTANEOUS_ESTIMATES - 1) * self.num_bins);
            self.num_updates += 1;
        }
        if let Some(offset) = promote {
            for (q, &l) in self.quantile.iter_mut().zip(&self.log_quantile[offset..]) {
                *q = l.exp() * QUARTILE_TO_MEAN;
            }
        }
        noise.copy_from_slice(&self.quantile);
    }
}

/// Directed-decision Wiener gain per bin.
#[derive(Debug, Clone)]
struct WienerFilter {
    previous_magnitude: Vec<f32>,
    initial_estimate: Vec<f32>,
    gains: Vec<f32>,
}

impl WienerFilter {
    fn new(num_bins: usize) -> Self {
        Self {
            previous_magnitude: vec![0.0; num_bins],
            initial_estimate: vec![0.0; num_bins],
            gains: vec![1.0; num_bins],
        }
    }

    fn update(
        &mut self,
        params: SuppressionParams,
        frames_analyzed: u32,
        magnitude: &[f32],
        noise: &[f32],
        previous_noise: &[f32],
    ) {
        let SuppressionParams {
            over_subtraction_factor: over,
            minimum_attenuating_gain: min_gain,
        } = params;
        for i in 0..self.gains.len() {
            let previous = self.previous_magnitude[i] / (previous_noise[i] + 1e-4) * self.gains[i];
            let current = if magnitude[i] > noise[i] {
                magnitude[i] / (noise[i] + 1e-4) - 1.0
            } else {
                0.0
            };
            let prior_snr = PRIOR_SNR_SMOOTHING * previous + (1.0 - PRIOR_SNR_SMOOTHING) * current;
            self.gains[i] = (prior_snr / (over + prior_snr)).clamp(min_gain, 1.0);
        }

        // Blend in a spectral-subtraction estimate while the noise tracker
        // has seen little audio.
        if frames_analyzed < SHORT_STARTUP_PHASE_BLOCKS {
            let weight = frames_analyzed as f32;
            let remaining = (SHORT_STARTUP_PHASE_BLOCKS - frames_analyzed) as f32;
            for i in 0..self.gains.len() {
                self.initial_estimate[i] += magnitude[i];
                let initial = ((self.initial_estimate[i] - over * noise[i] * (weight + 1.0))
                    / (self.initial_estimate[i] + 1e-4))
                    .clamp(min_gain, 1.0);
                self.gains[i] =
                    (self.gains[i] * weight + initial * remaining) / SHORT_STARTUP_PHASE_BLOCKS as f32;
            }
        }
        self.previous_magnitude.copy_from_slice(magnitude);
    }
}

#[derive(Debug)]
struct ChannelSuppressor {
    analyzer: Stft,
    synthesizer: Stft,
    noise_estimator: QuantileNoiseEstimator,
    filter: WienerFilter,
    magnitude: Vec<f32>,
    noise: Vec<f32>,
    previous_noise: Vec<f32>,
    upper_band_delay: Vec<Vec<f32>>,
    frames_analyzed: u32,
    speech_probability: f32,
}

impl ChannelSuppressor {
    fn new(hop: usize, num_bands: usize) -> Self {
        let num_bins = hop + 1;
        Self {
            analyzer: Stft::new(hop),
            synthesizer: Stft::new(hop),
            noise_estimator: QuantileNoiseEstimator::new(num_bins),
            filter: WienerFilter::new(num_bins),
            magnitude: vec![0.0; num_bins],
            noise: vec![0.0; num_bins],
            previous_noise: vec![0.0; num_bins],
            upper_band_delay: vec![vec![0.0; hop]; num_bands.saturating_sub(1)],
            frames_analyzed: 0,
            speech_probability: 0.0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct NoiseSuppression {
    enabled: bool,
    level: Level,
    format: StageFormat,
    channels: Vec<ChannelSuppressor>,
    block: Vec<f32>,
}

impl NoiseSuppression {
    pub(crate) fn new() -> Self {
        let mut ns = Self {
            enabled: false,
            level: Level::default(),
            format: StageFormat::default(),
            channels: Vec::new(),
            block: Vec::new(),
        };
        ns.initialize(&StageFormat::default());
        ns
    }

    /// Updates the noise estimate from the low band before echo control
    /// touches it.
    pub(crate) fn analyze_capture_audio(&mut self, audio: &mut AudioBuffer) {
        if !self.enabled {
            return;
        }
        let num_channels = audio.num_channels().min(self.channels.len());
        let bands = audio.split_bands_const_f();
        for (ch, state) in self.channels.iter_mut().enumerate().take(num_channels) {
            let spectrum = state.analyzer.analyze(bands.channel(LOW_BAND, ch));
            for (m, c) in state.magnitude.iter_mut().zip(spectrum.iter()) {
                *m = c.norm();
            }
            state.previous_noise.copy_from_slice(&state.noise);
            state.noise_estimator.estimate(&state.magnitude, &mut state.noise);

            let signal_power: f32 = state.magnitude.iter().map(|m| m * m).sum();
            let noise_power: f32 = state.noise.iter().map(|n| n * n).sum();
            let snr_db = 10.0 * ((signal_power + 1.0) / (noise_power + 1.0)).log10();
            let instant = 1.0 / (1.0 + (-(snr_db - 6.0) / 2.0).exp());
            state.speech_probability = 0.9 * state.speech_probability + 0.1 * instant;
            state.frames_analyzed = state.frames_analyzed.saturating_add(1);
        }
    }

    pub(crate) fn process_capture_audio(&mut self, audio: &mut AudioBuffer) {
        if !self.enabled {
            return;
        }
        let params = self.level.suppression_params();
        let num_channels = audio.num_channels().min(self.channels.len());
        let num_bands = audio.num_bands();
        let bands = audio.split_bands_f();
        for (ch, state) in self.channels.iter_mut().enumerate().take(num_channels) {
            self.block.clear();
            self.block.extend_from_slice(bands.channel(LOW_BAND, ch));
            let spectrum = state.synthesizer.analyze(&self.block);
            for (m, c) in state.magnitude.iter_mut().zip(spectrum.iter()) {
                *m = c.norm();
            }
            state.filter.update(
                params,
                state.frames_analyzed,
                &state.magnitude,
                &state.noise,
                &state.previous_noise,
            );
            let gains = &state.filter.gains;
            for (c, g) in spectrum.iter_mut().zip(gains) {
                *c *= *g;
            }
            state.synthesizer.synthesize(&mut self.block);
            bands.channel_mut(LOW_BAND, ch).copy_from_slice(&self.block);

            let upper = &gains[gains.len() / 2..];
            let upper_gain = upper.iter().sum::<f32>() / upper.len().max(1) as f32;
            for band in 1..num_bands {
                let delay = &mut state.upper_band_delay[band - 1];
                for (s, d) in bands.channel_mut(band, ch).iter_mut().zip(delay.iter_mut()) {
                    let current = *s;
                    *s = *d * upper_gain;
                    *d = current;
                }
            }
        }
    }

    /// Mean speech probability across channels of the last analyzed chunk.
    pub(crate) fn speech_probability(&self) -> f32 {
        if self.channels.is_empty() {
            return 0.0;
        }
        self.channels.iter().map(|c| c.speech_probability).sum::<f32>() / self.channels.len() as f32
    }

    /// Per-bin noise power of the low band, averaged across channels.
    pub(crate) fn noise_estimate(&self) -> Vec<f32> {
        let Some(first) = self.channels.first() else {
            return Vec::new();
        };
        let mut estimate = vec![0.0; first.noise.len()];
        for channel in &self.channels {
            for (e, n) in estimate.iter_mut().zip(&channel.noise) {
                *e += n * n;
            }
        }
        let scale = 1.0 / self.channels.len() as f32;
        estimate.iter_mut().for_each(|e| *e *= scale);
        estimate
    }
}

impl ProcessingComponent for NoiseSuppression {
    fn initialize(&mut self, format: &StageFormat) {
        self.format = *format;
        let hop = format.num_frames_per_band();
        self.channels = (0..format.num_proc_channels)
            .map(|_| ChannelSuppressor::new(hop, format.num_bands()))
            .collect();
        self.block = Vec::with_capacity(hop);
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, enable: bool) -> Result<(), Error> {
        if enable && !self.enabled {
            let format = self.format;
            self.initialize(&format);
        }
        self.enabled = enable;
        Ok(())
    }
}

/// Settings and state of the noise suppressor. Returned by
/// [`AudioProcessing::noise_suppression`].
#[derive(Debug, Clone, Copy)]
pub struct NoiseSuppressionHandle<'a> {
    apm: &'a AudioProcessing,
}

impl<'a> NoiseSuppressionHandle<'a> {
    pub(crate) fn new(apm: &'a AudioProcessing) -> Self {
        Self { apm }
    }

    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        self.apm.lock_capture().noise_suppression.enable(enable)
    }

    pub fn is_enabled(&self) -> bool {
        self.apm.lock_capture().noise_suppression.is_enabled()
    }

    pub fn set_level(&self, level: Level) {
        self.apm.lock_capture().noise_suppression.level = level;
    }

    pub fn level(&self) -> Level {
        self.apm.lock_capture().noise_suppression.level
    }

    /// Probability in [0, 1] that the last capture chunk held speech.
    pub fn speech_probability(&self) -> f32 {
        self.apm.lock_capture().noise_suppression.speech_probability()
    }

    /// Noise power per frequency bin of the low band. Empty while disabled.
    pub fn noise_estimate(&self) -> Vec<f32> {
        let capture = self.apm.lock_capture();
        if !capture.noise_suppression.is_enabled() {
            return Vec::new();
        }
        capture.noise_suppression.noise_estimate()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    struct Noise(u32);

    impl Noise {
        fn next(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (self.0 >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        }
    }

    fn run(ns: &mut NoiseSuppression, chunks: usize, mut sample: impl FnMut(usize) -> f32) -> (f32, f32) {
        let mut energies = (0.0, 0.0);
        for chunk in 0..chunks {
            let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
            for (i, s) in audio.channels_f().bands_mut(0).iter_mut().enumerate() {
                *s = sample(chunk * 160 + i);
            }
            let input: f32 = audio.channels_const_f().bands(0).iter().map(|x| x * x).sum();
            ns.analyze_capture_audio(&mut audio);
            ns.process_capture_audio(&mut audio);
            let output: f32 = audio.channels_const_f().bands(0).iter().map(|x| x * x).sum();
            energies = (input, output);
        }
        energies
    }

    fn enabled(level: Level) -> NoiseSuppression {
        let mut ns = NoiseSuppression::new();
        ns.level = level;
        ns.enable(true).unwrap();
        ns
    }

    #[test]
    fn attenuation_grows_with_level() {
        let params: Vec<f32> = [Level::Low, Level::Moderate, Level::High, Level::VeryHigh]
            .iter()
            .map(|l| l.suppression_params().minimum_attenuating_gain)
            .collect();
        assert!(params.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn stationary_noise_is_attenuated() {
        let mut ns = enabled(Level::High);
        let mut noise = Noise(5);
        let (input, output) = run(&mut ns, 400, |_| 1000.0 * noise.next());
        let attenuation_db = 10.0 * (input / output.max(1.0)).log10();
        assert!(attenuation_db > 6.0, "attenuation {attenuation_db} dB");
        assert!(!ns.noise_estimate().is_empty());
    }

    #[test]
    fn loud_tone_over_noise_survives() {
        let mut ns = enabled(Level::Moderate);
        let mut noise = Noise(9);
        let (_, _) = run(&mut ns, 300, |_| 100.0 * noise.next());
        let tone = |n: usize| 8000.0 * (2.0 * PI * 500.0 * n as f32 / 16000.0).sin();
        let (input, output) = run(&mut ns, 20, |n| tone(n) + 100.0 * noise.next());
        assert!(output > 0.5 * input, "input {input} output {output}");
        assert!(ns.speech_probability() > 0.5);
    }

    #[test]
    fn disabled_suppressor_is_transparent() {
        let mut ns = NoiseSuppression::new();
        let (input, output) = run(&mut ns, 3, |n| (n % 7) as f32 * 100.0);
        assert_eq!(input, output);
    }

    #[test]
    fn upper_bands_are_delayed_one_chunk() {
        let mut ns = NoiseSuppression::new();
        ns.initialize(&StageFormat {
            sample_rate_hz: 32000,
            split_rate_hz: 16000,
            ..StageFormat::default()
        });
        ns.enable(true).unwrap();
        let mut audio = AudioBuffer::new(320, 1, 320, 1, 320);
        audio.split_bands_f().channel_mut(1, 0).fill(500.0);
        ns.process_capture_audio(&mut audio);
        assert!(audio.split_bands_const_f().channel(1, 0).iter().all(|&s| s == 0.0));
        audio.split_bands_f().channel_mut(1, 0).fill(0.0);
        ns.process_capture_audio(&mut audio);
        assert!(audio.split_bands_const_f().channel(1, 0).iter().all(|&s| s > 0.0));
    }
}
