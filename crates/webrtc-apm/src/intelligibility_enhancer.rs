//! Render-side speech intelligibility enhancement.
//!
//! The far-end speech is reshaped spectrally so that bins masked by the
//! near-end noise gain level and unmasked bins give it up, keeping the total
//! render power unchanged. The near-end noise spectrum arrives from the
//! capture thread through a [`NoiseEstimateFeed`].

use std::sync::Arc;

use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::spectrum::{power_spectrum, Stft};
use crate::swap_queue::SwapQueue;

/// Noise spectra in flight between capture and render.
pub(crate) const NOISE_QUEUE_CAPACITY: usize = 100;

const MAX_GAIN: f32 = 2.0;
const MIN_GAIN: f32 = 0.5;
/// Largest relative gain change per block.
const GAIN_CHANGE_LIMIT: f32 = 0.1;
const POWER_SMOOTHING: f32 = 0.9;
/// Mean bin power below which the render stream is treated as silent.
const ACTIVITY_POWER: f32 = 1.0;
const EPSILON: f32 = 1e-6;

/// Creates the two ends of the capture-to-render noise spectrum queue for
/// spectra of `num_bins` bins.
pub(crate) fn noise_estimate_feed(num_bins: usize) -> (NoiseEstimateFeed, NoiseEstimateReader) {
    let queue = Arc::new(SwapQueue::with_factory(NOISE_QUEUE_CAPACITY, || {
        Vec::with_capacity(num_bins)
    }));
    (
        NoiseEstimateFeed {
            queue: Arc::clone(&queue),
            scratch: Vec::with_capacity(num_bins),
            discard: Vec::with_capacity(num_bins),
        },
        NoiseEstimateReader {
            queue,
            scratch: Vec::with_capacity(num_bins),
        },
    )
}

/// Capture end. Never blocks on the render side: when the queue is full the
/// oldest spectrum is dropped.
#[derive(Debug)]
pub(crate) struct NoiseEstimateFeed {
    queue: Arc<SwapQueue<Vec<f32>>>,
    scratch: Vec<f32>,
    discard: Vec<f32>,
}

impl NoiseEstimateFeed {
    /// Queues a noise power spectrum raised by `gain_db` of capture gain.
    pub(crate) fn send(&mut self, noise_power: &[f32], gain_db: f32) {
        let power_gain = 10f32.powf(gain_db / 10.0);
        self.scratch.clear();
        self.scratch.extend(noise_power.iter().map(|&p| p * power_gain));
        if !self.queue.insert(&mut self.scratch) {
            self.queue.remove(&mut self.discard);
            let inserted = self.queue.insert(&mut self.scratch);
            debug_assert!(inserted);
        }
    }
}

/// Render end, owned by the enhancer.
#[derive(Debug)]
pub(crate) struct NoiseEstimateReader {
    queue: Arc<SwapQueue<Vec<f32>>>,
    scratch: Vec<f32>,
}

impl NoiseEstimateReader {
    /// The most recent spectrum, if any arrived since the last call.
    fn latest(&mut self) -> Option<&[f32]> {
        let mut received = false;
        while self.queue.remove(&mut self.scratch) {
            received = true;
        }
        received.then_some(self.scratch.as_slice())
    }
}

#[derive(Debug)]
pub(crate) struct IntelligibilityEnhancer {
    stft: Stft,
    noise_rx: NoiseEstimateReader,
    sample_rate_hz: usize,
    noise_sample_rate_hz: usize,
    noise: Vec<f32>,
    clear: Vec<f32>,
    power: Vec<f32>,
    target: Vec<f32>,
    gains: Vec<f32>,
    block: Vec<f32>,
}

impl IntelligibilityEnhancer {
    /// `sample_rate_hz` is the render low-band rate and `noise_sample_rate_hz`
    /// the capture low-band rate the noise spectra are measured at.
    pub(crate) fn new(
        sample_rate_hz: usize,
        noise_sample_rate_hz: usize,
        noise_rx: NoiseEstimateReader,
    ) -> Self {
        let stft = Stft::new(sample_rate_hz / 100);
        let num_bins = stft.num_bins();
        tracing::debug!(sample_rate_hz, noise_sample_rate_hz, "intelligibility enhancer");
        Self {
            stft,
            noise_rx,
            sample_rate_hz,
            noise_sample_rate_hz,
            noise: vec![0.0; num_bins],
            clear: vec![0.0; num_bins],
            power: vec![0.0; num_bins],
            target: vec![1.0; num_bins],
            gains: vec![1.0; num_bins],
            block: Vec::with_capacity(sample_rate_hz / 100),
        }
    }

    /// Maps the latest capture noise spectrum onto the render bins by
    /// frequency.
    fn update_noise(&mut self) {
        let Some(estimate) = self.noise_rx.latest() else {
            return;
        };
        if estimate.len() < 2 {
            return;
        }
        let render_bin_hz = self.sample_rate_hz as f32 / (2 * (self.noise.len() - 1)) as f32;
        let noise_bin_hz = self.noise_sample_rate_hz as f32 / (2 * (estimate.len() - 1)) as f32;
        for (k, n) in self.noise.iter_mut().enumerate() {
            let idx = (k as f32 * render_bin_hz / noise_bin_hz).round() as usize;
            *n = estimate[idx.min(estimate.len() - 1)];
        }
    }

    /// Gains that lift masked bins, normalized to keep the clear power.
    fn update_target(&mut self) {
        let clear_total: f32 = self.clear.iter().sum();
        let noise_total: f32 = self.noise.iter().sum();
        let active = clear_total / self.clear.len() as f32 > ACTIVITY_POWER;
        if !active || noise_total <= 0.0 {
            self.target.fill(1.0);
            return;
        }
        for ((t, &c), &n) in self.target.iter_mut().zip(&self.clear).zip(&self.noise) {
            *t = ((c + n) / (c + EPSILON)).sqrt().min(MAX_GAIN);
        }
        let boosted: f32 = self
            .target
            .iter()
            .zip(&self.clear)
            .map(|(&t, &c)| t * t * c)
            .sum();
        let scale = (clear_total / boosted.max(EPSILON)).sqrt();
        for t in &mut self.target {
            *t = (*t * scale).clamp(MIN_GAIN, MAX_GAIN);
        }
    }

    fn step_gains(&mut self) {
        for (g, &t) in self.gains.iter_mut().zip(&self.target) {
            let limit = *g * GAIN_CHANGE_LIMIT;
            *g += (t - *g).clamp(-limit, limit);
        }
    }

    /// Enhances the low band of the (mono) render stream in place, one chunk
    /// late.
    pub(crate) fn process_render_audio(&mut self, audio: &mut AudioBuffer) {
        self.update_noise();
        let hop = self.stft.hop();
        let low = audio.split_bands_f().channel_mut(LOW_BAND, 0);
        debug_assert_eq!(low.len(), hop);

        self.block.clear();
        self.block.extend_from_slice(low);
        let spectrum = self.stft.analyze(&self.block);
        power_spectrum(spectrum, &mut self.power);
        for (c, &p) in self.clear.iter_mut().zip(&self.power) {
            *c = POWER_SMOOTHING * *c + (1.0 - POWER_SMOOTHING) * p;
        }
        self.update_target();
        self.step_gains();

        let spectrum = self.stft.spectrum_mut();
        for (bin, &g) in spectrum.iter_mut().zip(&self.gains) {
            *bin *= g;
        }
        self.stft.synthesize(low);
    }

    #[cfg(test)]
    fn gains(&self) -> &[f32] {
        &self.gains
    }
}
