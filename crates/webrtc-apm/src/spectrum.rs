//! Short-time Fourier transform with 50 % overlap, used by the spectral
//! stages (noise suppression, intelligibility enhancement).
//!
//! Each chunk of `hop` samples is appended to the previous chunk, windowed
//! with a square-root Hann window and transformed. Synthesis applies the same
//! window and overlap-adds, which reconstructs the input delayed by one hop
//! when the spectrum is left untouched.

use std::f32::consts::PI;
use std::sync::Arc;

use derive_more::Debug;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

#[derive(Debug)]
pub(crate) struct Stft {
    hop: usize,
    #[debug(skip)]
    forward: Arc<dyn Fft<f32>>,
    #[debug(skip)]
    inverse: Arc<dyn Fft<f32>>,
    #[debug(skip)]
    window: Vec<f32>,
    #[debug(skip)]
    history: Vec<f32>,
    #[debug(skip)]
    overlap: Vec<f32>,
    #[debug(skip)]
    spectrum: Vec<Complex<f32>>,
    #[debug(skip)]
    scratch: Vec<Complex<f32>>,
}

impl Stft {
    pub(crate) fn new(hop: usize) -> Self {
        assert!(hop > 0, "hop must be > 0");
        let fft_size = 2 * hop;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let window = (0..fft_size)
            .map(|n| (PI * (n as f32 + 0.5) / fft_size as f32).sin())
            .collect();
        Self {
            hop,
            forward,
            inverse,
            window,
            history: vec![0.0; hop],
            overlap: vec![0.0; hop],
            spectrum: vec![Complex::default(); fft_size],
            scratch: vec![Complex::default(); scratch_len],
        }
    }

    pub(crate) fn hop(&self) -> usize {
        self.hop
    }

    /// Bins from DC to Nyquist.
    pub(crate) fn num_bins(&self) -> usize {
        self.hop + 1
    }

    /// Transforms the previous chunk plus `block`. The returned spectrum
    /// holds `num_bins` bins; the mirrored half is kept in sync by
    /// [`synthesize`](Self::synthesize).
    pub(crate) fn analyze(&mut self, block: &[f32]) -> &mut [Complex<f32>] {
        assert_eq!(block.len(), self.hop, "block must be one hop long");
        let (first, second) = self.spectrum.split_at_mut(self.hop);
        for ((dst, &x), &w) in first.iter_mut().zip(&self.history).zip(&self.window) {
            *dst = Complex::new(x * w, 0.0);
        }
        for ((dst, &x), &w) in second
            .iter_mut()
            .zip(block)
            .zip(&self.window[self.hop..])
        {
            *dst = Complex::new(x * w, 0.0);
        }
        self.history.copy_from_slice(block);
        self.forward
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
        &mut self.spectrum[..=self.hop]
    }

    /// The spectrum from the last [`analyze`](Self::analyze), for edits
    /// made after other state was updated from it.
    pub(crate) fn spectrum_mut(&mut self) -> &mut [Complex<f32>] {
        &mut self.spectrum[..=self.hop]
    }

    /// Inverse transform of the (possibly modified) spectrum from the last
    /// [`analyze`](Self::analyze), overlap-added into `out`.
    pub(crate) fn synthesize(&mut self, out: &mut [f32]) {
        assert_eq!(out.len(), self.hop, "output must be one hop long");
        let n = self.spectrum.len();
        for k in 1..self.hop {
            self.spectrum[n - k] = self.spectrum[k].conj();
        }
        self.inverse
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
        let scale = 1.0 / n as f32;
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.overlap[i] + self.spectrum[i].re * scale * self.window[i];
        }
        for (i, o) in self.overlap.iter_mut().enumerate() {
            *o = self.spectrum[self.hop + i].re * scale * self.window[self.hop + i];
        }
    }

    /// Analysis, an in-place spectral edit, and synthesis in one call.
    pub(crate) fn process(&mut self, block: &mut [f32], edit: impl FnOnce(&mut [Complex<f32>])) {
        edit(self.analyze(block));
        self.synthesize(block);
    }

    pub(crate) fn reset(&mut self) {
        self.history.fill(0.0);
        self.overlap.fill(0.0);
    }
}

/// Squared magnitudes of `spectrum` written to `power`.
pub(crate) fn power_spectrum(spectrum: &[Complex<f32>], power: &mut [f32]) {
    for (p, c) in power.iter_mut().zip(spectrum) {
        *p = c.norm_sqr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_spectrum_reconstructs_delayed_input() {
        let hop = 80;
        let mut stft = Stft::new(hop);
        let input: Vec<f32> = (0..hop * 6).map(|n| (n as f32 * 0.13).sin() * 1000.0).collect();
        let mut output = Vec::new();
        for chunk in input.chunks(hop) {
            let mut block = chunk.to_vec();
            stft.process(&mut block, |_| {});
            output.extend(block);
        }
        for n in hop..input.len() {
            assert!(
                (output[n] - input[n - hop]).abs() < 0.05,
                "sample {n}: {} vs {}",
                output[n],
                input[n - hop]
            );
        }
    }

    #[test]
    fn zeroed_spectrum_silences_output() {
        let mut stft = Stft::new(160);
        let mut out = vec![0.0; 160];
        for _ in 0..3 {
            let mut block = vec![100.0; 160];
            stft.process(&mut block, |bins| bins.fill(Complex::default()));
            out = block;
        }
        assert!(out.iter().all(|&x| x.abs() < 1e-3));
    }

    #[test]
    fn tone_energy_lands_in_its_bin() {
        let hop = 160;
        let mut stft = Stft::new(hop);
        // Bin 10 of a 320-point transform at 16 kHz is 500 Hz.
        let tone: Vec<f32> = (0..2 * hop)
            .map(|n| (2.0 * PI * 10.0 * n as f32 / (2 * hop) as f32).sin())
            .collect();
        stft.analyze(&tone[..hop]);
        let spectrum = stft.analyze(&tone[hop..]);
        let mut power = vec![0.0; hop + 1];
        power_spectrum(spectrum, &mut power);
        let peak = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k);
        assert_eq!(peak, Some(10));
    }
}
