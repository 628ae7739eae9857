//! Three-band analysis/synthesis filter bank for 48 kHz processing.
//!
//! A prototype lowpass is split into `NUM_BANDS * SPARSITY` polyphase
//! components, each run as a sparse FIR on a downsampled branch, then
//! cosine-modulated into the three bands. Synthesis mirrors the structure.
//! Reconstruction is near-perfect up to a fixed delay.

use std::f32::consts::PI;

pub(crate) const NUM_BANDS: usize = 3;
const SPARSITY: usize = 4;
const NUM_TAPS: usize = 4;
const NUM_FILTERS: usize = NUM_BANDS * SPARSITY;

#[rustfmt::skip]
const PROTOTYPE_TAPS: [[f32; NUM_TAPS]; NUM_FILTERS] = [
    [-0.00047749, -0.00496888,  0.16547118,  0.00425496],
    [-0.00173287, -0.01585778,  0.14989004,  0.00994113],
    [-0.00304815, -0.02536082,  0.12154542,  0.01157993],
    [-0.00383509, -0.02982767,  0.08543175,  0.00983212],
    [-0.00346946, -0.02587886,  0.04760441,  0.00607594],
    [-0.00154717, -0.01136076,  0.01387458,  0.00186353],
    [ 0.00186353,  0.01387458, -0.01136076, -0.00154717],
    [ 0.00607594,  0.04760441, -0.02587886, -0.00346946],
    [ 0.00983212,  0.08543175, -0.02982767, -0.00383509],
    [ 0.01157993,  0.12154542, -0.02536082, -0.00304815],
    [ 0.00994113,  0.14989004, -0.01585778, -0.00173287],
    [ 0.00425496,  0.16547118, -0.00496888, -0.00047749],
];

/// FIR whose taps sit `sparsity` samples apart, starting `offset` samples
/// into the past.
#[derive(Debug, Clone)]
struct SparseFir {
    taps: [f32; NUM_TAPS],
    sparsity: usize,
    offset: usize,
    history: Vec<f32>,
}

impl SparseFir {
    fn new(taps: [f32; NUM_TAPS], sparsity: usize, offset: usize) -> Self {
        Self {
            taps,
            sparsity,
            offset,
            history: vec![0.0; (NUM_TAPS - 1) * sparsity + offset],
        }
    }

    fn filter(&mut self, input: &[f32], output: &mut [f32]) {
        let hist = self.history.len();
        for (i, out) in output.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (j, &tap) in self.taps.iter().enumerate() {
                let back = j * self.sparsity + self.offset;
                acc += tap
                    * if i >= back {
                        input[i - back]
                    } else {
                        self.history[hist + i - back]
                    };
            }
            *out = acc;
        }
        if hist == 0 {
            return;
        }
        let n = input.len();
        if n >= hist {
            self.history.copy_from_slice(&input[n - hist..]);
        } else {
            self.history.copy_within(n.., 0);
            self.history[hist - n..].copy_from_slice(input);
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ThreeBandFilterBank {
    analysis: Vec<SparseFir>,
    synthesis: Vec<SparseFir>,
    modulation: [[f32; NUM_BANDS]; NUM_FILTERS],
    branch_in: Vec<f32>,
    branch_out: Vec<f32>,
}

impl ThreeBandFilterBank {
    /// `full_band_frames` is the full-band frame length; it must split into
    /// three equal bands.
    pub(crate) fn new(full_band_frames: usize) -> Self {
        assert!(
            full_band_frames.is_multiple_of(NUM_BANDS),
            "frame length {full_band_frames} does not split into {NUM_BANDS} bands"
        );
        let split = full_band_frames / NUM_BANDS;
        let make = || {
            (0..NUM_FILTERS)
                .map(|k| SparseFir::new(PROTOTYPE_TAPS[k], SPARSITY, k / NUM_BANDS))
                .collect::<Vec<_>>()
        };
        let mut modulation = [[0.0; NUM_BANDS]; NUM_FILTERS];
        for (k, row) in modulation.iter_mut().enumerate() {
            for (band, m) in row.iter_mut().enumerate() {
                *m = 2.0
                    * (2.0 * PI * k as f32 * (2.0 * band as f32 + 1.0) / NUM_FILTERS as f32).cos();
            }
        }
        Self {
            analysis: make(),
            synthesis: make(),
            modulation,
            branch_in: vec![0.0; split],
            branch_out: vec![0.0; split],
        }
    }

    pub(crate) fn split_frames(&self) -> usize {
        self.branch_in.len()
    }

    /// Splits `input` into the three `bands`.
    pub(crate) fn analysis(&mut self, input: &[f32], bands: &mut [&mut [f32]; NUM_BANDS]) {
        let split = self.split_frames();
        assert_eq!(input.len(), split * NUM_BANDS, "full-band length mismatch");
        for band in bands.iter_mut() {
            band[..split].fill(0.0);
        }
        for phase in 0..NUM_BANDS {
            let pick = NUM_BANDS - 1 - phase;
            for (d, s) in self.branch_in.iter_mut().zip(input.iter().skip(pick).step_by(NUM_BANDS)) {
                *d = *s;
            }
            for step in 0..SPARSITY {
                let k = phase + step * NUM_BANDS;
                self.analysis[k].filter(&self.branch_in, &mut self.branch_out);
                for (band, out) in bands.iter_mut().enumerate() {
                    let m = self.modulation[k][band];
                    for (o, &v) in out.iter_mut().zip(&self.branch_out) {
                        *o += m * v;
                    }
                }
            }
        }
    }

    /// Reconstructs the full band `output` from `bands`.
    pub(crate) fn synthesis(&mut self, bands: &[&[f32]; NUM_BANDS], output: &mut [f32]) {
        let split = self.split_frames();
        assert_eq!(output.len(), split * NUM_BANDS, "full-band length mismatch");
        output.fill(0.0);
        for phase in 0..NUM_BANDS {
            for step in 0..SPARSITY {
                let k = phase + step * NUM_BANDS;
                self.branch_in.fill(0.0);
                for (band, data) in bands.iter().enumerate() {
                    let m = self.modulation[k][band];
                    for (d, &v) in self.branch_in.iter_mut().zip(data.iter()) {
                        *d += m * v;
                    }
                }
                self.synthesis[k].filter(&self.branch_in, &mut self.branch_out);
                for (o, &v) in output
                    .iter_mut()
                    .skip(phase)
                    .step_by(NUM_BANDS)
                    .zip(&self.branch_out)
                {
                    *o += NUM_BANDS as f32 * v;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_fir_delays_by_offset() {
        let mut fir = SparseFir::new([1.0, 0.0, 0.0, 0.0], 4, 2);
        let mut out = [0.0f32; 4];
        fir.filter(&[1.0, 2.0, 3.0, 4.0], &mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0]);
        fir.filter(&[5.0, 6.0, 7.0, 8.0], &mut out);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn sparse_fir_history_survives_short_blocks() {
        let mut long = SparseFir::new([0.5, 0.25, 0.125, 0.0625], 4, 1);
        let mut short = long.clone();
        let input: Vec<f32> = (0..24).map(|i| i as f32).collect();
        let mut a = vec![0.0f32; 24];
        long.filter(&input, &mut a);
        let mut b = vec![0.0f32; 24];
        for (src, dst) in input.chunks(3).zip(b.chunks_mut(3)) {
            short.filter(src, dst);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn silence_in_silence_out() {
        let mut bank = ThreeBandFilterBank::new(480);
        let input = [0.0f32; 480];
        let mut b0 = [1.0f32; 160];
        let mut b1 = [1.0f32; 160];
        let mut b2 = [1.0f32; 160];
        bank.analysis(&input, &mut [&mut b0, &mut b1, &mut b2]);
        assert!(b0.iter().chain(&b1).chain(&b2).all(|&v| v == 0.0));
        let mut out = [1.0f32; 480];
        bank.synthesis(&[&b0, &b1, &b2], &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn modulation_zeroes_the_quarter_phases() {
        let bank = ThreeBandFilterBank::new(480);
        for k in [3, 9] {
            assert!(bank.modulation[k].iter().all(|m| m.abs() < 1e-5));
        }
    }
}
