//! Float comparison and signal measures for checking processed audio.

use std::fmt;

/// Per-sample differences between processed and reference audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub worst_diff: f32,
    pub worst_index: usize,
    pub mean_diff: f32,
    /// Samples that differ by more than the tolerance.
    pub mismatches: usize,
    pub len: usize,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} samples off, worst {} at {}, mean {}",
            self.mismatches, self.len, self.worst_diff, self.worst_index, self.mean_diff,
        )
    }
}

/// Compares `actual` against `expected` sample by sample.
pub fn compare_f32(actual: &[f32], expected: &[f32], tolerance: f32) -> Comparison {
    assert_eq!(actual.len(), expected.len(), "Length mismatch");
    let diffs = actual.iter().zip(expected).map(|(a, e)| (a - e).abs());
    let (worst_index, worst_diff) = diffs
        .clone()
        .enumerate()
        .fold((0, 0.0f32), |best, (i, d)| if d > best.1 { (i, d) } else { best });
    let sum: f64 = diffs.clone().map(f64::from).sum();
    Comparison {
        worst_diff,
        worst_index,
        mean_diff: if actual.is_empty() { 0.0 } else { (sum / actual.len() as f64) as f32 },
        mismatches: diffs.filter(|&d| d > tolerance).count(),
        len: actual.len(),
    }
}

/// Assert two f32 slices are equal within absolute tolerance.
pub fn assert_f32_near(actual: &[f32], expected: &[f32], tolerance: f32) {
    let result = compare_f32(actual, expected, tolerance);
    assert!(
        result.mismatches == 0,
        "f32 comparison failed: {result}\n  actual[{i}]={}, expected[{i}]={}",
        actual[result.worst_index],
        expected[result.worst_index],
        i = result.worst_index,
    );
}

/// Assert two i16 slices differ by at most `tolerance` per sample. Float to
/// S16 round trips land within one step.
pub fn assert_i16_near(actual: &[i16], expected: &[i16], tolerance: u16) {
    assert_eq!(actual.len(), expected.len(), "Length mismatch");
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            a.abs_diff(e) <= tolerance,
            "Mismatch at index {i}: actual={a}, expected={e}"
        );
    }
}

/// Mean square of `data`.
pub fn energy(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|x| x * x).sum::<f32>() / data.len() as f32
}

/// Largest normalized cross-correlation of `b` against `a` delayed by
/// `0..a.len()` samples. Filter banks delay their output, so reconstruction
/// checks compare at the best lag.
pub fn max_cross_correlation(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Length mismatch");
    let n = a.len();
    (0..n)
        .map(|delay| (delay..n).map(|j| a[j - delay] * b[j]).sum::<f32>() / n as f32)
        .fold(0.0, f32::max)
}
