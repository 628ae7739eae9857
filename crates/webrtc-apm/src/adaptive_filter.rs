//! Far-end history and the normalized LMS filter shared by the two echo
//! cancellers.

use std::collections::VecDeque;

/// Far-end (render) samples, newest last, with a bound on how far back the
/// cancellers may look.
#[derive(Debug, Clone)]
pub(crate) struct FarEndBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    // Render samples not yet matched by a capture chunk.
    unconsumed: usize,
}

impl FarEndBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::from(vec![0.0; capacity]),
            capacity,
            unconsumed: 0,
        }
    }

    pub(crate) fn push(&mut self, block: &[f32]) {
        for &s in block {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(s);
        }
        self.unconsumed = (self.unconsumed + block.len()).min(self.capacity);
    }

    /// Marks one capture chunk of `frames` samples as matched.
    pub(crate) fn consume(&mut self, frames: usize) {
        self.unconsumed = self.unconsumed.saturating_sub(frames);
    }

    /// Render samples buffered ahead of the capture side.
    pub(crate) fn system_delay_samples(&self) -> usize {
        self.unconsumed
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// The sample `lag` positions before the newest one. Zero beyond the
    /// history.
    #[inline]
    pub(crate) fn lagged(&self, lag: usize) -> f32 {
        if lag >= self.samples.len() {
            return 0.0;
        }
        self.samples[self.samples.len() - 1 - lag]
    }

    /// Copies `out.len()` samples ending `lag` samples before the newest
    /// one, oldest first.
    pub(crate) fn window(&self, lag: usize, out: &mut [f32]) {
        let len = out.len();
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.lagged(lag + len - 1 - i);
        }
    }

    /// Power of the newest `frames` samples.
    pub(crate) fn recent_energy(&self, frames: usize) -> f32 {
        (0..frames.min(self.samples.len()))
            .map(|lag| self.lagged(lag).powi(2))
            .sum()
    }

    pub(crate) fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
        self.unconsumed = 0;
    }
}

/// Normalized LMS filter estimating the echo path.
#[derive(Debug, Clone)]
pub(crate) struct NlmsFilter {
    taps: Vec<f32>,
    step_size: f32,
    regularization: f32,
}

impl NlmsFilter {
    pub(crate) fn new(num_taps: usize, step_size: f32, regularization: f32) -> Self {
        Self {
            taps: vec![0.0; num_taps],
            step_size,
            regularization,
        }
    }

    pub(crate) fn num_taps(&self) -> usize {
        self.taps.len()
    }

    pub(crate) fn taps(&self) -> &[f32] {
        &self.taps
    }

    pub(crate) fn set_taps(&mut self, taps: &[f32]) {
        assert_eq!(taps.len(), self.taps.len(), "tap count mismatch");
        self.taps.copy_from_slice(taps);
    }

    pub(crate) fn reset(&mut self) {
        self.taps.fill(0.0);
    }

    /// Echo estimate for the sample whose most recent reference is
    /// `reference[len - 1]`. `reference` holds at least `num_taps` samples,
    /// oldest first.
    #[inline]
    pub(crate) fn estimate(&self, reference: &[f32]) -> f32 {
        let n = self.taps.len();
        let recent = &reference[reference.len() - n..];
        self.taps
            .iter()
            .zip(recent.iter().rev())
            .map(|(w, x)| w * x)
            .sum()
    }

    /// Moves the taps along the reference in proportion to `error`.
    #[inline]
    pub(crate) fn adapt(&mut self, reference: &[f32], error: f32) {
        let n = self.taps.len();
        let recent = &reference[reference.len() - n..];
        let energy: f32 = recent.iter().map(|x| x * x).sum();
        let mu = self.step_size * error / (energy + self.regularization);
        for (w, x) in self.taps.iter_mut().zip(recent.iter().rev()) {
            *w += mu * x;
        }
    }

    /// Lag, in samples, of the strongest tap.
    pub(crate) fn peak_lag(&self) -> usize {
        self.taps
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map_or(0, |(lag, _)| lag)
    }
}

/// Runs `filter` over one chunk: `near` is replaced by the residual after
/// subtracting the echo estimate. `far` must hold `near.len() + num_taps - 1`
/// reference samples, oldest first. Returns the energy of the echo estimate.
pub(crate) fn cancel_chunk(
    filter: &mut NlmsFilter,
    far: &[f32],
    near: &mut [f32],
    adapt: bool,
) -> f32 {
    let taps = filter.num_taps();
    debug_assert_eq!(far.len(), near.len() + taps - 1);
    let mut echo_energy = 0.0;
    for (i, sample) in near.iter_mut().enumerate() {
        let reference = &far[..i + taps];
        let echo = filter.estimate(reference);
        let error = *sample - echo;
        if adapt {
            filter.adapt(reference, error);
        }
        echo_energy += echo * echo;
        *sample = error;
    }
    echo_energy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(seed: &mut u32) -> f32 {
        *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (*seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
    }

    #[test]
    fn far_end_buffer_keeps_newest_samples() {
        let mut buffer = FarEndBuffer::new(4);
        buffer.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(buffer.lagged(0), 5.0);
        assert_eq!(buffer.lagged(3), 2.0);
        assert_eq!(buffer.lagged(4), 0.0);
        let mut window = [0.0; 2];
        buffer.window(1, &mut window);
        assert_eq!(window, [3.0, 4.0]);
    }

    #[test]
    fn system_delay_tracks_unconsumed_render() {
        let mut buffer = FarEndBuffer::new(1000);
        buffer.push(&[0.0; 160]);
        buffer.push(&[0.0; 160]);
        buffer.consume(160);
        assert_eq!(buffer.system_delay_samples(), 160);
        buffer.consume(320);
        assert_eq!(buffer.system_delay_samples(), 0);
    }

    #[test]
    fn nlms_learns_a_pure_delay() {
        let taps = 16;
        let mut filter = NlmsFilter::new(taps, 0.5, 1e-3);
        let mut seed = 7;
        let far: Vec<f32> = (0..4000).map(|_| noise(&mut seed)).collect();
        let delay = 5;
        let mut residual = 0.0;
        for start in (taps..far.len() - 100).step_by(100) {
            let reference = &far[start - taps + 1..start + 100];
            let mut near: Vec<f32> = (0..100).map(|i| 0.5 * far[start + i - delay]).collect();
            cancel_chunk(&mut filter, reference, &mut near, true);
            residual = near.iter().map(|e| e * e).sum::<f32>();
        }
        assert!(residual < 1e-3, "residual {residual}");
        assert_eq!(filter.peak_lag(), delay);
        assert!((filter.taps()[delay] - 0.5).abs() < 0.01);
    }

    #[test]
    fn frozen_filter_does_not_adapt() {
        let mut filter = NlmsFilter::new(4, 0.5, 1e-3);
        let far = [1.0; 7];
        let mut near = [1.0; 4];
        cancel_chunk(&mut filter, &far, &mut near, false);
        assert!(filter.taps().iter().all(|&w| w == 0.0));
        assert_eq!(near, [1.0; 4]);
    }
}
