//! Second-order IIR sections applied in series (direct form I).

/// Coefficients of one section:
/// `y[n] = b0 x[n] + b1 x[n-1] + b2 x[n-2] - a1 y[n-1] - a2 y[n-2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiQuadCoefficients {
    pub b: [f32; 3],
    pub a: [f32; 2],
}

impl BiQuadCoefficients {
    /// Builds a section from Q12 fixed-point taps where the feedback taps are
    /// stored with the opposite sign (`y[n] = ... + a1 y[n-1] + a2 y[n-2]`).
    pub fn from_q12(b: [i16; 3], a: [i16; 2]) -> Self {
        const Q12: f32 = 4096.0;
        Self {
            b: b.map(|v| f32::from(v) / Q12),
            a: a.map(|v| -f32::from(v) / Q12),
        }
    }
}

#[derive(Debug, Clone)]
struct Section {
    coefficients: BiQuadCoefficients,
    x: [f32; 2],
    y: [f32; 2],
}

impl Section {
    fn run(&mut self, samples: &mut [f32]) {
        let BiQuadCoefficients { b, a } = self.coefficients;
        let [mut x1, mut x2] = self.x;
        let [mut y1, mut y2] = self.y;
        for v in samples.iter_mut() {
            let x0 = *v;
            let y0 = b[0] * x0 + b[1] * x1 + b[2] * x2 - a[0] * y1 - a[1] * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            *v = y0;
        }
        self.x = [x1, x2];
        self.y = [y1, y2];
    }
}

/// A chain of biquad sections with persistent state.
#[derive(Debug, Clone)]
pub struct CascadedBiQuadFilter {
    sections: Vec<Section>,
}

impl CascadedBiQuadFilter {
    pub fn new(coefficients: &[BiQuadCoefficients]) -> Self {
        Self {
            sections: coefficients
                .iter()
                .map(|&coefficients| Section {
                    coefficients,
                    x: [0.0; 2],
                    y: [0.0; 2],
                })
                .collect(),
        }
    }

    /// Filters `x` into `y`.
    pub fn process(&mut self, x: &[f32], y: &mut [f32]) {
        y.copy_from_slice(x);
        self.process_in_place(y);
    }

    pub fn process_in_place(&mut self, samples: &mut [f32]) {
        for section in &mut self.sections {
            section.run(samples);
        }
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.x = [0.0; 2];
            section.y = [0.0; 2];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoothing() -> BiQuadCoefficients {
        BiQuadCoefficients {
            b: [0.25, 0.5, 0.25],
            a: [0.1, 0.2],
        }
    }

    #[test]
    fn no_sections_passes_through() {
        let mut filter = CascadedBiQuadFilter::new(&[]);
        let mut out = [0.0f32; 3];
        filter.process(&[1.0, -2.0, 3.0], &mut out);
        assert_eq!(out, [1.0, -2.0, 3.0]);
    }

    #[test]
    fn impulse_response_follows_difference_equation() {
        let mut filter = CascadedBiQuadFilter::new(&[smoothing()]);
        let mut data = [1.0, 0.0, 0.0];
        filter.process_in_place(&mut data);
        assert!((data[0] - 0.25).abs() < 1e-6);
        assert!((data[1] - (0.5 - 0.1 * 0.25)).abs() < 1e-6);
        let y2 = 0.25 - 0.1 * data[1] - 0.2 * 0.25;
        assert!((data[2] - y2).abs() < 1e-6);
    }

    #[test]
    fn state_carries_across_calls() {
        let mut whole = CascadedBiQuadFilter::new(&[smoothing(), smoothing()]);
        let mut split = whole.clone();
        let input = [1.0, 0.5, -0.3, 0.7, -0.1, 0.4];
        let mut a = input;
        whole.process_in_place(&mut a);
        let mut b = input;
        split.process_in_place(&mut b[..2]);
        split.process_in_place(&mut b[2..]);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn reset_restores_initial_response() {
        let mut filter = CascadedBiQuadFilter::new(&[smoothing()]);
        let mut first = [1.0f32; 4];
        filter.process_in_place(&mut first);
        filter.reset();
        let mut second = [1.0f32; 4];
        filter.process_in_place(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn q12_taps_flip_feedback_sign() {
        let c = BiQuadCoefficients::from_q12([4096, -8192, 4096], [2048, -1024]);
        assert_eq!(c.b, [1.0, -2.0, 1.0]);
        assert_eq!(c.a, [-0.5, 0.25]);
    }
}
