//! Microphone-array beamforming on the capture side.
//!
//! A [`Beamformer`] collapses the band-split capture channels into one
//! channel steered at the talker. Custom implementations can be handed to
//! [`AudioProcessingBuilder::beamformer`](crate::AudioProcessingBuilder::beamformer);
//! otherwise [`DelayAndSumBeamformer`] is built from the configured array
//! geometry.

use std::fmt::Debug;

use webrtc_common_audio::channel_buffer::ChannelBuffer;

use crate::config::{Point, SphericalPoint};

const SPEED_OF_SOUND_M_PER_S: f32 = 343.0;
/// Output to input power ratio above which the talker is taken to be in the
/// steered direction.
const TARGET_COHERENCE: f32 = 0.6;
const COHERENCE_SMOOTHING: f32 = 0.9;

pub trait Beamformer: Send + Debug {
    /// Prepares for chunks of `chunk_size_ms` at `sample_rate_hz`, the rate
    /// of a single band.
    fn initialize(&mut self, chunk_size_ms: usize, sample_rate_hz: usize);

    /// Steers every band of `data` in place. The result is left in channel 0.
    fn process_chunk(&mut self, data: &mut ChannelBuffer<f32>);

    /// Whether the last chunk had the talker in the steered direction.
    fn is_target_present(&self) -> bool;
}

/// Fractional delay line on one band of one microphone.
#[derive(Debug, Clone)]
struct DelayLine {
    history: Vec<f32>,
    whole: usize,
    frac: f32,
}

impl DelayLine {
    fn new(delay_samples: f32, max_delay: usize) -> Self {
        Self {
            history: vec![0.0; max_delay + 1],
            whole: delay_samples.floor() as usize,
            frac: delay_samples.fract(),
        }
    }

    /// Adds the delayed `input` into `out`.
    fn accumulate(&mut self, input: &[f32], out: &mut [f32]) {
        let h = self.history.len();
        let at = |n: isize, history: &[f32]| -> f32 {
            if n >= 0 {
                input[n as usize]
            } else {
                history[(h as isize + n) as usize]
            }
        };
        for (i, o) in out.iter_mut().enumerate() {
            let n = i as isize - self.whole as isize;
            let a = at(n, &self.history);
            let b = at(n - 1, &self.history);
            *o += (1.0 - self.frac) * a + self.frac * b;
        }
        if input.len() >= h {
            self.history.copy_from_slice(&input[input.len() - h..]);
        } else {
            self.history.rotate_left(input.len());
            self.history[h - input.len()..].copy_from_slice(input);
        }
    }
}

/// Time-aligns the microphones on the target direction and averages them.
#[derive(Debug)]
pub struct DelayAndSumBeamformer {
    geometry: Vec<Point>,
    target: SphericalPoint,
    lines: Vec<Vec<DelayLine>>,
    out: Vec<f32>,
    coherence: f32,
}

impl DelayAndSumBeamformer {
    pub fn new(geometry: &[Point], target: SphericalPoint) -> Self {
        assert!(!geometry.is_empty(), "array geometry has no microphones");
        Self {
            geometry: geometry.to_vec(),
            target,
            lines: Vec::new(),
            out: Vec::new(),
            coherence: 0.0,
        }
    }

    /// Steering delays in seconds, all non-negative.
    fn steering_delays(&self) -> Vec<f32> {
        let (sin_az, cos_az) = self.target.azimuth.sin_cos();
        let (sin_el, cos_el) = self.target.elevation.sin_cos();
        let dir = Point::new(cos_az * cos_el, sin_az * cos_el, sin_el);
        let n = self.geometry.len() as f32;
        let center = self.geometry.iter().fold(Point::default(), |acc, p| {
            Point::new(acc.x + p.x / n, acc.y + p.y / n, acc.z + p.z / n)
        });
        // Microphones further along `dir` hear the talker earlier.
        let lead: Vec<f32> = self
            .geometry
            .iter()
            .map(|p| {
                ((p.x - center.x) * dir.x + (p.y - center.y) * dir.y + (p.z - center.z) * dir.z)
                    / SPEED_OF_SOUND_M_PER_S
            })
            .collect();
        let latest = lead.iter().copied().fold(f32::MAX, f32::min);
        lead.iter().map(|&l| l - latest).collect()
    }

    fn aperture_m(&self) -> f32 {
        self.geometry
            .iter()
            .flat_map(|a| self.geometry.iter().map(move |b| a.distance(b)))
            .fold(0.0, f32::max)
    }
}

impl Beamformer for DelayAndSumBeamformer {
    fn initialize(&mut self, chunk_size_ms: usize, sample_rate_hz: usize) {
        let rate = sample_rate_hz as f32;
        let max_delay = (self.aperture_m() / SPEED_OF_SOUND_M_PER_S * rate).ceil() as usize + 1;
        let delays = self.steering_delays();
        tracing::debug!(?delays, max_delay, chunk_size_ms, "beamformer steering");
        // One set of lines per band, filled lazily on the first chunk.
        self.lines = vec![
            delays
                .iter()
                .map(|&d| DelayLine::new(d * rate, max_delay))
                .collect()
        ];
        self.out = vec![0.0; chunk_size_ms * sample_rate_hz / 1000];
        self.coherence = 0.0;
    }

    fn process_chunk(&mut self, data: &mut ChannelBuffer<f32>) {
        let num_mics = self.geometry.len();
        assert_eq!(data.num_channels(), num_mics, "one channel per microphone");
        if self.lines.is_empty() {
            self.initialize(10, data.num_frames_per_band() * 100);
        }
        while self.lines.len() < data.num_bands() {
            let template = self.lines[0].clone();
            self.lines.push(template);
        }
        self.out.resize(data.num_frames_per_band(), 0.0);

        let scale = 1.0 / num_mics as f32;
        for (band, lines) in self.lines.iter_mut().enumerate().take(data.num_bands()) {
            self.out.fill(0.0);
            let mut input_power = 0.0;
            for (ch, line) in lines.iter_mut().enumerate() {
                let input = data.channel(band, ch);
                input_power += input.iter().map(|x| x * x).sum::<f32>();
                line.accumulate(input, &mut self.out);
            }
            for o in &mut self.out {
                *o *= scale;
            }
            if band == 0 {
                let output_power: f32 = self.out.iter().map(|x| x * x).sum();
                let ratio = if input_power > 0.0 {
                    output_power / (input_power * scale)
                } else {
                    0.0
                };
                self.coherence =
                    COHERENCE_SMOOTHING * self.coherence + (1.0 - COHERENCE_SMOOTHING) * ratio;
            }
            data.channel_mut(band, 0).copy_from_slice(&self.out);
        }
    }

    fn is_target_present(&self) -> bool {
        self.coherence > TARGET_COHERENCE
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use super::*;

    const RATE: usize = 16000;

    fn linear_array() -> Vec<Point> {
        vec![Point::new(-0.05, 0.0, 0.0), Point::new(0.05, 0.0, 0.0)]
    }

    fn tone(n: usize) -> f32 {
        1000.0 * (2.0 * PI * 500.0 * n as f32 / RATE as f32).sin()
    }

    struct Noise(u32);

    impl Noise {
        fn next(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (self.0 >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        }
    }

    #[test]
    fn broadside_target_has_no_steering_delay() {
        let bf = DelayAndSumBeamformer::new(&linear_array(), SphericalPoint::default());
        let delays = bf.steering_delays();
        assert!(delays.iter().all(|d| d.abs() < 1e-7), "{delays:?}");
    }

    #[test]
    fn endfire_target_delays_the_leading_microphone() {
        let target = SphericalPoint {
            azimuth: 0.0,
            ..SphericalPoint::default()
        };
        let bf = DelayAndSumBeamformer::new(&linear_array(), target);
        let delays = bf.steering_delays();
        assert!(delays[0].abs() < 1e-7);
        assert!((delays[1] - 0.1 / SPEED_OF_SOUND_M_PER_S).abs() < 1e-6);
    }

    #[test]
    fn coherent_target_is_present_and_passes() {
        let mut bf = DelayAndSumBeamformer::new(&linear_array(), SphericalPoint::default());
        bf.initialize(10, RATE);
        let mut data = ChannelBuffer::new(160, 2, 1);
        for chunk in 0..50 {
            for ch in 0..2 {
                for (i, s) in data.bands_mut(ch).iter_mut().enumerate() {
                    *s = tone(chunk * 160 + i);
                }
            }
            bf.process_chunk(&mut data);
        }
        assert!(bf.is_target_present());
        let last = chunk_tone(49);
        for (out, expected) in data.bands(0).iter().zip(&last) {
            assert!((out - expected).abs() < 1.0);
        }
    }

    fn chunk_tone(chunk: usize) -> Vec<f32> {
        (0..160).map(|i| tone(chunk * 160 + i)).collect()
    }

    #[test]
    fn uncorrelated_channels_are_not_a_target() {
        let mut bf = DelayAndSumBeamformer::new(&linear_array(), SphericalPoint::default());
        bf.initialize(10, RATE);
        let mut rng = Noise(3);
        let mut data = ChannelBuffer::new(160, 2, 1);
        for _ in 0..50 {
            for ch in 0..2 {
                for s in data.bands_mut(ch) {
                    *s = 1000.0 * rng.next();
                }
            }
            bf.process_chunk(&mut data);
        }
        assert!(!bf.is_target_present());
    }

    #[test]
    fn every_band_is_steered() {
        let target = SphericalPoint {
            azimuth: FRAC_PI_2,
            ..SphericalPoint::default()
        };
        let mut bf = DelayAndSumBeamformer::new(&linear_array(), target);
        bf.initialize(10, RATE);
        let mut data = ChannelBuffer::new(480, 2, 3);
        for band in 0..3 {
            data.channel_mut(band, 0).fill(2.0);
            data.channel_mut(band, 1).fill(4.0);
        }
        bf.process_chunk(&mut data);
        for band in 0..3 {
            assert!(data.channel(band, 0)[159] > 2.9 && data.channel(band, 0)[159] < 3.1);
        }
    }
}
