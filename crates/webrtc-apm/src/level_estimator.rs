//! Output level of the capture stream in the RFC 6465 sense: the RMS level
//! in -dBov, from 0 (full scale) to 127 (digital silence).

use crate::audio_buffer::AudioBuffer;
use crate::audio_processing::AudioProcessing;
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};

const MAX_SQUARED_LEVEL: f32 = 32768.0 * 32768.0;
/// 10^(-127/10).
const MIN_LEVEL: f32 = 1.995_262_314_968_883e-13;

/// Level reported for digital silence.
pub const MIN_LEVEL_DB: i32 = 127;
const INAUDIBLE_BUT_NOT_MUTED: i32 = 126;

fn level_db(mean_square: f32) -> i32 {
    if mean_square <= MIN_LEVEL * MAX_SQUARED_LEVEL {
        return MIN_LEVEL_DB;
    }
    let rms = 10.0 * (mean_square / MAX_SQUARED_LEVEL).log10();
    debug_assert!(rms <= 0.0);
    (-rms + 0.5) as i32
}

/// Running sum of squares, polled and cleared by [`RmsLevel::average`].
#[derive(Debug, Default)]
struct RmsLevel {
    sum_square: f32,
    sample_count: usize,
}

impl RmsLevel {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn analyze(&mut self, data: &[i16]) {
        self.sum_square += data.iter().map(|&s| f32::from(s).powi(2)).sum::<f32>();
        self.sample_count += data.len();
    }

    /// Level since the last poll. Quiet but non-zero audio never reads as
    /// silence.
    fn average(&mut self) -> i32 {
        if self.sample_count == 0 {
            return MIN_LEVEL_DB;
        }
        let mut level = level_db(self.sum_square / self.sample_count as f32);
        if level == MIN_LEVEL_DB && self.sum_square != 0.0 {
            level = INAUDIBLE_BUT_NOT_MUTED;
        }
        self.reset();
        level
    }
}

#[derive(Debug, Default)]
pub(crate) struct LevelEstimator {
    enabled: bool,
    rms: RmsLevel,
}

impl LevelEstimator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Accumulates every visible channel of the full-band S16 signal.
    pub(crate) fn process_stream(&mut self, audio: &mut AudioBuffer) {
        if !self.enabled {
            return;
        }
        let num_channels = audio.num_channels();
        let channels = audio.channels_const();
        for ch in 0..num_channels {
            self.rms.analyze(channels.bands(ch));
        }
    }

    pub(crate) fn rms(&mut self) -> Result<i32, Error> {
        if !self.enabled {
            return Err(Error::NotEnabled);
        }
        Ok(self.rms.average())
    }
}

impl ProcessingComponent for LevelEstimator {
    fn initialize(&mut self, _format: &StageFormat) {
        self.rms.reset();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, enable: bool) -> Result<(), Error> {
        if enable && !self.enabled {
            self.rms.reset();
        }
        self.enabled = enable;
        Ok(())
    }
}

/// Capture output level meter. Returned by
/// [`AudioProcessing::level_estimator`].
#[derive(Debug, Clone, Copy)]
pub struct LevelEstimatorHandle<'a> {
    apm: &'a AudioProcessing,
}

impl<'a> LevelEstimatorHandle<'a> {
    pub(crate) fn new(apm: &'a AudioProcessing) -> Self {
        Self { apm }
    }

    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        self.apm.lock_capture().level_estimator.enable(enable)
    }

    pub fn is_enabled(&self) -> bool {
        self.apm.lock_capture().level_estimator.is_enabled()
    }

    /// Level in -dBov averaged since the previous call, then resets.
    /// [`Error::NotEnabled`] while the estimator is off.
    pub fn rms(&self) -> Result<i32, Error> {
        self.apm.lock_capture().level_estimator.rms()
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;

    const SAMPLE_RATE_HZ: usize = 48000;
    const BLOCK_SIZE: usize = SAMPLE_RATE_HZ / 100;

    fn sinusoid(amplitude: i32, num_samples: usize) -> Vec<i16> {
        (0..num_samples)
            .map(|n| {
                let v = f64::from(amplitude)
                    * (2.0 * PI * n as f64 * 1000.0 / SAMPLE_RATE_HZ as f64).sin();
                v.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
            })
            .collect()
    }

    fn measure(input: &[i16]) -> RmsLevel {
        let mut level = RmsLevel::default();
        for block in input.chunks_exact(BLOCK_SIZE) {
            level.analyze(block);
        }
        level
    }

    #[test]
    fn full_scale_tone_is_3_db() {
        let mut level = measure(&sinusoid(i32::from(i16::MAX), SAMPLE_RATE_HZ));
        assert_eq!(level.average(), 3);
    }

    #[test]
    fn half_scale_tone_is_9_db() {
        let mut level = measure(&sinusoid(i32::from(i16::MAX) / 2, SAMPLE_RATE_HZ));
        assert_eq!(level.average(), 9);
    }

    #[test]
    fn zeros_and_no_samples_read_as_silence() {
        assert_eq!(measure(&vec![0; SAMPLE_RATE_HZ]).average(), MIN_LEVEL_DB);
        assert_eq!(RmsLevel::default().average(), MIN_LEVEL_DB);
    }

    #[test]
    fn only_digital_silence_is_127() {
        let mut samples = vec![0i16; SAMPLE_RATE_HZ];
        samples[0] = 1;
        assert_eq!(measure(&samples).average(), INAUDIBLE_BUT_NOT_MUTED);
    }

    #[test]
    fn polling_clears_the_level() {
        let mut level = measure(&sinusoid(i32::from(i16::MAX), SAMPLE_RATE_HZ));
        level.average();
        assert_eq!(level.average(), MIN_LEVEL_DB);
    }

    #[test]
    fn estimator_reports_not_enabled_while_off() {
        let mut estimator = LevelEstimator::new();
        assert_eq!(estimator.rms(), Err(Error::NotEnabled));
        estimator.enable(true).unwrap();
        assert_eq!(estimator.rms(), Ok(MIN_LEVEL_DB));
    }

    #[test]
    fn estimator_reads_capture_channels() {
        let mut estimator = LevelEstimator::new();
        estimator.enable(true).unwrap();
        let tone = sinusoid(i32::from(i16::MAX), BLOCK_SIZE);
        let mut audio = AudioBuffer::new(BLOCK_SIZE, 2, BLOCK_SIZE, 2, BLOCK_SIZE);
        for ch in 0..2 {
            audio.channels().bands_mut(ch).copy_from_slice(&tone);
        }
        estimator.process_stream(&mut audio);
        assert_eq!(estimator.rms(), Ok(3));
    }
}
