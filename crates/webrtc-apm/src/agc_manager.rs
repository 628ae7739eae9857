//! Experimental analog AGC.
//!
//! Drives the application's microphone level from a long-term speech level
//! estimate and leaves the remaining few dB to the digital compressor of
//! [`GainControl`], which it runs in fixed-digital mode. Input clipping
//! lowers both the level and the ceiling the level may later return to.

use crate::error::Error;
use crate::gain_control::{GainControl, Mode};
use crate::processing_component::{ProcessingComponent, StageFormat};

pub(crate) const MIN_MIC_LEVEL: i32 = 12;
pub(crate) const MAX_MIC_LEVEL: i32 = 255;
const LEVEL_QUANTIZATION_SLACK: i32 = 25;
const DB_PER_LEVEL_STEP: f32 = 0.25;

const CLIPPED_LEVEL_STEP: i32 = 15;
const CLIPPED_LEVEL_MIN: i32 = 170;
const CLIPPED_RATIO_THRESHOLD: f32 = 0.1;
const CLIPPED_WAIT_FRAMES: u32 = 300;

const TARGET_LEVEL_DBFS: f32 = -18.0;
const MIN_COMPRESSION_GAIN_DB: i32 = 2;
const MAX_COMPRESSION_GAIN_DB: i32 = 12;
const DEFAULT_COMPRESSION_GAIN_DB: i32 = 7;
const COMPRESSION_GAIN_STEP_DB: f32 = 0.05;
const MAX_RESIDUAL_GAIN_CHANGE_DB: i32 = 15;
// Speech frames between two level decisions.
const FRAMES_PER_DECISION: u32 = 100;

fn frame_level_dbfs(samples: &[i16]) -> f32 {
    let energy: f32 = samples.iter().map(|&s| f32::from(s).powi(2)).sum();
    let mean = energy / samples.len().max(1) as f32;
    10.0 * (mean.max(1.0) / (32768.0 * 32768.0)).log10()
}

/// Level change that moves the input by `gain_error_db`, limited to the
/// valid microphone range.
fn level_from_gain_error(gain_error_db: i32, level: i32) -> i32 {
    let steps = (gain_error_db as f32 / DB_PER_LEVEL_STEP).round() as i32;
    (level + steps).clamp(MIN_MIC_LEVEL, MAX_MIC_LEVEL)
}

#[derive(Debug)]
pub(crate) struct AgcManager {
    startup_min_volume: i32,
    enabled: bool,

    /// Level last reported by the application.
    volume: i32,
    /// Level the manager believes is applied.
    level: i32,
    max_level: i32,
    startup: bool,
    check_volume_on_next_process: bool,
    capture_muted: bool,
    frames_since_clipped: u32,

    target_compression: i32,
    compression: i32,
    compression_accumulator: f32,

    speech_energy_db: f32,
    speech_frames: u32,
    noise_floor_db: f32,
    voice_probability: f32,
}

impl AgcManager {
    pub(crate) fn new(startup_min_volume: i32) -> Self {
        Self {
            startup_min_volume: startup_min_volume.clamp(0, MAX_MIC_LEVEL),
            enabled: true,
            volume: 0,
            level: 0,
            max_level: MAX_MIC_LEVEL,
            startup: true,
            check_volume_on_next_process: true,
            capture_muted: false,
            frames_since_clipped: CLIPPED_WAIT_FRAMES,
            target_compression: DEFAULT_COMPRESSION_GAIN_DB,
            compression: DEFAULT_COMPRESSION_GAIN_DB,
            compression_accumulator: DEFAULT_COMPRESSION_GAIN_DB as f32,
            speech_energy_db: 0.0,
            speech_frames: 0,
            noise_floor_db: -60.0,
            voice_probability: 0.0,
        }
    }

    /// Puts the gain controller into the mode the manager drives.
    pub(crate) fn configure_gain_control(&self, gain_control: &mut GainControl) -> Result<(), Error> {
        gain_control.set_mode(Mode::FixedDigital);
        gain_control.set_target_level_dbfs(2)?;
        gain_control.set_compression_gain_db(self.compression)?;
        gain_control.enable_limiter(true);
        Ok(())
    }

    pub(crate) fn set_volume(&mut self, volume: i32) {
        self.volume = volume;
    }

    pub(crate) fn volume(&self) -> i32 {
        self.volume
    }

    /// While muted nothing is measured. Unmuting re-reads the level before
    /// the next chunk.
    pub(crate) fn set_capture_muted(&mut self, muted: bool) {
        if self.capture_muted == muted {
            return;
        }
        self.capture_muted = muted;
        if !muted {
            self.check_volume_on_next_process = true;
        }
    }

    pub(crate) fn voice_probability(&self) -> f32 {
        self.voice_probability
    }

    fn reset_measurement(&mut self) {
        self.speech_energy_db = 0.0;
        self.speech_frames = 0;
    }

    /// Applies `new_level` unless the application moved the level itself
    /// since the last change; its choice wins then.
    fn set_level(&mut self, new_level: i32) {
        if self.volume == 0 {
            return;
        }
        if (self.volume - self.level).abs() > LEVEL_QUANTIZATION_SLACK {
            tracing::debug!(from = self.level, to = self.volume, "manual mic level change");
            self.level = self.volume;
            if self.level > self.max_level {
                self.max_level = self.level;
            }
            self.reset_measurement();
            return;
        }
        let new_level = new_level.min(self.max_level);
        if new_level == self.level {
            return;
        }
        tracing::debug!(from = self.level, to = new_level, "setting mic level");
        self.level = new_level;
        self.volume = new_level;
    }

    fn check_volume_and_reset(&mut self) {
        let mut level = self.volume;
        if level == 0 && !self.startup {
            // Muted at the device; leave it alone.
            return;
        }
        if level < MIN_MIC_LEVEL {
            level = MIN_MIC_LEVEL;
        }
        if self.startup && level < self.startup_min_volume {
            level = self.startup_min_volume;
        }
        self.level = level;
        self.volume = level;
        self.startup = false;
        self.reset_measurement();
    }

    /// Looks for clipping in the unprocessed full-band input.
    pub(crate) fn analyze_pre_process(&mut self, samples: &[i16]) {
        if self.capture_muted || !self.enabled {
            return;
        }
        if self.frames_since_clipped < CLIPPED_WAIT_FRAMES {
            self.frames_since_clipped += 1;
            return;
        }
        let clipped = samples
            .iter()
            .filter(|&&s| s == i16::MAX || s == i16::MIN)
            .count();
        let ratio = clipped as f32 / samples.len().max(1) as f32;
        if ratio > CLIPPED_RATIO_THRESHOLD {
            tracing::debug!(ratio, level = self.level, "input clipping");
            self.max_level = (self.max_level - CLIPPED_LEVEL_STEP).max(CLIPPED_LEVEL_MIN);
            if self.level > CLIPPED_LEVEL_MIN {
                self.set_level((self.level - CLIPPED_LEVEL_STEP).max(CLIPPED_LEVEL_MIN));
            }
            self.reset_measurement();
            self.frames_since_clipped = 0;
        }
    }

    /// Updates the speech level from the split low band and, once enough
    /// speech has been seen, corrects the level and compression.
    pub(crate) fn process(&mut self, low_band: &[i16], gain_control: &mut GainControl) -> Result<(), Error> {
        if self.capture_muted || !self.enabled {
            return Ok(());
        }
        if self.check_volume_on_next_process {
            self.check_volume_on_next_process = false;
            self.check_volume_and_reset();
        }

        let level_db = frame_level_dbfs(low_band);
        self.noise_floor_db = if level_db < self.noise_floor_db {
            level_db
        } else {
            self.noise_floor_db + 0.01
        };
        let snr = level_db - self.noise_floor_db;
        let instant = 1.0 / (1.0 + (-(snr - 6.0) / 3.0).exp());
        self.voice_probability = 0.7 * self.voice_probability + 0.3 * instant;

        if self.voice_probability > 0.5 {
            self.speech_energy_db += level_db;
            self.speech_frames += 1;
            if self.speech_frames >= FRAMES_PER_DECISION {
                let speech_level = self.speech_energy_db / self.speech_frames as f32;
                let rms_error = (TARGET_LEVEL_DBFS - speech_level).round() as i32;
                self.reset_measurement();
                self.update_gain(rms_error);
            }
        }
        self.update_compressor(gain_control)
    }

    fn update_gain(&mut self, rms_error: i32) {
        // The compressor takes what it can; the level handles the rest.
        let raw_compression = rms_error.clamp(MIN_COMPRESSION_GAIN_DB, MAX_COMPRESSION_GAIN_DB);
        self.target_compression += (raw_compression - self.target_compression) / 2;
        if raw_compression == MAX_COMPRESSION_GAIN_DB || raw_compression == MIN_COMPRESSION_GAIN_DB {
            self.target_compression = raw_compression;
        }
        let residual = (rms_error - raw_compression)
            .clamp(-MAX_RESIDUAL_GAIN_CHANGE_DB, MAX_RESIDUAL_GAIN_CHANGE_DB);
        if residual != 0 {
            self.set_level(level_from_gain_error(residual, self.level));
        }
    }

    fn update_compressor(&mut self, gain_control: &mut GainControl) -> Result<(), Error> {
        if self.compression == self.target_compression {
            return Ok(());
        }
        let step = if self.target_compression > self.compression {
            COMPRESSION_GAIN_STEP_DB
        } else {
            -COMPRESSION_GAIN_STEP_DB
        };
        self.compression_accumulator += step;
        let rounded = self.compression_accumulator.round() as i32;
        if rounded != self.compression && (self.compression_accumulator - rounded as f32).abs() < 1e-3 {
            self.compression = rounded;
            self.compression_accumulator = rounded as f32;
            gain_control.set_compression_gain_db(rounded)?;
        }
        Ok(())
    }
}

impl ProcessingComponent for AgcManager {
    /// Format changes restart the measurement but keep the level.
    fn initialize(&mut self, _format: &StageFormat) {
        self.reset_measurement();
        self.voice_probability = 0.0;
        self.frames_since_clipped = CLIPPED_WAIT_FRAMES;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, enable: bool) -> Result<(), Error> {
        self.enabled = enable;
        Ok(())
    }
}
