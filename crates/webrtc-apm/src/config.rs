//! Construction-time and run-time options of [`AudioProcessing`](crate::AudioProcessing).
//!
//! Per-stage settings (suppression levels, gain targets, ...) are not here;
//! they live behind the stage handles such as
//! [`AudioProcessing::gain_control`](crate::AudioProcessing::gain_control).

use std::f32::consts::FRAC_PI_2;

/// Options applied when the processor is built.
///
/// [`AudioProcessing::apply_config`](crate::AudioProcessing::apply_config)
/// can later change [`echo_canceller`](Self::echo_canceller),
/// [`transient_suppression`](Self::transient_suppression) and
/// [`intelligibility`](Self::intelligibility). Beamforming and the
/// experimental AGC are fixed for the lifetime of the processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub echo_canceller: EchoCanceller,
    pub experimental_agc: ExperimentalAgc,
    pub transient_suppression: TransientSuppression,
    pub beamforming: Beamforming,
    pub intelligibility: Intelligibility,
}

/// Extra echo canceller modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoCanceller {
    /// Longer adaptive filter, for rooms with long echo tails.
    pub extended_filter: bool,
    /// Estimate the render/capture delay internally and ignore the
    /// reported stream delay.
    pub delay_agnostic: bool,
}

/// Analog AGC that drives gain control in fixed-digital mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperimentalAgc {
    pub enabled: bool,
    /// Lowest analog level the AGC starts from, in [0, 255].
    pub startup_min_volume: i32,
}

impl Default for ExperimentalAgc {
    fn default() -> Self {
        Self {
            enabled: false,
            startup_min_volume: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransientSuppression {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intelligibility {
    pub enabled: bool,
}

/// Microphone position in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub(crate) fn distance(&self, other: &Self) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

/// Direction in radians plus radius in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalPoint {
    pub azimuth: f32,
    pub elevation: f32,
    pub radius: f32,
}

impl Default for SphericalPoint {
    /// Straight ahead, one meter out.
    fn default() -> Self {
        Self {
            azimuth: FRAC_PI_2,
            elevation: 0.0,
            radius: 1.0,
        }
    }
}

/// Microphone-array beamforming on the capture side.
///
/// When enabled the number of capture input channels must equal the number
/// of microphones in `array_geometry`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Beamforming {
    pub enabled: bool,
    pub array_geometry: Vec<Point>,
    pub target_direction: SphericalPoint,
}
