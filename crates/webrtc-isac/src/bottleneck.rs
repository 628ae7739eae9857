//! Splitting the uplink bottleneck between the lower and upper band.

use crate::bandwidth_estimator::{BwEstimator, SamplingRate};
use crate::error::IsacError;

/// Coded audio bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioBandwidth {
    #[default]
    Khz8,
    Khz12,
    Khz16,
}

/// Lower-band rates at 38, 39.17, 40.33, 41.5, 42.67, 43.83 and 45 kbps.
const LOWER_BAND_RATE_12: [i16; 7] = [29000, 30000, 30000, 31000, 31000, 32000, 32000];
const UPPER_BAND_RATE_12: [i16; 7] = [25000, 25000, 27000, 27000, 29000, 29000, 32000];
/// Lower-band rates at 50, 51.2, 52.4, 53.6, 54.8 and 56 kbps.
const LOWER_BAND_RATE_16: [i16; 6] = [31000, 31000, 32000, 32000, 32000, 32000];
const UPPER_BAND_RATE_16: [i16; 6] = [28000, 29000, 29000, 30000, 31000, 32000];

/// Largest rate either band is coded at.
const MAX_BAND_RATE: i32 = 32000;

/// Outcome of [`rate_allocation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateAllocation {
    pub lower_band_bps: f64,
    /// `0` when only the lower band is coded.
    pub upper_band_bps: f64,
    pub bandwidth: AudioBandwidth,
}

fn interpolate(table: &[i16], step_inv: f64, offset: i32) -> f64 {
    let last = table.len() - 1;
    let position = f64::from(offset) * step_inv;
    let idx = if position >= last as f64 { last } else { position as usize };
    let mut rate = f64::from(table[idx]);
    if idx < last {
        let err = position - idx as f64;
        rate += f64::from((err * f64::from(table[idx + 1] - table[idx])) as i16);
    }
    rate
}

/// Splits a total bottleneck in bits/s into lower- and upper-band rates.
///
/// Below 38 kbps only the lower band is coded. Up to 50 kbps the audio is
/// coded at 12 kHz and up to 56 kbps at 16 kHz, with both band rates
/// interpolated from fixed tables. Anything higher is
/// [`IsacError::DisallowedBottleneck`].
pub fn rate_allocation(bottleneck: i32) -> Result<RateAllocation, IsacError> {
    match bottleneck {
        ..38000 => Ok(RateAllocation {
            lower_band_bps: f64::from(bottleneck.min(MAX_BAND_RATE)),
            upper_band_bps: 0.0,
            bandwidth: AudioBandwidth::Khz8,
        }),
        38000..50000 => {
            const STEP_INV: f64 = 8.5714286e-4;
            Ok(RateAllocation {
                lower_band_bps: interpolate(&LOWER_BAND_RATE_12, STEP_INV, bottleneck - 38000),
                upper_band_bps: interpolate(&UPPER_BAND_RATE_12, STEP_INV, bottleneck - 38000),
                bandwidth: AudioBandwidth::Khz12,
            })
        }
        50000..=56000 => {
            const STEP_INV: f64 = 8.3333333e-4;
            Ok(RateAllocation {
                lower_band_bps: interpolate(&LOWER_BAND_RATE_16, STEP_INV, bottleneck - 50000),
                upper_band_bps: interpolate(&UPPER_BAND_RATE_16, STEP_INV, bottleneck - 50000),
                bandwidth: AudioBandwidth::Khz16,
            })
        }
        _ => Err(IsacError::DisallowedBottleneck),
    }
}

/// Moves a bottleneck out of the gaps between the coded bandwidths and caps
/// it at 56 kbps.
pub fn clamp_uplink_bottleneck(bottleneck: i32) -> i32 {
    match bottleneck {
        32001..38000 => 32000,
        45001..50000 => 45000,
        56001.. => 56000,
        bn => bn,
    }
}

impl BwEstimator {
    /// Bottleneck the encoder should target in channel-adaptive mode, from
    /// the far end's feedback.
    pub fn uplink_bottleneck(&self) -> i32 {
        clamp_uplink_bottleneck(self.send_bw_avg() as i32)
    }
}

/// Encoder-side bandwidth selection that follows the uplink estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct BottleneckController {
    encoder_rate: SamplingRate,
    bandwidth: AudioBandwidth,
    lower_band_bps: f64,
    upper_band_bps: f64,
}

impl BottleneckController {
    pub fn new(encoder_rate: SamplingRate) -> Self {
        let bandwidth = match encoder_rate {
            SamplingRate::Wideband => AudioBandwidth::Khz8,
            SamplingRate::SuperWideband => AudioBandwidth::Khz16,
        };
        Self {
            encoder_rate,
            bandwidth,
            lower_band_bps: 0.0,
            upper_band_bps: 0.0,
        }
    }

    pub fn bandwidth(&self) -> AudioBandwidth {
        self.bandwidth
    }

    pub fn lower_band_bps(&self) -> f64 {
        self.lower_band_bps
    }

    pub fn upper_band_bps(&self) -> f64 {
        self.upper_band_bps
    }

    /// Applies a new total bottleneck. Returns `true` when the coded
    /// bandwidth changed.
    ///
    /// Moving up from 8 kHz needs the bottleneck to clear 41 kbps, and a
    /// running encoder never moves up to 16 kHz.
    pub fn update(&mut self, bottleneck: i32) -> Result<bool, IsacError> {
        let mut bottleneck = bottleneck;
        if self.bandwidth == AudioBandwidth::Khz8 && bottleneck > 37000 && bottleneck < 41000 {
            bottleneck = 37000;
        }
        if self.bandwidth != AudioBandwidth::Khz16 && bottleneck > 46000 {
            bottleneck = 46000;
        }

        let allocation = match self.encoder_rate {
            SamplingRate::Wideband => RateAllocation {
                lower_band_bps: f64::from(bottleneck.min(MAX_BAND_RATE)),
                upper_band_bps: 0.0,
                bandwidth: AudioBandwidth::Khz8,
            },
            SamplingRate::SuperWideband => rate_allocation(bottleneck)?,
        };
        self.lower_band_bps = allocation.lower_band_bps;
        self.upper_band_bps = allocation.upper_band_bps;

        let changed = allocation.bandwidth != self.bandwidth;
        if changed {
            tracing::debug!(from = ?self.bandwidth, to = ?allocation.bandwidth, bottleneck, "coded bandwidth change");
            self.bandwidth = allocation.bandwidth;
        }
        Ok(changed)
    }

    /// Frame length the lower band must use. Only the 8 kHz bandwidth may
    /// leave 30 ms frames.
    pub fn required_frame_samples(&self) -> Option<usize> {
        (self.bandwidth != AudioBandwidth::Khz8).then_some(480)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prop_assert;
    use test_strategy::proptest;

    use super::*;

    #[test]
    fn narrow_rates_stay_in_the_lower_band() {
        let alloc = rate_allocation(36000).unwrap();
        assert_eq!(alloc.lower_band_bps, 32000.0);
        assert_eq!(alloc.upper_band_bps, 0.0);
        assert_eq!(alloc.bandwidth, AudioBandwidth::Khz8);
        assert_eq!(rate_allocation(20000).unwrap().lower_band_bps, 20000.0);
    }

    #[test]
    fn table_points_are_exact() {
        let alloc = rate_allocation(38000).unwrap();
        assert_eq!((alloc.lower_band_bps, alloc.upper_band_bps), (29000.0, 25000.0));
        assert_eq!(alloc.bandwidth, AudioBandwidth::Khz12);

        // The last step truncates just short of the table end.
        let alloc = rate_allocation(56000).unwrap();
        assert_eq!((alloc.lower_band_bps, alloc.upper_band_bps), (32000.0, 31999.0));
        assert_eq!(alloc.bandwidth, AudioBandwidth::Khz16);

        let alloc = rate_allocation(50000).unwrap();
        assert_eq!((alloc.lower_band_bps, alloc.upper_band_bps), (31000.0, 28000.0));
    }

    #[test]
    fn rates_between_points_are_interpolated() {
        // Halfway between the first two 16 kHz points.
        let alloc = rate_allocation(50600).unwrap();
        assert_eq!(alloc.lower_band_bps, 31000.0);
        assert_eq!(alloc.upper_band_bps, 28499.0);
    }

    #[test]
    fn too_high_a_bottleneck_is_rejected() {
        assert_eq!(rate_allocation(56001), Err(IsacError::DisallowedBottleneck));
    }

    #[test]
    fn uplink_bottleneck_skips_the_gaps() {
        assert_eq!(clamp_uplink_bottleneck(32000), 32000);
        assert_eq!(clamp_uplink_bottleneck(35000), 32000);
        assert_eq!(clamp_uplink_bottleneck(38000), 38000);
        assert_eq!(clamp_uplink_bottleneck(47000), 45000);
        assert_eq!(clamp_uplink_bottleneck(60000), 56000);
    }

    #[test]
    fn wideband_encoder_caps_the_lower_band() {
        let mut controller = BottleneckController::new(SamplingRate::Wideband);
        assert_eq!(controller.update(45000), Ok(false));
        assert_eq!(controller.lower_band_bps(), 32000.0);
        assert_eq!(controller.bandwidth(), AudioBandwidth::Khz8);
        assert_eq!(controller.required_frame_samples(), None);
    }

    #[test]
    fn moving_up_from_wideband_needs_headroom() {
        let mut controller = BottleneckController::new(SamplingRate::SuperWideband);
        controller.update(20000).unwrap();
        assert_eq!(controller.bandwidth(), AudioBandwidth::Khz8);

        assert_eq!(controller.update(40000), Ok(false));
        assert_eq!(controller.bandwidth(), AudioBandwidth::Khz8);

        assert_eq!(controller.update(42000), Ok(true));
        assert_eq!(controller.bandwidth(), AudioBandwidth::Khz12);
        assert_eq!(controller.required_frame_samples(), Some(480));

        // Stays at 12 kHz even at the top rate.
        assert_eq!(controller.update(56000), Ok(false));
        assert_eq!(controller.bandwidth(), AudioBandwidth::Khz12);
    }

    #[test]
    fn estimator_feedback_drives_the_bottleneck() {
        let mut est = BwEstimator::new(SamplingRate::SuperWideband, SamplingRate::SuperWideband);
        assert_eq!(est.uplink_bottleneck(), 56000);
        // The average settles near 36.3 kbps, inside the 12 kHz gap.
        for _ in 0..100 {
            est.update_uplink_bw(14).unwrap();
        }
        assert_eq!(est.uplink_bottleneck(), 32000);
    }

    #[test]
    fn initial_bottleneck_seeds_the_uplink() {
        let mut est = BwEstimator::new(SamplingRate::Wideband, SamplingRate::Wideband);
        est.set_initial_bottleneck(24000).unwrap();
        assert_eq!(est.uplink_bottleneck(), 24000);
        assert_eq!(est.set_initial_bottleneck(40000), Err(IsacError::DisallowedBottleneck));
        assert_eq!(est.uplink_bottleneck(), 24000);
    }

    #[proptest]
    fn band_rates_never_exceed_the_cap(#[strategy(-1000i32..=56000)] bottleneck: i32) {
        let alloc = rate_allocation(bottleneck).unwrap();
        prop_assert!(alloc.lower_band_bps <= 32000.0);
        prop_assert!(alloc.upper_band_bps <= 32000.0);
        prop_assert!(alloc.lower_band_bps <= f64::from(bottleneck));
    }
}
