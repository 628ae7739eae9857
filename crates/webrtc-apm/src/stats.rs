//! Metric types reported by the processor and its stages, and the
//! delay-jump bookkeeping done on the capture path.

/// Instantaneous value plus long-term average, maximum and minimum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistic {
    pub instant: i32,
    pub average: i32,
    pub maximum: i32,
    pub minimum: i32,
}

/// Running accumulator behind a [`Statistic`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StatisticAccumulator {
    instant: f32,
    sum: f64,
    count: u64,
    maximum: f32,
    minimum: f32,
}

impl StatisticAccumulator {
    pub(crate) fn push(&mut self, value: f32) {
        if self.count == 0 {
            self.maximum = value;
            self.minimum = value;
        } else {
            self.maximum = self.maximum.max(value);
            self.minimum = self.minimum.min(value);
        }
        self.instant = value;
        self.sum += f64::from(value);
        self.count += 1;
    }

    pub(crate) fn statistic(&self) -> Statistic {
        if self.count == 0 {
            return Statistic::default();
        }
        Statistic {
            instant: self.instant.round() as i32,
            average: (self.sum / self.count as f64).round() as i32,
            maximum: self.maximum.round() as i32,
            minimum: self.minimum.round() as i32,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Echo cancellation quality, in dB unless noted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EchoMetrics {
    /// Residual echo return loss.
    pub residual_echo_return_loss: Statistic,
    /// Echo return loss: far-end power over echo power.
    pub echo_return_loss: Statistic,
    /// Echo return loss enhancement: echo power over output power.
    pub echo_return_loss_enhancement: Statistic,
    /// Suppression applied by the non-linear processor.
    pub a_nlp: Statistic,
    /// Fraction of blocks in which the linear filter diverged.
    pub divergent_filter_fraction: f32,
}

/// Delay estimate spread reported by delay logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DelayMetrics {
    pub median_ms: i32,
    pub std_ms: i32,
    /// Share of estimates too far from the median to be useful, in [0, 1].
    pub fraction_poor_delays: f32,
}

/// Snapshot returned by [`AudioProcessing::statistics`](crate::AudioProcessing::statistics).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioProcessingStats {
    /// Jumps of more than 60 ms in the reported stream delay. `None` until
    /// counting has been activated for this call.
    pub stream_delay_jumps: Option<u32>,
    /// Jumps of more than 60 ms in the echo canceller's own system delay.
    pub aec_system_delay_jumps: Option<u32>,
}

const MIN_DELAY_JUMP_MS: i32 = 60;

/// Counts delay jumps while the echo canceller runs.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DelayJumpTracker {
    stream_delay_jumps: Option<u32>,
    last_stream_delay_ms: i32,
    aec_system_delay_jumps: Option<u32>,
    last_aec_system_delay_ms: i32,
}

impl DelayJumpTracker {
    /// Called once per capture chunk in which echo cancellation is on.
    pub(crate) fn update(&mut self, stream_has_echo: bool, stream_delay_ms: i32, aec_system_delay_ms: i32) {
        if stream_has_echo {
            self.stream_delay_jumps.get_or_insert(0);
            self.aec_system_delay_jumps.get_or_insert(0);
        }

        let diff = stream_delay_ms - self.last_stream_delay_ms;
        if diff > MIN_DELAY_JUMP_MS && self.last_stream_delay_ms != 0 {
            tracing::debug!(diff_ms = diff, "platform reported stream delay jump");
            *self.stream_delay_jumps.get_or_insert(0) += 1;
        }
        self.last_stream_delay_ms = stream_delay_ms;

        let diff = aec_system_delay_ms - self.last_aec_system_delay_ms;
        if diff > MIN_DELAY_JUMP_MS && self.last_aec_system_delay_ms != 0 {
            tracing::debug!(diff_ms = diff, "aec system delay jump");
            *self.aec_system_delay_jumps.get_or_insert(0) += 1;
        }
        self.last_aec_system_delay_ms = aec_system_delay_ms;
    }

    pub(crate) fn stats(&self) -> AudioProcessingStats {
        AudioProcessingStats {
            stream_delay_jumps: self.stream_delay_jumps,
            aec_system_delay_jumps: self.aec_system_delay_jumps,
        }
    }

    /// Reports the counts of the finished call and starts over.
    pub(crate) fn end_call(&mut self) -> AudioProcessingStats {
        let stats = self.stats();
        if let Some(jumps) = stats.stream_delay_jumps {
            tracing::info!(jumps, "platform reported stream delay jumps this call");
        }
        if let Some(jumps) = stats.aec_system_delay_jumps {
            tracing::info!(jumps, "aec system delay jumps this call");
        }
        *self = Self::default();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_tracks_extremes_and_mean() {
        let mut acc = StatisticAccumulator::default();
        assert_eq!(acc.statistic(), Statistic::default());
        for v in [10.0, -4.0, 6.0] {
            acc.push(v);
        }
        assert_eq!(
            acc.statistic(),
            Statistic {
                instant: 6,
                average: 4,
                maximum: 10,
                minimum: -4,
            }
        );
        acc.reset();
        assert_eq!(acc.statistic(), Statistic::default());
    }

    #[test]
    fn counters_stay_inactive_without_echo_or_jumps() {
        let mut tracker = DelayJumpTracker::default();
        for _ in 0..10 {
            tracker.update(false, 50, 40);
        }
        assert_eq!(tracker.stats(), AudioProcessingStats::default());
    }

    #[test]
    fn echo_activates_counters() {
        let mut tracker = DelayJumpTracker::default();
        tracker.update(true, 50, 40);
        assert_eq!(tracker.stats().stream_delay_jumps, Some(0));
        assert_eq!(tracker.stats().aec_system_delay_jumps, Some(0));
    }

    #[test]
    fn jumps_over_sixty_ms_are_counted() {
        let mut tracker = DelayJumpTracker::default();
        tracker.update(false, 0, 0);
        // The first nonzero value is a baseline, not a jump.
        tracker.update(false, 100, 100);
        assert_eq!(tracker.stats().stream_delay_jumps, None);
        tracker.update(false, 160, 161);
        assert_eq!(tracker.stats().stream_delay_jumps, None);
        assert_eq!(tracker.stats().aec_system_delay_jumps, Some(1));
        tracker.update(false, 300, 100);
        assert_eq!(tracker.stats().stream_delay_jumps, Some(1));
        assert_eq!(tracker.stats().aec_system_delay_jumps, Some(1));
    }

    #[test]
    fn end_call_reports_and_resets() {
        let mut tracker = DelayJumpTracker::default();
        tracker.update(true, 10, 10);
        tracker.update(true, 200, 10);
        let stats = tracker.end_call();
        assert_eq!(stats.stream_delay_jumps, Some(1));
        assert_eq!(tracker.stats(), AudioProcessingStats::default());
    }
}
