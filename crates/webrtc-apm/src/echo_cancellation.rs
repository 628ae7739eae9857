//! Full acoustic echo canceller.
//!
//! The render side packs the low band of every render chunk into a queue;
//! the capture side drains it into a far-end history before each capture
//! chunk. Each capture channel runs an NLMS filter over that history, aligned
//! by the reported stream delay (or by an internal estimate in delay-agnostic
//! mode), and a non-linear stage attenuates what the linear filter leaves.

use std::collections::VecDeque;

use crate::adaptive_filter::{FarEndBuffer, NlmsFilter, cancel_chunk};
use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::audio_processing::AudioProcessing;
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};
use crate::render_queue::{RenderQueueReader, RenderQueueWriter, render_queue};
use crate::stats::{DelayMetrics, EchoMetrics, StatisticAccumulator};

/// Aggressiveness of the non-linear suppression after the linear filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SuppressionLevel {
    Low,
    #[default]
    Moderate,
    High,
}

impl SuppressionLevel {
    /// Floor of the residual echo gain.
    fn min_gain(self) -> f32 {
        match self {
            Self::Low => 0.5,
            Self::Moderate => 0.2,
            Self::High => 0.05,
        }
    }

    fn overdrive(self) -> f32 {
        match self {
            Self::Low => 1.0,
            Self::Moderate => 2.0,
            Self::High => 4.0,
        }
    }
}

const MAX_DELAY_MS: usize = 500;
const FILTER_MS: usize = 16;
const EXTENDED_FILTER_MS: usize = 64;
const STEP_SIZE: f32 = 0.3;
// Per-sample power below which the far end counts as silent (FloatS16).
const FAR_END_ACTIVITY_POWER: f32 = 100.0 * 100.0;
const DELAY_DECIMATION: usize = 4;
const DELAY_HISTORY: usize = 250;
const POOR_DELAY_MS: i32 = 8;

/// Coarse render-to-capture delay search on decimated envelopes.
#[derive(Debug, Clone)]
struct DelayEstimator {
    max_lag: usize,
    scores: Vec<f32>,
    near_envelope: Vec<f32>,
    far_envelope: Vec<f32>,
    estimate: Option<usize>,
}

fn envelope(samples: impl Iterator<Item = f32>, out: &mut Vec<f32>) {
    out.clear();
    let mut acc = 0.0;
    for (i, s) in samples.enumerate() {
        acc += s.abs();
        if (i + 1) % DELAY_DECIMATION == 0 {
            out.push(acc / DELAY_DECIMATION as f32);
            acc = 0.0;
        }
    }
    let mean = out.iter().sum::<f32>() / out.len().max(1) as f32;
    out.iter_mut().for_each(|v| *v -= mean);
}

impl DelayEstimator {
    fn new(max_delay_samples: usize) -> Self {
        let max_lag = max_delay_samples / DELAY_DECIMATION;
        Self {
            max_lag,
            scores: vec![0.0; max_lag],
            near_envelope: Vec::new(),
            far_envelope: Vec::new(),
            estimate: None,
        }
    }

    /// Folds one chunk into the running scores and returns the current
    /// estimate in samples.
    fn update(&mut self, far: &FarEndBuffer, near: &[f32]) -> Option<usize> {
        let n = near.len() / DELAY_DECIMATION;
        if n == 0 || self.max_lag == 0 {
            return self.estimate;
        }
        envelope(near.iter().copied(), &mut self.near_envelope);
        // Newest first on the far side, so reverse the near envelope too.
        self.near_envelope.reverse();
        let span = (self.max_lag + n) * DELAY_DECIMATION;
        envelope((0..span).map(|lag| far.lagged(lag)), &mut self.far_envelope);

        for (lag, score) in self.scores.iter_mut().enumerate() {
            let corr: f32 = self
                .near_envelope
                .iter()
                .zip(&self.far_envelope[lag..])
                .map(|(a, b)| a * b)
                .sum();
            *score = 0.9 * *score + 0.1 * corr;
        }
        self.estimate = self
            .scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .filter(|(_, s)| **s > 0.0)
            .map(|(lag, _)| lag * DELAY_DECIMATION);
        self.estimate
    }

}

/// Echo canceller state of one capture channel.
#[derive(Debug, Clone)]
struct ChannelCanceller {
    filter: NlmsFilter,
    nlp_gain: f32,
}

#[derive(Debug, Default)]
struct MetricsState {
    erl: StatisticAccumulator,
    erle: StatisticAccumulator,
    rerl: StatisticAccumulator,
    a_nlp: StatisticAccumulator,
    frames: u32,
    divergent_frames: u32,
}

/// Capture-side echo canceller. Settings persist across reinitialization.
#[derive(Debug)]
pub(crate) struct EchoCancellation {
    enabled: bool,
    suppression_level: SuppressionLevel,
    drift_compensation_enabled: bool,
    metrics_enabled: bool,
    delay_logging_enabled: bool,
    extended_filter: bool,
    delay_agnostic: bool,

    stream_drift_samples: i32,
    was_stream_drift_set: bool,
    accumulated_drift: i64,
    stream_has_echo: bool,

    format: StageFormat,
    far_end: FarEndBuffer,
    cancellers: Vec<ChannelCanceller>,
    delay_estimator: DelayEstimator,
    delay_history: VecDeque<i32>,
    metrics: MetricsState,
    render_reader: Option<RenderQueueReader<f32>>,
    reference: Vec<f32>,
    near: Vec<f32>,
}

impl EchoCancellation {
    pub(crate) fn new() -> Self {
        let mut aec = Self {
            enabled: false,
            suppression_level: SuppressionLevel::default(),
            drift_compensation_enabled: false,
            metrics_enabled: false,
            delay_logging_enabled: false,
            extended_filter: false,
            delay_agnostic: false,
            stream_drift_samples: 0,
            was_stream_drift_set: false,
            accumulated_drift: 0,
            stream_has_echo: false,
            format: StageFormat::default(),
            far_end: FarEndBuffer::new(1),
            cancellers: Vec::new(),
            delay_estimator: DelayEstimator::new(0),
            delay_history: VecDeque::new(),
            metrics: MetricsState::default(),
            render_reader: None,
            reference: Vec::new(),
            near: Vec::new(),
        };
        aec.initialize(&StageFormat::default());
        aec
    }

    fn num_taps(&self) -> usize {
        let ms = if self.extended_filter {
            EXTENDED_FILTER_MS
        } else {
            FILTER_MS
        };
        ms * self.format.split_rate_hz / 1000
    }

    /// Applies the construction-time extras. Changing the filter length
    /// rebuilds the filters.
    pub(crate) fn set_extra_options(&mut self, extended_filter: bool, delay_agnostic: bool) {
        let rebuild = extended_filter != self.extended_filter;
        self.extended_filter = extended_filter;
        self.delay_agnostic = delay_agnostic;
        if rebuild {
            let format = self.format;
            self.initialize(&format);
        }
    }

    /// Replaces the render queue. The returned writer belongs to the render
    /// side.
    pub(crate) fn connect_render_queue(&mut self, element_size: usize) -> RenderQueueWriter<f32> {
        let (writer, reader) = render_queue(element_size);
        self.render_reader = Some(reader);
        writer
    }

    /// Moves every queued render chunk into the far-end history.
    pub(crate) fn read_queued_render_data(&mut self) {
        let enabled = self.enabled;
        let num_reverse = self.format.num_reverse_channels.max(1);
        let Some(reader) = &mut self.render_reader else {
            return;
        };
        let far_end = &mut self.far_end;
        reader.drain(|item| {
            if !enabled {
                return;
            }
            let frames = item.len() / num_reverse;
            if num_reverse == 1 {
                far_end.push(item);
            } else {
                let mono: Vec<f32> = (0..frames)
                    .map(|i| {
                        (0..num_reverse).map(|ch| item[ch * frames + i]).sum::<f32>()
                            / num_reverse as f32
                    })
                    .collect();
                far_end.push(&mono);
            }
        });
    }

    pub(crate) fn set_stream_drift_samples(&mut self, drift: i32) {
        self.was_stream_drift_set = true;
        self.stream_drift_samples = drift;
    }

    pub(crate) fn stream_drift_samples(&self) -> i32 {
        self.stream_drift_samples
    }

    pub(crate) fn stream_has_echo(&self) -> bool {
        self.stream_has_echo
    }

    /// Render samples buffered ahead of capture, in ms.
    pub(crate) fn system_delay_ms(&self) -> i32 {
        let per_ms = (self.format.split_rate_hz / 1000).max(1);
        (self.far_end.system_delay_samples() / per_ms) as i32
    }

    /// Cancels echo in place on every band of the capture buffer.
    ///
    /// Returns [`Error::BadStreamParameterWarning`] when the drift report was
    /// implausible; the chunk is still processed.
    pub(crate) fn process_capture_audio(
        &mut self,
        audio: &mut AudioBuffer,
        stream_delay_ms: i32,
    ) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        if self.drift_compensation_enabled && !self.was_stream_drift_set {
            return Err(Error::StreamParameterNotSet);
        }
        self.was_stream_drift_set = false;

        let mut result = Ok(());
        let frames = audio.num_frames_per_band();
        if self.drift_compensation_enabled {
            if self.stream_drift_samples.unsigned_abs() as usize > frames / 2 {
                tracing::warn!(drift = self.stream_drift_samples, "implausible drift ignored");
                result = Err(Error::BadStreamParameterWarning);
            } else {
                self.accumulated_drift += i64::from(self.stream_drift_samples);
            }
        }

        let per_ms = self.format.split_rate_hz / 1000;
        let taps = self.num_taps();
        let reported_lag = stream_delay_ms.max(0) as usize * per_ms;
        let estimated_lag = if self.delay_agnostic || self.delay_logging_enabled {
            let near = audio.split_bands_const_f().channel(LOW_BAND, 0);
            self.delay_estimator.update(&self.far_end, near)
        } else {
            None
        };
        if self.delay_logging_enabled
            && let Some(lag) = estimated_lag
        {
            if self.delay_history.len() == DELAY_HISTORY {
                self.delay_history.pop_front();
            }
            self.delay_history.push_back((lag / per_ms.max(1)) as i32);
        }
        let base_lag = if self.delay_agnostic {
            estimated_lag.unwrap_or(reported_lag)
        } else {
            reported_lag
        };
        let drift_lag = (self.accumulated_drift / 100).clamp(-(taps as i64), taps as i64);
        let lag = (base_lag as i64 - taps as i64 / 4 + drift_lag)
            .clamp(0, (self.far_end.capacity() - frames - taps) as i64) as usize;

        self.reference.resize(frames + taps - 1, 0.0);
        self.far_end.window(lag, &mut self.reference);
        let far_power = self.far_end.recent_energy(frames) / frames as f32;
        let far_active = far_power > FAR_END_ACTIVITY_POWER;

        let num_bands = audio.num_bands();
        let num_channels = audio.num_channels();
        let level = self.suppression_level;
        let mut has_echo = false;
        let bands = audio.split_bands_f();
        for ch in 0..num_channels.min(self.cancellers.len()) {
            let canceller = &mut self.cancellers[ch];
            self.near.clear();
            self.near.extend_from_slice(bands.channel(LOW_BAND, ch));
            let near_energy: f32 = self.near.iter().map(|x| x * x).sum();

            let echo_energy = cancel_chunk(&mut canceller.filter, &self.reference, &mut self.near, far_active);
            let residual_energy: f32 = self.near.iter().map(|x| x * x).sum();

            let diverged = residual_energy > 1.5 * near_energy + 1.0;
            if diverged {
                canceller.filter.reset();
                self.near.clear();
                self.near.extend_from_slice(bands.channel(LOW_BAND, ch));
            }

            let echo_ratio = if far_active && !diverged {
                (echo_energy / (near_energy + 1.0)).min(1.0)
            } else {
                0.0
            };
            let target = (1.0 - level.overdrive() * echo_ratio).clamp(level.min_gain(), 1.0);
            canceller.nlp_gain = if target < canceller.nlp_gain {
                target
            } else {
                0.9 * canceller.nlp_gain + 0.1 * target
            };
            let gain = canceller.nlp_gain;
            for (dst, &e) in bands.channel_mut(LOW_BAND, ch).iter_mut().zip(&self.near) {
                *dst = e * gain;
            }
            for band in 1..num_bands {
                bands.channel_mut(band, ch).iter_mut().for_each(|s| *s *= gain);
            }
            has_echo |= echo_ratio > 0.1;

            if ch == 0 && self.metrics_enabled && far_active {
                let out_energy = residual_energy * gain * gain;
                let db = |num: f32, den: f32| 10.0 * ((num + 1.0) / (den + 1.0)).log10();
                let erl = db(far_power * frames as f32, near_energy);
                let erle = db(near_energy, residual_energy);
                self.metrics.erl.push(erl);
                self.metrics.erle.push(erle);
                self.metrics.rerl.push(erl + erle);
                self.metrics.a_nlp.push(db(residual_energy, out_energy));
                self.metrics.frames += 1;
                self.metrics.divergent_frames += u32::from(diverged);
            }
        }
        self.stream_has_echo = has_echo;
        self.far_end.consume(frames);
        result
    }

    pub(crate) fn metrics(&self) -> Result<EchoMetrics, Error> {
        if !self.enabled || !self.metrics_enabled {
            return Err(Error::NotEnabled);
        }
        let m = &self.metrics;
        Ok(EchoMetrics {
            residual_echo_return_loss: m.rerl.statistic(),
            echo_return_loss: m.erl.statistic(),
            echo_return_loss_enhancement: m.erle.statistic(),
            a_nlp: m.a_nlp.statistic(),
            divergent_filter_fraction: if m.frames == 0 {
                0.0
            } else {
                m.divergent_frames as f32 / m.frames as f32
            },
        })
    }

    /// Spread of the delay estimates since the previous query.
    pub(crate) fn delay_metrics(&mut self) -> Result<DelayMetrics, Error> {
        if !self.enabled || !self.delay_logging_enabled {
            return Err(Error::NotEnabled);
        }
        if self.delay_history.is_empty() {
            return Ok(DelayMetrics::default());
        }
        let mut sorted: Vec<i32> = self.delay_history.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2];
        let n = sorted.len() as f32;
        let variance = sorted
            .iter()
            .map(|&d| ((d - median) as f32).powi(2))
            .sum::<f32>()
            / n;
        let poor = sorted
            .iter()
            .filter(|&&d| (d - median).abs() > POOR_DELAY_MS)
            .count();
        self.delay_history.clear();
        Ok(DelayMetrics {
            median_ms: median,
            std_ms: variance.sqrt().round() as i32,
            fraction_poor_delays: poor as f32 / n,
        })
    }

    fn reset_metrics(&mut self) {
        self.metrics = MetricsState::default();
    }
}

impl ProcessingComponent for EchoCancellation {
    fn initialize(&mut self, format: &StageFormat) {
        self.format = *format;
        let taps = self.num_taps();
        let per_ms = format.split_rate_hz / 1000;
        let max_delay = MAX_DELAY_MS * per_ms;
        let frames = format.num_frames_per_band();
        self.far_end = FarEndBuffer::new(max_delay + 2 * taps + 2 * frames);
        self.cancellers = (0..format.num_proc_channels)
            .map(|_| ChannelCanceller {
                filter: NlmsFilter::new(taps, STEP_SIZE, taps as f32 * 1.0e4),
                nlp_gain: 1.0,
            })
            .collect();
        self.delay_estimator = DelayEstimator::new(max_delay);
        self.delay_history.clear();
        self.accumulated_drift = 0;
        self.stream_has_echo = false;
        self.reference = Vec::with_capacity(frames + taps);
        self.near = Vec::with_capacity(frames);
        self.reset_metrics();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, enable: bool) -> Result<(), Error> {
        if enable && !self.enabled {
            let format = self.format;
            self.initialize(&format);
        }
        self.enabled = enable;
        Ok(())
    }
}

/// Packs the render low band of every channel, channel after channel.
pub(crate) fn pack_render_audio(audio: &mut AudioBuffer, item: &mut Vec<f32>) {
    let num_channels = audio.num_channels();
    let bands = audio.split_bands_const_f();
    for ch in 0..num_channels {
        item.extend_from_slice(bands.channel(LOW_BAND, ch));
    }
}

/// Settings and metrics of the echo canceller. Returned by
/// [`AudioProcessing::echo_cancellation`].
#[derive(Debug, Clone, Copy)]
pub struct EchoCancellationHandle<'a> {
    apm: &'a AudioProcessing,
}

impl<'a> EchoCancellationHandle<'a> {
    pub(crate) fn new(apm: &'a AudioProcessing) -> Self {
        Self { apm }
    }

    /// Fails with [`Error::BadParameter`] while echo control mobile is on.
    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        let (mut render, mut capture) = self.apm.lock_both();
        if enable && capture.echo_control_mobile.is_enabled() {
            tracing::error!("echo cancellation and echo control mobile are mutually exclusive");
            return Err(Error::BadParameter);
        }
        capture.echo_cancellation.enable(enable)?;
        render.flags.echo_cancellation = enable;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.apm.lock_capture().echo_cancellation.is_enabled()
    }

    /// Requires [`set_stream_drift_samples`](Self::set_stream_drift_samples)
    /// before every capture chunk.
    pub fn enable_drift_compensation(&self, enable: bool) {
        self.apm.lock_capture().echo_cancellation.drift_compensation_enabled = enable;
    }

    pub fn is_drift_compensation_enabled(&self) -> bool {
        self.apm.lock_capture().echo_cancellation.drift_compensation_enabled
    }

    /// Difference between render and capture clock, in samples per chunk.
    pub fn set_stream_drift_samples(&self, drift: i32) {
        self.apm
            .lock_capture()
            .echo_cancellation
            .set_stream_drift_samples(drift);
    }

    pub fn stream_drift_samples(&self) -> i32 {
        self.apm.lock_capture().echo_cancellation.stream_drift_samples()
    }

    pub fn set_suppression_level(&self, level: SuppressionLevel) {
        self.apm.lock_capture().echo_cancellation.suppression_level = level;
    }

    pub fn suppression_level(&self) -> SuppressionLevel {
        self.apm.lock_capture().echo_cancellation.suppression_level
    }

    /// Whether the last capture chunk carried echo.
    pub fn stream_has_echo(&self) -> bool {
        self.apm.lock_capture().echo_cancellation.stream_has_echo()
    }

    /// Turning metrics on starts them from scratch.
    pub fn enable_metrics(&self, enable: bool) {
        let mut capture = self.apm.lock_capture();
        if enable {
            capture.echo_cancellation.reset_metrics();
        }
        capture.echo_cancellation.metrics_enabled = enable;
    }

    pub fn are_metrics_enabled(&self) -> bool {
        self.apm.lock_capture().echo_cancellation.metrics_enabled
    }

    pub fn metrics(&self) -> Result<EchoMetrics, Error> {
        self.apm.lock_capture().echo_cancellation.metrics()
    }

    pub fn enable_delay_logging(&self, enable: bool) {
        let mut capture = self.apm.lock_capture();
        capture.echo_cancellation.delay_logging_enabled = enable;
        capture.echo_cancellation.delay_history.clear();
    }

    pub fn is_delay_logging_enabled(&self) -> bool {
        self.apm.lock_capture().echo_cancellation.delay_logging_enabled
    }

    pub fn delay_metrics(&self) -> Result<DelayMetrics, Error> {
        self.apm.lock_capture().echo_cancellation.delay_metrics()
    }

    pub fn is_extended_filter_enabled(&self) -> bool {
        self.apm.lock_capture().echo_cancellation.extended_filter
    }

    pub fn is_delay_agnostic_enabled(&self) -> bool {
        self.apm.lock_capture().echo_cancellation.delay_agnostic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(seed: &mut u32) -> f32 {
        *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        ((*seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0) * 8000.0
    }

    fn enabled_aec() -> EchoCancellation {
        let mut aec = EchoCancellation::new();
        aec.enable(true).unwrap();
        aec
    }

    /// Feeds `chunks` render chunks of noise and captures a copy of the
    /// render delayed by `delay` samples. Returns the energy of the last
    /// capture input and output.
    fn run_echo(aec: &mut EchoCancellation, chunks: usize, delay: usize, stream_delay_ms: i32) -> (f32, f32) {
        let mut writer = aec.connect_render_queue(160);
        let mut seed = 3;
        let mut history = vec![0.0f32; delay];
        let mut energies = (0.0, 0.0);
        for _ in 0..chunks {
            let far: Vec<f32> = (0..160).map(|_| noise(&mut seed)).collect();
            assert!(writer.write(|item| item.extend_from_slice(&far)));
            history.extend_from_slice(&far);
            let echo: Vec<f32> = history[..160].iter().map(|x| 0.5 * x).collect();
            history.drain(..160);

            let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
            audio.channels_f().bands_mut(0).copy_from_slice(&echo);
            aec.read_queued_render_data();
            aec.process_capture_audio(&mut audio, stream_delay_ms).unwrap();
            let out: f32 = audio.channels_const_f().bands(0).iter().map(|x| x * x).sum();
            let inp: f32 = echo.iter().map(|x| x * x).sum();
            energies = (inp, out);
        }
        energies
    }

    #[test]
    fn cancels_delayed_echo() {
        let mut aec = enabled_aec();
        let (input, output) = run_echo(&mut aec, 300, 160, 10);
        assert!(output < input * 0.01, "input {input} output {output}");
        assert!(aec.stream_has_echo());
    }

    #[test]
    fn disabled_canceller_leaves_audio() {
        let mut aec = EchoCancellation::new();
        let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
        audio.channels_f().bands_mut(0).fill(100.0);
        aec.process_capture_audio(&mut audio, 0).unwrap();
        assert!(audio.channels_const_f().bands(0).iter().all(|&x| x == 100.0));
    }

    #[test]
    fn drift_compensation_requires_drift() {
        let mut aec = enabled_aec();
        aec.drift_compensation_enabled = true;
        let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
        assert_eq!(
            aec.process_capture_audio(&mut audio, 0),
            Err(Error::StreamParameterNotSet)
        );
        aec.set_stream_drift_samples(2);
        assert_eq!(aec.process_capture_audio(&mut audio, 0), Ok(()));
        // Consumed by the previous chunk.
        assert_eq!(
            aec.process_capture_audio(&mut audio, 0),
            Err(Error::StreamParameterNotSet)
        );
    }

    #[test]
    fn implausible_drift_is_a_warning() {
        let mut aec = enabled_aec();
        aec.drift_compensation_enabled = true;
        aec.set_stream_drift_samples(1000);
        let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
        assert_eq!(
            aec.process_capture_audio(&mut audio, 0),
            Err(Error::BadStreamParameterWarning)
        );
    }

    #[test]
    fn metrics_require_enabling() {
        let mut aec = enabled_aec();
        assert_eq!(aec.metrics(), Err(Error::NotEnabled));
        assert_eq!(aec.delay_metrics(), Err(Error::NotEnabled));
        aec.metrics_enabled = true;
        run_echo(&mut aec, 100, 160, 10);
        let metrics = aec.metrics().unwrap();
        assert!(metrics.echo_return_loss_enhancement.average > 0);
        assert!(metrics.echo_return_loss.average > 0);
    }

    #[test]
    fn delay_logging_finds_the_echo_delay() {
        let mut aec = enabled_aec();
        aec.delay_logging_enabled = true;
        run_echo(&mut aec, 200, 800, 50);
        let metrics = aec.delay_metrics().unwrap();
        assert!((metrics.median_ms - 50).abs() <= 2, "{metrics:?}");
    }

    #[test]
    fn system_delay_counts_buffered_render() {
        let mut aec = enabled_aec();
        let mut writer = aec.connect_render_queue(160);
        for _ in 0..3 {
            assert!(writer.write(|item| item.extend_from_slice(&[0.0; 160])));
        }
        aec.read_queued_render_data();
        assert_eq!(aec.system_delay_ms(), 30);
    }
}
