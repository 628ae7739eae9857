//! Public audio processing API.
//!
//! [`AudioProcessing`] runs the capture (near-end) and render (far-end)
//! pipelines. The two halves are driven from different threads and guarded
//! by separate locks; when both are needed the render lock is always taken
//! first.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::audio_frame::AudioFrame;
use crate::audio_processing_impl::{
    initialize_locked, is_native_rate, rebuild_locked, CaptureSide, Formats, RenderSide,
    MAX_STREAM_DELAY_MS,
};
use crate::beamformer::Beamformer;
use crate::config::Config;
use crate::echo_cancellation::EchoCancellationHandle;
use crate::echo_control_mobile::EchoControlMobileHandle;
use crate::error::Error;
use crate::gain_control::GainControlHandle;
use crate::high_pass_filter::HighPassFilterHandle;
use crate::level_estimator::LevelEstimatorHandle;
use crate::noise_suppression::NoiseSuppressionHandle;
use crate::processing_component::ProcessingComponent;
use crate::stats::AudioProcessingStats;
use crate::stream_config::{ChannelLayout, ProcessingConfig, StreamConfig, StreamName};
use crate::voice_detection::VoiceDetectionHandle;

// ─── AudioProcessingBuilder ─────────────────────────────────────────

/// Builder for an [`AudioProcessing`] instance.
///
/// # Example
/// ```
/// use webrtc_apm::{AudioProcessingBuilder, Config};
///
/// let mut config = Config::default();
/// config.transient_suppression.enabled = true;
///
/// let apm = AudioProcessingBuilder::new().config(config).build().unwrap();
/// apm.noise_suppression().enable(true).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct AudioProcessingBuilder {
    config: Config,
    beamformer: Option<Box<dyn Beamformer>>,
}

impl AudioProcessingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construction-time options.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Beamformer used instead of the built-in delay-and-sum one. Only takes
    /// effect when [`Config::beamforming`] is enabled.
    pub fn beamformer(mut self, beamformer: Box<dyn Beamformer>) -> Self {
        self.beamformer = Some(beamformer);
        self
    }

    /// Fails with [`Error::BadParameter`] when beamforming is enabled without
    /// an array geometry.
    pub fn build(self) -> Result<AudioProcessing, Error> {
        let beamforming = &self.config.beamforming;
        if beamforming.enabled && beamforming.array_geometry.is_empty() {
            tracing::error!("beamforming enabled without an array geometry");
            return Err(Error::BadParameter);
        }

        let formats = Formats::derive(
            &ProcessingConfig::default(),
            self.config.intelligibility.enabled,
        );
        let mut render = RenderSide::new(formats, self.config.experimental_agc.enabled);
        let mut capture = CaptureSide::new(formats, self.config, self.beamformer);
        // Beamforming needs one input channel per microphone, which the
        // default mono format cannot satisfy. The first call with real
        // formats validates them.
        rebuild_locked(&mut render, &mut capture, formats)?;

        Ok(AudioProcessing {
            render: Mutex::new(render),
            capture: Mutex::new(capture),
        })
    }
}

// ─── AudioProcessing ────────────────────────────────────────────────

/// Echo cancellation, noise suppression, gain control and the other voice
/// processing stages, applied to 10 ms chunks.
///
/// # Usage
///
/// 1. Build an instance with [`AudioProcessingBuilder`] and enable stages
///    through their handles, e.g. [`noise_suppression()`](Self::noise_suppression).
/// 2. For each 10 ms chunk:
///    - pass the far-end audio to
///      [`process_reverse_stream_f32()`](Self::process_reverse_stream_f32) or
///      [`process_reverse_stream_frame()`](Self::process_reverse_stream_frame);
///    - set the per-chunk parameters the enabled stages need, such as
///      [`set_stream_delay_ms()`](Self::set_stream_delay_ms);
///    - pass the near-end audio to
///      [`process_stream_f32()`](Self::process_stream_f32) or
///      [`process_stream_frame()`](Self::process_stream_frame).
///
/// All methods take `&self`; the render and capture calls may come from
/// different threads.
#[derive(Debug)]
pub struct AudioProcessing {
    render: Mutex<RenderSide>,
    capture: Mutex<CaptureSide>,
}

impl AudioProcessing {
    /// An instance with default options.
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Locking ────────────────────────────────────────────────

    pub(crate) fn lock_render(&self) -> MutexGuard<'_, RenderSide> {
        self.render.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must not be called while holding the render lock; use
    /// [`lock_capture_with`](Self::lock_capture_with) then.
    pub(crate) fn lock_capture(&self) -> MutexGuard<'_, CaptureSide> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the capture lock while the render lock is held. Borrowing the
    /// render state proves the order.
    pub(crate) fn lock_capture_with(&self, _render: &RenderSide) -> MutexGuard<'_, CaptureSide> {
        self.lock_capture()
    }

    pub(crate) fn lock_both(&self) -> (MutexGuard<'_, RenderSide>, MutexGuard<'_, CaptureSide>) {
        let render = self.lock_render();
        let capture = self.lock_capture_with(&render);
        (render, capture)
    }

    /// Reinitializes when `config` differs from the active formats. Called
    /// with the render lock held.
    fn maybe_initialize(&self, render: &mut RenderSide, config: &ProcessingConfig) -> Result<(), Error> {
        if *config == render.formats.api {
            return Ok(());
        }
        let mut capture = self.lock_capture_with(render);
        initialize_locked(render, &mut capture, config)
    }

    // ─── Initialization and options ─────────────────────────────

    /// Rebuilds every stage for the current formats, dropping any state
    /// accumulated so far. Stage settings are kept.
    pub fn initialize(&self) -> Result<(), Error> {
        let (mut render, mut capture) = self.lock_both();
        let api = capture.formats.api;
        initialize_locked(&mut render, &mut capture, &api)
    }

    /// Rebuilds every stage for `config`, even if it matches the active
    /// formats.
    pub fn initialize_with_config(&self, config: &ProcessingConfig) -> Result<(), Error> {
        let (mut render, mut capture) = self.lock_both();
        initialize_locked(&mut render, &mut capture, config)
    }

    /// Changes the run-time options: echo canceller extras, transient
    /// suppression and the intelligibility enhancer. Beamforming and the
    /// experimental AGC keep their construction-time values.
    pub fn apply_config(&self, config: &Config) -> Result<(), Error> {
        let (mut render, mut capture) = self.lock_both();
        let capture = &mut *capture;

        capture.echo_cancellation.set_extra_options(
            config.echo_canceller.extended_filter,
            config.echo_canceller.delay_agnostic,
        );
        capture.config.echo_canceller = config.echo_canceller;

        if capture.config.transient_suppression != config.transient_suppression {
            tracing::debug!(enabled = config.transient_suppression.enabled, "transient suppression");
            capture.config.transient_suppression = config.transient_suppression;
            capture
                .transient_suppressor
                .enable(config.transient_suppression.enabled)?;
        }

        if capture.config.intelligibility != config.intelligibility {
            tracing::debug!(enabled = config.intelligibility.enabled, "intelligibility enhancer");
            capture.config.intelligibility = config.intelligibility;
            // The render rate depends on whether render audio is rewritten.
            let api = capture.formats.api;
            initialize_locked(&mut render, capture, &api)?;
        }
        Ok(())
    }

    /// The options in effect.
    pub fn config(&self) -> Config {
        self.lock_capture().config.clone()
    }

    // ─── Per-chunk parameters ───────────────────────────────────

    /// Delay in ms between a render chunk reaching the speaker and its echo
    /// reaching the capture input, plus the offset from
    /// [`set_delay_offset_ms`](Self::set_delay_offset_ms). Required before
    /// every capture chunk while echo cancellation or echo control mobile is
    /// on.
    ///
    /// Values outside `[0, 500]` are clamped and reported as
    /// [`Error::BadStreamParameterWarning`]; the clamped value is still used.
    pub fn set_stream_delay_ms(&self, delay_ms: i32) -> Result<(), Error> {
        let mut capture = self.lock_capture();
        capture.was_stream_delay_set = true;
        let delay = delay_ms.saturating_add(capture.delay_offset_ms);
        let clamped = delay.clamp(0, MAX_STREAM_DELAY_MS);
        capture.stream_delay_ms = clamped;
        if clamped != delay {
            tracing::warn!(delay, clamped, "stream delay out of range");
            return Err(Error::BadStreamParameterWarning);
        }
        Ok(())
    }

    pub fn stream_delay_ms(&self) -> i32 {
        self.lock_capture().stream_delay_ms
    }

    /// Whether the delay has been set since the last capture chunk.
    pub fn was_stream_delay_set(&self) -> bool {
        self.lock_capture().was_stream_delay_set
    }

    /// Constant added to every reported stream delay.
    pub fn set_delay_offset_ms(&self, offset_ms: i32) {
        self.lock_capture().delay_offset_ms = offset_ms;
    }

    pub fn delay_offset_ms(&self) -> i32 {
        self.lock_capture().delay_offset_ms
    }

    /// Whether a key was pressed during the coming capture chunk. Drives the
    /// transient suppressor.
    pub fn set_stream_key_pressed(&self, key_pressed: bool) {
        self.lock_capture().key_pressed = key_pressed;
    }

    /// Tells the experimental AGC that the capture output is about to be
    /// muted, so it stops adapting.
    pub fn set_output_will_be_muted(&self, muted: bool) {
        let mut capture = self.lock_capture();
        capture.output_will_be_muted = muted;
        if let Some(manager) = &mut capture.agc_manager {
            manager.set_capture_muted(muted);
        }
    }

    // ─── Capture ────────────────────────────────────────────────

    /// Processes one capture chunk of deinterleaved float audio in [-1, 1].
    ///
    /// `src` holds `input_config.num_channels()` slices of
    /// `input_config.num_frames()` samples, followed by the keyboard channel
    /// if the stream has one. `dest` receives `output_config.num_channels()`
    /// slices of `output_config.num_frames()` samples. The formats may change
    /// from call to call; the processor then reinitializes.
    pub fn process_stream_f32(
        &self,
        src: &[&[f32]],
        input_config: &StreamConfig,
        output_config: &StreamConfig,
        dest: &mut [&mut [f32]],
    ) -> Result<(), Error> {
        let mut config = {
            let mut capture = self.lock_capture();
            capture.read_queued_render_data();
            capture.formats.api
        };
        *config.stream_mut(StreamName::Input) = *input_config;
        *config.stream_mut(StreamName::Output) = *output_config;

        {
            let mut render = self.lock_render();
            self.maybe_initialize(&mut render, &config)?;
        }

        check_channels(src, input_config.num_buffer_channels(), input_config.num_frames())?;
        check_channels(dest, output_config.num_channels(), output_config.num_frames())?;

        let mut capture = self.lock_capture();
        let capture = &mut *capture;
        capture.audio.copy_from(src, input_config);
        capture.process_locked()?;
        capture.audio.copy_to(output_config, dest);
        Ok(())
    }

    /// Layout-based form of [`process_stream_f32`](Self::process_stream_f32).
    /// `samples_per_channel` must be one 10 ms chunk at
    /// `input_sample_rate_hz`, [`Error::BadDataLength`] otherwise.
    #[expect(clippy::too_many_arguments, reason = "mirrors the stream formats field by field")]
    pub fn process_stream_f32_with_layout(
        &self,
        src: &[&[f32]],
        samples_per_channel: usize,
        input_sample_rate_hz: usize,
        input_layout: ChannelLayout,
        output_sample_rate_hz: usize,
        output_layout: ChannelLayout,
        dest: &mut [&mut [f32]],
    ) -> Result<(), Error> {
        let input_config = input_layout.stream_config(input_sample_rate_hz);
        let output_config = output_layout.stream_config(output_sample_rate_hz);
        if samples_per_channel != input_config.num_frames() {
            return Err(Error::BadDataLength);
        }
        self.process_stream_f32(src, &input_config, &output_config, dest)
    }

    /// Processes one interleaved 16-bit capture chunk in place.
    ///
    /// Only the native rates 8, 16, 32 and 48 kHz are accepted. The samples
    /// are rewritten only when some stage changed them; the VAD decision is
    /// always written back.
    pub fn process_stream_frame(&self, frame: &mut AudioFrame) -> Result<(), Error> {
        let mut config = {
            let mut capture = self.lock_capture();
            capture.read_queued_render_data();
            capture.formats.api
        };
        if !is_native_rate(frame.sample_rate_hz()) {
            tracing::error!(rate = frame.sample_rate_hz(), "frame rate is not a native rate");
            return Err(Error::BadSampleRate);
        }
        let stream = StreamConfig::new(frame.sample_rate_hz(), frame.num_channels());
        *config.stream_mut(StreamName::Input) = stream;
        *config.stream_mut(StreamName::Output) = stream;

        {
            let mut render = self.lock_render();
            self.maybe_initialize(&mut render, &config)?;
        }
        if frame.samples_per_channel() != stream.num_frames() {
            return Err(Error::BadDataLength);
        }

        let mut capture = self.lock_capture();
        let capture = &mut *capture;
        capture.audio.deinterleave_from(frame);
        capture.process_locked()?;
        let data_changed = capture.output_copy_needed();
        capture.audio.interleave_to(frame, data_changed);
        Ok(())
    }

    // ─── Render ─────────────────────────────────────────────────

    /// Processes one render chunk of deinterleaved float audio in [-1, 1]
    /// and writes it to `dest` in `output_config`'s format, modified only if
    /// a render stage rewrites it.
    pub fn process_reverse_stream_f32(
        &self,
        src: &[&[f32]],
        input_config: &StreamConfig,
        output_config: &StreamConfig,
        dest: &mut [&mut [f32]],
    ) -> Result<(), Error> {
        if output_config.num_channels() == 0 {
            return Err(Error::BadNumberChannels);
        }
        let mut render = self.lock_render();
        self.analyze_reverse_stream_locked(&mut render, src, input_config, output_config)?;
        check_channels(dest, output_config.num_channels(), output_config.num_frames())?;

        let render = &mut *render;
        if render.rev_processed() {
            if let Some(audio) = &mut render.audio {
                audio.copy_to(output_config, dest);
            }
        } else if let Some(converter) = &mut render.converter {
            converter.convert(src, dest);
        } else {
            for (out, input) in dest.iter_mut().zip(src).take(input_config.num_channels()) {
                let n = input_config.num_frames();
                out[..n].copy_from_slice(&input[..n]);
            }
        }
        Ok(())
    }

    /// Feeds one render chunk to the echo and gain stages without producing
    /// output.
    pub fn analyze_reverse_stream_f32(
        &self,
        src: &[&[f32]],
        samples_per_channel: usize,
        sample_rate_hz: usize,
        layout: ChannelLayout,
    ) -> Result<(), Error> {
        let config = layout.stream_config(sample_rate_hz);
        if samples_per_channel != config.num_frames() {
            return Err(Error::BadDataLength);
        }
        let mut render = self.lock_render();
        self.analyze_reverse_stream_locked(&mut render, src, &config, &config)
    }

    fn analyze_reverse_stream_locked(
        &self,
        render: &mut RenderSide,
        src: &[&[f32]],
        input_config: &StreamConfig,
        output_config: &StreamConfig,
    ) -> Result<(), Error> {
        if input_config.num_channels() == 0 {
            return Err(Error::BadNumberChannels);
        }
        let mut config = render.formats.api;
        *config.stream_mut(StreamName::ReverseInput) = *input_config;
        *config.stream_mut(StreamName::ReverseOutput) = *output_config;
        self.maybe_initialize(render, &config)?;
        check_channels(src, input_config.num_buffer_channels(), input_config.num_frames())?;

        if let Some(audio) = &mut render.audio {
            audio.copy_from(src, input_config);
        }
        self.process_reverse_stream_locked(render);
        Ok(())
    }

    /// Processes one interleaved 16-bit render chunk in place. Native rates
    /// only; the samples are rewritten only if a render stage changed them.
    pub fn process_reverse_stream_frame(&self, frame: &mut AudioFrame) -> Result<(), Error> {
        let mut render = self.lock_render();
        if !is_native_rate(frame.sample_rate_hz()) {
            tracing::error!(rate = frame.sample_rate_hz(), "frame rate is not a native rate");
            return Err(Error::BadSampleRate);
        }
        if frame.num_channels() == 0 {
            return Err(Error::BadNumberChannels);
        }
        let stream = StreamConfig::new(frame.sample_rate_hz(), frame.num_channels());
        let mut config = render.formats.api;
        *config.stream_mut(StreamName::ReverseInput) = stream;
        *config.stream_mut(StreamName::ReverseOutput) = stream;
        self.maybe_initialize(&mut render, &config)?;
        if frame.samples_per_channel() != stream.num_frames() {
            return Err(Error::BadDataLength);
        }

        if let Some(audio) = &mut render.audio {
            audio.deinterleave_from(frame);
        }
        self.process_reverse_stream_locked(&mut render);
        if render.rev_processed()
            && let Some(audio) = &mut render.audio
        {
            audio.interleave_to(frame, true);
        }
        Ok(())
    }

    fn process_reverse_stream_locked(&self, render: &mut RenderSide) {
        render.process_locked(|render| self.lock_capture_with(render).read_queued_render_data());
    }

    // ─── Queries ────────────────────────────────────────────────

    /// Full-band rate the capture stages run at.
    pub fn proc_sample_rate_hz(&self) -> usize {
        self.lock_capture().formats.fwd_proc.sample_rate_hz()
    }

    /// Rate of the lowest capture band.
    pub fn proc_split_sample_rate_hz(&self) -> usize {
        self.lock_capture().formats.split_rate_hz
    }

    pub fn num_input_channels(&self) -> usize {
        self.lock_capture().formats.api.input_stream().num_channels()
    }

    /// Capture channels the stages see: 1 with beamforming, otherwise the
    /// output channel count.
    pub fn num_proc_channels(&self) -> usize {
        let capture = self.lock_capture();
        capture.formats.num_proc_channels(capture.beamforming())
    }

    pub fn num_output_channels(&self) -> usize {
        self.lock_capture().formats.api.output_stream().num_channels()
    }

    /// Render channels the stages see; render processing is mono.
    pub fn num_reverse_channels(&self) -> usize {
        self.lock_capture().formats.rev_proc.num_channels()
    }

    /// The stream formats of the last call.
    pub fn processing_config(&self) -> ProcessingConfig {
        self.lock_capture().formats.api
    }

    /// Delay-jump counts of the current call.
    pub fn statistics(&self) -> AudioProcessingStats {
        self.lock_capture().delay_jumps.stats()
    }

    /// Logs the delay-jump counts of the finished call and starts counting
    /// afresh.
    pub fn update_histograms_on_call_end(&self) -> AudioProcessingStats {
        self.lock_capture().delay_jumps.end_call()
    }

    // ─── Stage handles ──────────────────────────────────────────

    pub fn echo_cancellation(&self) -> EchoCancellationHandle<'_> {
        EchoCancellationHandle::new(self)
    }

    pub fn echo_control_mobile(&self) -> EchoControlMobileHandle<'_> {
        EchoControlMobileHandle::new(self)
    }

    pub fn gain_control(&self) -> GainControlHandle<'_> {
        GainControlHandle::new(self)
    }

    pub fn high_pass_filter(&self) -> HighPassFilterHandle<'_> {
        HighPassFilterHandle::new(self)
    }

    pub fn noise_suppression(&self) -> NoiseSuppressionHandle<'_> {
        NoiseSuppressionHandle::new(self)
    }

    pub fn voice_detection(&self) -> VoiceDetectionHandle<'_> {
        VoiceDetectionHandle::new(self)
    }

    pub fn level_estimator(&self) -> LevelEstimatorHandle<'_> {
        LevelEstimatorHandle::new(self)
    }

    /// Whether the transient suppressor is currently on.
    pub fn is_transient_suppression_enabled(&self) -> bool {
        self.lock_capture().transient_suppressor.is_enabled()
    }
}

impl Default for AudioProcessing {
    fn default() -> Self {
        let render_formats = Formats::derive(&ProcessingConfig::default(), false);
        let mut render = RenderSide::new(render_formats, false);
        let mut capture = CaptureSide::new(render_formats, Config::default(), None);
        // Only the experimental AGC can fail to configure, and it is off by
        // default.
        let rebuilt = rebuild_locked(&mut render, &mut capture, render_formats);
        debug_assert!(rebuilt.is_ok(), "default rebuild failed: {rebuilt:?}");
        Self {
            render: Mutex::new(render),
            capture: Mutex::new(capture),
        }
    }
}

/// At least `num_channels` slices of at least `num_frames` samples.
fn check_channels<S: AsRef<[f32]>>(data: &[S], num_channels: usize, num_frames: usize) -> Result<(), Error> {
    if data.len() < num_channels || data[..num_channels].iter().any(|ch| ch.as_ref().len() < num_frames) {
        tracing::error!(num_channels, num_frames, "channel data too short");
        return Err(Error::BadDataLength);
    }
    Ok(())
}
