//! State behind the two locks of [`AudioProcessing`](crate::AudioProcessing)
//! and the locked halves of its entry points.
//!
//! Everything the render thread touches lives in [`RenderSide`], everything
//! the capture thread touches in [`CaptureSide`]. The stream formats are
//! copied into both and only rewritten while both locks are held.

use crate::agc_manager::AgcManager;
use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::audio_converter::AudioConverter;
use crate::beamformer::{Beamformer, DelayAndSumBeamformer};
use crate::config::Config;
use crate::echo_cancellation::{self, EchoCancellation};
use crate::echo_control_mobile::{self, EchoControlMobile};
use crate::error::Error;
use crate::gain_control::{self, GainControl};
use crate::high_pass_filter::HighPassFilter;
use crate::intelligibility_enhancer::{noise_estimate_feed, IntelligibilityEnhancer, NoiseEstimateFeed};
use crate::level_estimator::LevelEstimator;
use crate::noise_suppression::NoiseSuppression;
use crate::processing_component::{ProcessingComponent, StageFormat};
use crate::render_queue::RenderQueueWriter;
use crate::stats::DelayJumpTracker;
use crate::stream_config::{ProcessingConfig, StreamConfig};
use crate::submodule_states::{StageFlags, SubmoduleStates};
use crate::transient_suppressor::TransientSuppressor;
use crate::voice_detection::VoiceDetection;

/// Rates the stages run at, and the only rates the integer entry points
/// accept.
pub(crate) const NATIVE_SAMPLE_RATES_HZ: [usize; 4] = [8000, 16000, 32000, 48000];
const MIN_SAMPLE_RATE_HZ: usize = 8000;
const MAX_SAMPLE_RATE_HZ: usize = 384_000;
/// Rate of the lowest band once a stream is split.
const BAND_SPLIT_RATE_HZ: usize = 16000;
const CHUNK_SIZE_MS: usize = 10;

pub(crate) const MAX_STREAM_DELAY_MS: i32 = 500;

pub(crate) fn is_native_rate(sample_rate_hz: usize) -> bool {
    NATIVE_SAMPLE_RATES_HZ.contains(&sample_rate_hz)
}

fn closest_higher_native_rate(min_proc_rate_hz: usize) -> usize {
    NATIVE_SAMPLE_RATES_HZ
        .iter()
        .copied()
        .find(|&rate| rate >= min_proc_rate_hz)
        .unwrap_or(NATIVE_SAMPLE_RATES_HZ[NATIVE_SAMPLE_RATES_HZ.len() - 1])
}

fn is_multi_band(sample_rate_hz: usize) -> bool {
    sample_rate_hz == 32000 || sample_rate_hz == 48000
}

// ─── Formats ─────────────────────────────────────────────────────────

/// The caller's stream formats plus the internal rates derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Formats {
    pub(crate) api: ProcessingConfig,
    pub(crate) fwd_proc: StreamConfig,
    pub(crate) rev_proc: StreamConfig,
    pub(crate) split_rate_hz: usize,
}

impl Formats {
    /// Capture runs at the lowest native rate covering both capture streams.
    /// Render is narrower: it only feeds the echo and gain stages unless the
    /// intelligibility enhancer rewrites it.
    pub(crate) fn derive(api: &ProcessingConfig, rev_processed: bool) -> Self {
        let fwd_rate = closest_higher_native_rate(
            api.input_stream()
                .sample_rate_hz()
                .min(api.output_stream().sample_rate_hz()),
        );

        let mut rev_rate = closest_higher_native_rate(
            api.reverse_input_stream()
                .sample_rate_hz()
                .min(api.reverse_output_stream().sample_rate_hz()),
        );
        if rev_rate > 32000 {
            rev_rate = if rev_processed { 32000 } else { 16000 };
        }
        rev_rate = if fwd_rate == 8000 {
            8000
        } else {
            rev_rate.max(16000)
        };

        let split_rate_hz = if is_multi_band(fwd_rate) {
            BAND_SPLIT_RATE_HZ
        } else {
            fwd_rate
        };

        Self {
            api: *api,
            fwd_proc: StreamConfig::new(fwd_rate, 1),
            rev_proc: StreamConfig::new(rev_rate, 1),
            split_rate_hz,
        }
    }

    pub(crate) fn fwd_multi_band(&self) -> bool {
        is_multi_band(self.fwd_proc.sample_rate_hz())
    }

    pub(crate) fn rev_multi_band(&self) -> bool {
        is_multi_band(self.rev_proc.sample_rate_hz())
    }

    pub(crate) fn rev_split_rate_hz(&self) -> usize {
        if self.rev_multi_band() {
            BAND_SPLIT_RATE_HZ
        } else {
            self.rev_proc.sample_rate_hz()
        }
    }

    /// Capture channels the stages see.
    pub(crate) fn num_proc_channels(&self, beamforming: bool) -> usize {
        if beamforming {
            1
        } else {
            self.api.output_stream().num_channels()
        }
    }

    fn stage_format(&self, beamforming: bool) -> StageFormat {
        StageFormat {
            sample_rate_hz: self.fwd_proc.sample_rate_hz(),
            split_rate_hz: self.split_rate_hz,
            num_proc_channels: self.num_proc_channels(beamforming),
            num_output_channels: self.api.output_stream().num_channels(),
            num_reverse_channels: self.rev_proc.num_channels(),
        }
    }
}

/// Rejects stream formats the pipeline cannot be built for.
/// `num_microphones` is set when beamforming is on.
pub(crate) fn validate_formats(api: &ProcessingConfig, num_microphones: Option<usize>) -> Result<(), Error> {
    for stream in api.streams() {
        let rate = stream.sample_rate_hz();
        if stream.num_channels() > 0 && !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&rate) {
            tracing::error!(rate, "unsupported sample rate");
            return Err(Error::BadSampleRate);
        }
    }

    let num_in = api.input_stream().num_channels();
    let num_out = api.output_stream().num_channels();
    if num_in == 0 || !(num_out == 1 || num_out == num_in) {
        tracing::error!(num_in, num_out, "unsupported capture channel counts");
        return Err(Error::BadNumberChannels);
    }
    if let Some(num_microphones) = num_microphones
        && num_in != num_microphones
    {
        tracing::error!(num_in, num_microphones, "capture channels must match the array geometry");
        return Err(Error::BadNumberChannels);
    }

    let rev_in = api.reverse_input_stream().num_channels();
    let rev_out = api.reverse_output_stream().num_channels();
    if rev_in > 0 && rev_out > 0 && rev_in != rev_out && rev_in != 1 && rev_out != 1 {
        tracing::error!(rev_in, rev_out, "unsupported render channel counts");
        return Err(Error::BadNumberChannels);
    }
    Ok(())
}

// ─── Render side ─────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct RenderSide {
    pub(crate) formats: Formats,
    pub(crate) audio: Option<AudioBuffer>,
    pub(crate) converter: Option<AudioConverter>,
    /// Which capture stages want render data. Written by the stage handles
    /// with both locks held.
    pub(crate) flags: StageFlags,
    states: SubmoduleStates,
    experimental_agc: bool,
    aec_writer: Option<RenderQueueWriter<f32>>,
    aecm_writer: Option<RenderQueueWriter<i16>>,
    gc_writer: Option<RenderQueueWriter<i16>>,
    intelligibility: Option<IntelligibilityEnhancer>,
}

impl RenderSide {
    pub(crate) fn new(formats: Formats, experimental_agc: bool) -> Self {
        Self {
            formats,
            audio: None,
            converter: None,
            flags: StageFlags::default(),
            states: SubmoduleStates::new(),
            experimental_agc,
            aec_writer: None,
            aecm_writer: None,
            gc_writer: None,
            intelligibility: None,
        }
    }

    /// Whether render audio comes out different from how it went in.
    pub(crate) fn rev_processed(&self) -> bool {
        self.intelligibility.is_some()
    }

    /// Runs the render pipeline on the chunk already copied into the render
    /// buffer. If a queue is full, `drain_capture` is called so the capture
    /// side empties the queues, and the handoff is retried.
    pub(crate) fn process_locked(&mut self, drain_capture: impl FnOnce(&RenderSide)) {
        let multi_band = self.formats.rev_multi_band();
        self.flags.intelligibility = self.intelligibility.is_some();
        self.states.update(self.flags);
        let flags = self.flags;

        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        if self.states.rev_analysis_needed(multi_band) {
            audio.split_into_frequency_bands();
        }
        if let Some(enhancer) = &mut self.intelligibility {
            enhancer.process_render_audio(audio);
        }

        let mut delivered = true;
        if flags.echo_cancellation
            && let Some(writer) = &mut self.aec_writer
        {
            delivered &= writer.write(|item| echo_cancellation::pack_render_audio(audio, item));
        }
        if flags.echo_control_mobile
            && let Some(writer) = &mut self.aecm_writer
        {
            delivered &= writer.write(|item| echo_control_mobile::pack_render_audio(audio, item));
        }
        if flags.gain_control
            && !self.experimental_agc
            && let Some(writer) = &mut self.gc_writer
        {
            delivered &= writer.write(|item| gain_control::pack_render_audio(audio, item));
        }

        if !delivered {
            tracing::debug!("render queue full, draining from the render thread");
            drain_capture(self);
            let retried = [
                self.aec_writer.as_mut().is_none_or(RenderQueueWriter::retry),
                self.aecm_writer.as_mut().is_none_or(RenderQueueWriter::retry),
                self.gc_writer.as_mut().is_none_or(RenderQueueWriter::retry),
            ];
            debug_assert!(retried.iter().all(|&ok| ok), "queue still full after a drain");
        }

        if self.states.rev_synthesis_needed(multi_band)
            && let Some(audio) = self.audio.as_mut()
        {
            audio.merge_frequency_bands();
        }
    }
}

// ─── Capture side ────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct CaptureSide {
    pub(crate) formats: Formats,
    /// Construction options. Beamforming and the experimental AGC never
    /// change after construction.
    pub(crate) config: Config,
    pub(crate) audio: AudioBuffer,
    pub(crate) states: SubmoduleStates,

    pub(crate) echo_cancellation: EchoCancellation,
    pub(crate) echo_control_mobile: EchoControlMobile,
    pub(crate) gain_control: GainControl,
    pub(crate) agc_manager: Option<AgcManager>,
    pub(crate) noise_suppression: NoiseSuppression,
    pub(crate) high_pass_filter: HighPassFilter,
    pub(crate) voice_detection: VoiceDetection,
    pub(crate) level_estimator: LevelEstimator,
    pub(crate) transient_suppressor: TransientSuppressor,
    pub(crate) beamformer: Option<Box<dyn Beamformer>>,
    noise_feed: Option<NoiseEstimateFeed>,

    pub(crate) stream_delay_ms: i32,
    pub(crate) was_stream_delay_set: bool,
    pub(crate) delay_offset_ms: i32,
    pub(crate) key_pressed: bool,
    pub(crate) output_will_be_muted: bool,
    pub(crate) delay_jumps: DelayJumpTracker,
}

impl CaptureSide {
    /// `beamformer` replaces the default delay-and-sum beamformer when
    /// beamforming is configured.
    pub(crate) fn new(formats: Formats, config: Config, beamformer: Option<Box<dyn Beamformer>>) -> Self {
        let beamformer = if config.beamforming.enabled {
            Some(beamformer.unwrap_or_else(|| {
                Box::new(DelayAndSumBeamformer::new(
                    &config.beamforming.array_geometry,
                    config.beamforming.target_direction,
                ))
            }))
        } else {
            None
        };
        let agc_manager = config
            .experimental_agc
            .enabled
            .then(|| AgcManager::new(config.experimental_agc.startup_min_volume));
        let input = formats.api.input_stream();
        Self {
            formats,
            audio: AudioBuffer::new(input.num_frames(), input.num_channels(), 160, 1, 160),
            states: SubmoduleStates::new(),
            echo_cancellation: EchoCancellation::new(),
            echo_control_mobile: EchoControlMobile::new(),
            gain_control: GainControl::new(),
            agc_manager,
            noise_suppression: NoiseSuppression::new(),
            high_pass_filter: HighPassFilter::new(),
            voice_detection: VoiceDetection::new(),
            level_estimator: LevelEstimator::new(),
            transient_suppressor: TransientSuppressor::new(),
            beamformer,
            noise_feed: None,
            stream_delay_ms: 0,
            was_stream_delay_set: false,
            delay_offset_ms: 0,
            key_pressed: false,
            output_will_be_muted: false,
            delay_jumps: DelayJumpTracker::default(),
            config,
        }
    }

    pub(crate) fn beamforming(&self) -> bool {
        self.beamformer.is_some()
    }

    fn flags(&self) -> StageFlags {
        StageFlags {
            beamformer: self.beamforming(),
            high_pass_filter: self.high_pass_filter.is_enabled(),
            noise_suppression: self.noise_suppression.is_enabled(),
            echo_cancellation: self.echo_cancellation.is_enabled(),
            echo_control_mobile: self.echo_control_mobile.is_enabled(),
            gain_control: self.gain_control.is_enabled(),
            voice_detection: self.voice_detection.is_enabled(),
            level_estimator: self.level_estimator.is_enabled(),
            transient_suppression: self.transient_suppressor.is_enabled(),
            intelligibility: self.noise_feed.is_some(),
        }
    }

    /// Pulls everything the render side queued since the last chunk.
    pub(crate) fn read_queued_render_data(&mut self) {
        self.echo_cancellation.read_queued_render_data();
        self.echo_control_mobile.read_queued_render_data();
        self.gain_control.read_queued_render_data();
    }

    /// Whether the capture output differs from the input, so it must be
    /// written back.
    pub(crate) fn output_copy_needed(&self) -> bool {
        self.states.output_copy_needed(
            self.formats.api.input_stream().num_channels(),
            self.formats.api.output_stream().num_channels(),
        )
    }

    fn update_delay_jumps(&mut self) {
        if self.echo_cancellation.is_enabled() {
            self.delay_jumps.update(
                self.echo_cancellation.stream_has_echo(),
                self.stream_delay_ms,
                self.echo_cancellation.system_delay_ms(),
            );
        }
    }

    /// Runs the capture pipeline on the chunk already copied into the
    /// capture buffer.
    pub(crate) fn process_locked(&mut self) -> Result<(), Error> {
        debug_assert!(
            !(self.echo_cancellation.is_enabled() && self.echo_control_mobile.is_enabled()),
            "echo cancellation and echo control mobile are both on"
        );
        self.update_delay_jumps();
        self.states.update(self.flags());
        let multi_band = self.formats.fwd_multi_band();

        if self.gain_control.is_enabled()
            && let Some(manager) = &mut self.agc_manager
        {
            manager.analyze_pre_process(self.audio.channels_const().bands(0));
        }

        if self.states.fwd_analysis_needed(multi_band) {
            self.audio.split_into_frequency_bands();
        }

        if let Some(beamformer) = &mut self.beamformer {
            let num_microphones = self.config.beamforming.array_geometry.len();
            if self.audio.num_channels() != num_microphones {
                tracing::error!(
                    channels = self.audio.num_channels(),
                    num_microphones,
                    "capture channels do not match the array geometry"
                );
                return Err(Error::BadNumberChannels);
            }
            beamformer.process_chunk(self.audio.split_bands_f());
            self.audio.set_num_channels(1);
        }

        self.high_pass_filter.process_capture_audio(&mut self.audio);
        self.gain_control.analyze_capture_audio(&mut self.audio);
        self.noise_suppression.analyze_capture_audio(&mut self.audio);

        if self.echo_cancellation.is_enabled() && !self.was_stream_delay_set {
            return Err(Error::StreamParameterNotSet);
        }
        match self
            .echo_cancellation
            .process_capture_audio(&mut self.audio, self.stream_delay_ms)
        {
            Err(err) if err.is_warning() => {
                tracing::warn!(error = %err, "echo cancellation stream warning");
            }
            result => result?,
        }

        if self.echo_control_mobile.is_enabled() && self.noise_suppression.is_enabled() {
            self.audio.copy_low_pass_to_reference();
        }
        self.noise_suppression.process_capture_audio(&mut self.audio);

        if let Some(feed) = &mut self.noise_feed {
            let gain_db = if self.gain_control.is_enabled() {
                self.gain_control.compression_gain_db() as f32
            } else {
                0.0
            };
            feed.send(&self.noise_suppression.noise_estimate(), gain_db);
        }

        if self.echo_control_mobile.is_enabled() && !self.was_stream_delay_set {
            return Err(Error::StreamParameterNotSet);
        }
        self.echo_control_mobile
            .process_capture_audio(&mut self.audio, self.stream_delay_ms)?;

        self.voice_detection.process_capture_audio(&mut self.audio);

        let target_present = self
            .beamformer
            .as_ref()
            .is_none_or(|beamformer| beamformer.is_target_present());
        if self.gain_control.is_enabled()
            && target_present
            && let Some(manager) = &mut self.agc_manager
        {
            let low_band = self.audio.split_bands_const().channel(LOW_BAND, 0);
            manager.process(low_band, &mut self.gain_control)?;
        }
        let stream_has_echo = self.echo_cancellation.stream_has_echo();
        self.gain_control
            .process_capture_audio(&mut self.audio, stream_has_echo)?;

        if self.states.fwd_synthesis_needed(multi_band) {
            self.audio.merge_frequency_bands();
        }

        let voice_probability = self
            .agc_manager
            .as_ref()
            .map_or(1.0, AgcManager::voice_probability);
        self.transient_suppressor
            .process(&mut self.audio, voice_probability, self.key_pressed);

        self.level_estimator.process_stream(&mut self.audio);

        self.was_stream_delay_set = false;
        Ok(())
    }
}

// ─── Initialization ──────────────────────────────────────────────────

/// Validates `api` and rebuilds everything for it.
pub(crate) fn initialize_locked(
    render: &mut RenderSide,
    capture: &mut CaptureSide,
    api: &ProcessingConfig,
) -> Result<(), Error> {
    let beamforming = &capture.config.beamforming;
    validate_formats(
        api,
        beamforming
            .enabled
            .then_some(beamforming.array_geometry.len()),
    )?;
    let formats = Formats::derive(api, capture.config.intelligibility.enabled);
    rebuild_locked(render, capture, formats)
}

/// Reallocates the buffers for `formats` and reinitializes every stage.
pub(crate) fn rebuild_locked(
    render: &mut RenderSide,
    capture: &mut CaptureSide,
    formats: Formats,
) -> Result<(), Error> {
    tracing::debug!(old = ?capture.formats, new = ?formats, "reinitializing");
    render.formats = formats;
    capture.formats = formats;
    let api = &formats.api;
    let beamforming = capture.beamforming();

    let rev_in = api.reverse_input_stream();
    let rev_out = api.reverse_output_stream();
    if rev_in.num_channels() > 0 {
        let rev_out_frames = if rev_out.num_frames() == 0 {
            formats.rev_proc.num_frames()
        } else {
            rev_out.num_frames()
        };
        render.audio = Some(AudioBuffer::new(
            rev_in.num_frames(),
            rev_in.num_channels(),
            formats.rev_proc.num_frames(),
            formats.rev_proc.num_channels(),
            rev_out_frames,
        ));
        render.converter = (rev_in != rev_out && rev_out.num_channels() > 0).then(|| {
            AudioConverter::new(
                rev_in.num_channels(),
                rev_in.num_frames(),
                rev_out.num_channels(),
                rev_out.num_frames(),
            )
        });
    } else {
        render.audio = None;
        render.converter = None;
    }

    let input = api.input_stream();
    let fwd_audio_buffer_channels = if beamforming {
        input.num_channels()
    } else {
        api.output_stream().num_channels()
    };
    capture.audio = AudioBuffer::new(
        input.num_frames(),
        input.num_channels(),
        formats.fwd_proc.num_frames(),
        fwd_audio_buffer_channels,
        api.output_stream().num_frames(),
    );

    let stage_format = formats.stage_format(beamforming);
    let rev_split_frames = formats.rev_split_rate_hz() / 100;
    let queue_element_size = rev_split_frames * formats.rev_proc.num_channels();

    capture.echo_cancellation.initialize(&stage_format);
    render.aec_writer = Some(capture.echo_cancellation.connect_render_queue(queue_element_size));
    capture.echo_control_mobile.initialize(&stage_format);
    render.aecm_writer = Some(capture.echo_control_mobile.connect_render_queue(queue_element_size));
    capture.gain_control.initialize(&stage_format);
    render.gc_writer = Some(capture.gain_control.connect_render_queue(queue_element_size));

    if let Some(manager) = &mut capture.agc_manager {
        manager.initialize(&stage_format);
        manager.set_capture_muted(capture.output_will_be_muted);
        manager.configure_gain_control(&mut capture.gain_control)?;
    }

    capture
        .transient_suppressor
        .enable(capture.config.transient_suppression.enabled)?;
    capture.transient_suppressor.initialize(&stage_format);

    if let Some(beamformer) = &mut capture.beamformer {
        beamformer.initialize(CHUNK_SIZE_MS, formats.split_rate_hz);
    }

    if capture.config.intelligibility.enabled {
        let (feed, reader) = noise_estimate_feed(formats.split_rate_hz / 100 + 1);
        render.intelligibility = Some(IntelligibilityEnhancer::new(
            formats.rev_split_rate_hz(),
            formats.split_rate_hz,
            reader,
        ));
        capture.noise_feed = Some(feed);
    } else {
        render.intelligibility = None;
        capture.noise_feed = None;
    }

    capture.high_pass_filter.initialize(&stage_format);
    capture.noise_suppression.initialize(&stage_format);
    capture.level_estimator.initialize(&stage_format);
    capture.voice_detection.initialize(&stage_format);
    Ok(())
}
