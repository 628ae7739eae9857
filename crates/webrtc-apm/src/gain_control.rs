//! Automatic gain control on the capture path.
//!
//! Tracks the speech level of the split low band and moves it towards the
//! target, either by suggesting a new analog (microphone) level to the
//! application or by applying digital gain, and optionally limits the
//! output below full scale.

use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::audio_processing::AudioProcessing;
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};
use crate::render_queue::{RenderQueueReader, RenderQueueWriter, render_queue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Suggest analog levels through
    /// [`GainControlHandle::stream_analog_level`]; the application must
    /// report the current level every chunk.
    #[default]
    AdaptiveAnalog,
    /// Adaptive digital gain for devices without analog volume control.
    AdaptiveDigital,
    /// Fixed digital gain of [`GainControlHandle::compression_gain_db`].
    FixedDigital,
}

const MAX_TARGET_LEVEL_DBFS: i32 = 31;
const MAX_COMPRESSION_GAIN_DB: i32 = 90;
const MAX_ANALOG_LEVEL: i32 = 65535;
// Below this the frame is treated as background, not speech.
const SPEECH_FLOOR_DBFS: f32 = -60.0;
const FAR_END_ACTIVE_DBFS: f32 = -40.0;
const FAR_END_HOLD_FRAMES: u32 = 10;
const LIMITER_CEILING: f32 = 32000.0;
const LIMITER_KNEE: f32 = 0.9 * LIMITER_CEILING;

fn frame_level_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return -100.0;
    }
    let energy: f32 = samples.iter().map(|&s| f32::from(s).powi(2)).sum();
    let rms = (energy / samples.len() as f32).sqrt();
    20.0 * (rms.max(1.0) / 32768.0).log10()
}

fn limit(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= LIMITER_KNEE {
        return sample;
    }
    let headroom = LIMITER_CEILING - LIMITER_KNEE;
    let compressed = LIMITER_KNEE + headroom * ((magnitude - LIMITER_KNEE) / headroom).tanh();
    compressed.copysign(sample)
}

#[derive(Debug, Clone, Copy)]
struct ChannelGain {
    level_dbfs: f32,
    gain_db: f32,
    capture_level: i32,
}

#[derive(Debug)]
pub(crate) struct GainControl {
    enabled: bool,
    mode: Mode,
    target_level_dbfs: i32,
    compression_gain_db: i32,
    limiter_enabled: bool,
    analog_level_minimum: i32,
    analog_level_maximum: i32,
    analog_capture_level: i32,
    was_analog_level_set: bool,
    stream_is_saturated: bool,

    format: StageFormat,
    channels: Vec<ChannelGain>,
    far_end_hold: u32,
    render_reader: Option<RenderQueueReader<i16>>,
}

impl GainControl {
    pub(crate) fn new() -> Self {
        let mut gc = Self {
            enabled: false,
            mode: Mode::default(),
            target_level_dbfs: 3,
            compression_gain_db: 9,
            limiter_enabled: true,
            analog_level_minimum: 0,
            analog_level_maximum: 255,
            analog_capture_level: 0,
            was_analog_level_set: false,
            stream_is_saturated: false,
            format: StageFormat::default(),
            channels: Vec::new(),
            far_end_hold: 0,
            render_reader: None,
        };
        gc.initialize(&StageFormat::default());
        gc
    }

    pub(crate) fn connect_render_queue(&mut self, element_size: usize) -> RenderQueueWriter<i16> {
        let (writer, reader) = render_queue(element_size);
        self.render_reader = Some(reader);
        writer
    }

    /// Far-end activity holds level tracking so echo is not mistaken for
    /// near-end speech.
    pub(crate) fn read_queued_render_data(&mut self) {
        let enabled = self.enabled;
        let Some(reader) = &mut self.render_reader else {
            return;
        };
        let hold = &mut self.far_end_hold;
        reader.drain(|item| {
            if enabled && frame_level_dbfs(item) > FAR_END_ACTIVE_DBFS {
                *hold = FAR_END_HOLD_FRAMES;
            }
        });
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub(crate) fn compression_gain_db(&self) -> i32 {
        self.compression_gain_db
    }

    pub(crate) fn set_target_level_dbfs(&mut self, level: i32) -> Result<(), Error> {
        if !(0..=MAX_TARGET_LEVEL_DBFS).contains(&level) {
            return Err(Error::BadParameter);
        }
        self.target_level_dbfs = level;
        Ok(())
    }

    pub(crate) fn set_compression_gain_db(&mut self, gain: i32) -> Result<(), Error> {
        if !(0..=MAX_COMPRESSION_GAIN_DB).contains(&gain) {
            return Err(Error::BadParameter);
        }
        self.compression_gain_db = gain;
        Ok(())
    }

    pub(crate) fn enable_limiter(&mut self, enable: bool) {
        self.limiter_enabled = enable;
    }

    /// Counts as set even when out of range, so a bad level does not also
    /// trigger [`Error::StreamParameterNotSet`].
    pub(crate) fn set_stream_analog_level(&mut self, level: i32) -> Result<(), Error> {
        self.was_analog_level_set = true;
        if level < self.analog_level_minimum || level > self.analog_level_maximum {
            return Err(Error::BadParameter);
        }
        self.analog_capture_level = level;
        Ok(())
    }

    pub(crate) fn stream_analog_level(&self) -> i32 {
        self.analog_capture_level
    }

    /// Measures the chunk and, in analog mode, derives the next analog
    /// level.
    pub(crate) fn analyze_capture_audio(&mut self, audio: &mut AudioBuffer) {
        if !self.enabled {
            return;
        }
        let num_channels = audio.num_channels().min(self.channels.len());
        let bands = audio.split_bands_const();
        let far_end_active = self.far_end_hold > 0;
        self.far_end_hold = self.far_end_hold.saturating_sub(1);
        let mut saturated = false;
        for (ch, state) in self.channels.iter_mut().enumerate().take(num_channels) {
            let low = bands.channel(LOW_BAND, ch);
            saturated |= low.iter().any(|&s| s == i16::MAX || s == i16::MIN);
            let level = frame_level_dbfs(low);
            if level > SPEECH_FLOOR_DBFS && !far_end_active {
                let alpha = if level > state.level_dbfs { 0.2 } else { 0.05 };
                state.level_dbfs += alpha * (level - state.level_dbfs);
            }
        }
        self.stream_is_saturated = saturated;

        if self.mode == Mode::AdaptiveAnalog {
            let span = (self.analog_level_maximum - self.analog_level_minimum) as f32;
            let target = -(self.target_level_dbfs as f32);
            let max_step = (span / 32.0).max(1.0);
            for state in self.channels.iter_mut().take(num_channels) {
                let error = target - state.level_dbfs;
                let mut step = (error / 60.0 * span).clamp(-max_step, max_step);
                if saturated {
                    step = step.min(-max_step);
                }
                state.capture_level = (self.analog_capture_level + step.round() as i32)
                    .clamp(self.analog_level_minimum, self.analog_level_maximum);
            }
        }
    }

    /// Applies digital gain to every band. In analog mode the level
    /// suggested by the preceding analysis becomes the stream analog level.
    pub(crate) fn process_capture_audio(
        &mut self,
        audio: &mut AudioBuffer,
        stream_has_echo: bool,
    ) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        if self.mode == Mode::AdaptiveAnalog && !self.was_analog_level_set {
            return Err(Error::StreamParameterNotSet);
        }

        let num_channels = audio.num_channels().min(self.channels.len());
        let num_bands = audio.num_bands();
        let target = -(self.target_level_dbfs as f32);
        let max_gain = self.compression_gain_db as f32;
        let bands = audio.split_bands();
        for (ch, state) in self.channels.iter_mut().enumerate().take(num_channels) {
            let wanted = match self.mode {
                Mode::FixedDigital => max_gain,
                Mode::AdaptiveDigital | Mode::AdaptiveAnalog => {
                    (target - state.level_dbfs).clamp(0.0, max_gain)
                }
            };
            if !(stream_has_echo && wanted > state.gain_db) {
                state.gain_db += 0.1 * (wanted - state.gain_db);
            }
            let gain = 10f32.powf(state.gain_db / 20.0);
            for band in 0..num_bands {
                for s in bands.channel_mut(band, ch) {
                    let mut v = f32::from(*s) * gain;
                    if self.limiter_enabled {
                        v = limit(v);
                    }
                    *s = v.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
                }
            }
        }

        if self.mode == Mode::AdaptiveAnalog && num_channels > 0 {
            let sum: i32 = self
                .channels
                .iter()
                .take(num_channels)
                .map(|c| c.capture_level)
                .sum();
            self.analog_capture_level = sum / num_channels as i32;
        }
        self.was_analog_level_set = false;
        Ok(())
    }
}

impl ProcessingComponent for GainControl {
    fn initialize(&mut self, format: &StageFormat) {
        self.format = *format;
        let level = self.analog_capture_level;
        self.channels = vec![
            ChannelGain {
                level_dbfs: -(self.target_level_dbfs as f32),
                gain_db: 0.0,
                capture_level: level,
            };
            format.num_proc_channels
        ];
        self.far_end_hold = 0;
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

/// Packs the mono S16 low band of a render chunk.
pub(crate) fn pack_render_audio(audio: &mut AudioBuffer, item: &mut Vec<i16>) {
    item.extend_from_slice(audio.mixed_low_pass_data());
}

/// Settings of the gain controller. Returned by
/// [`AudioProcessing::gain_control`].
///
/// With the experimental AGC configured, the analog level accessors talk to
/// it instead, and it owns mode, target and compression settings.
#[derive(Debug, Clone, Copy)]
pub struct GainControlHandle<'a> {
    apm: &'a AudioProcessing,
}

impl<'a> GainControlHandle<'a> {
    pub(crate) fn new(apm: &'a AudioProcessing) -> Self {
        Self { apm }
    }

    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        let (mut render, mut capture) = self.apm.lock_both();
        capture.gain_control.enable(enable)?;
        render.flags.gain_control = enable;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.apm.lock_capture().gain_control.is_enabled()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.apm.lock_capture().gain_control.set_mode(mode);
    }

    pub fn mode(&self) -> Mode {
        self.apm.lock_capture().gain_control.mode()
    }

    /// Target peak level below full scale, in [0, 31] dB.
    pub fn set_target_level_dbfs(&self, level: i32) -> Result<(), Error> {
        self.apm.lock_capture().gain_control.set_target_level_dbfs(level)
    }

    pub fn target_level_dbfs(&self) -> i32 {
        self.apm.lock_capture().gain_control.target_level_dbfs
    }

    /// Maximum digital gain, in [0, 90] dB.
    pub fn set_compression_gain_db(&self, gain: i32) -> Result<(), Error> {
        self.apm.lock_capture().gain_control.set_compression_gain_db(gain)
    }

    pub fn compression_gain_db(&self) -> i32 {
        self.apm.lock_capture().gain_control.compression_gain_db()
    }

    pub fn enable_limiter(&self, enable: bool) {
        self.apm.lock_capture().gain_control.enable_limiter(enable);
    }

    pub fn is_limiter_enabled(&self) -> bool {
        self.apm.lock_capture().gain_control.limiter_enabled
    }

    /// Range of the application's analog level, within [0, 65535].
    pub fn set_analog_level_limits(&self, minimum: i32, maximum: i32) -> Result<(), Error> {
        if minimum < 0 || maximum > MAX_ANALOG_LEVEL || maximum < minimum {
            return Err(Error::BadParameter);
        }
        let mut capture = self.apm.lock_capture();
        capture.gain_control.analog_level_minimum = minimum;
        capture.gain_control.analog_level_maximum = maximum;
        let format = capture.gain_control.format;
        capture.gain_control.initialize(&format);
        Ok(())
    }

    pub fn analog_level_minimum(&self) -> i32 {
        self.apm.lock_capture().gain_control.analog_level_minimum
    }

    pub fn analog_level_maximum(&self) -> i32 {
        self.apm.lock_capture().gain_control.analog_level_maximum
    }

    /// Current analog level, reported before each capture chunk.
    pub fn set_stream_analog_level(&self, level: i32) -> Result<(), Error> {
        let mut capture = self.apm.lock_capture();
        let capture = &mut *capture;
        match &mut capture.agc_manager {
            Some(manager) => {
                manager.set_volume(level);
                Ok(())
            }
            None => capture.gain_control.set_stream_analog_level(level),
        }
    }

    /// Analog level to apply before the next capture chunk.
    pub fn stream_analog_level(&self) -> i32 {
        let capture = self.apm.lock_capture();
        match &capture.agc_manager {
            Some(manager) => manager.volume(),
            None => capture.gain_control.stream_analog_level(),
        }
    }

    /// Whether the last chunk clipped even after gain control.
    pub fn stream_is_saturated(&self) -> bool {
        self.apm.lock_capture().gain_control.stream_is_saturated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_at(amplitude: i16) -> AudioBuffer {
        let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
        for (i, s) in audio.channels().bands_mut(0).iter_mut().enumerate() {
            *s = if i % 2 == 0 { amplitude } else { -amplitude };
        }
        audio
    }

    fn enabled(mode: Mode) -> GainControl {
        let mut gc = GainControl::new();
        gc.set_mode(mode);
        gc.enable(true).unwrap();
        gc
    }

    fn output_peak(audio: &mut AudioBuffer) -> i16 {
        audio
            .channels_const()
            .bands(0)
            .iter()
            .map(|s| s.saturating_abs())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn defaults() {
        let gc = GainControl::new();
        assert_eq!(gc.mode(), Mode::AdaptiveAnalog);
        assert_eq!(gc.target_level_dbfs, 3);
        assert_eq!(gc.compression_gain_db(), 9);
        assert!(gc.limiter_enabled);
        assert_eq!((gc.analog_level_minimum, gc.analog_level_maximum), (0, 255));
    }

    #[test]
    fn ranges_are_validated() {
        let mut gc = GainControl::new();
        assert_eq!(gc.set_target_level_dbfs(32), Err(Error::BadParameter));
        assert_eq!(gc.set_target_level_dbfs(-1), Err(Error::BadParameter));
        assert_eq!(gc.set_target_level_dbfs(31), Ok(()));
        assert_eq!(gc.set_compression_gain_db(91), Err(Error::BadParameter));
        assert_eq!(gc.set_compression_gain_db(90), Ok(()));
        assert_eq!(gc.set_stream_analog_level(256), Err(Error::BadParameter));
    }

    #[test]
    fn analog_mode_requires_level_every_chunk() {
        let mut gc = enabled(Mode::AdaptiveAnalog);
        let mut audio = buffer_at(1000);
        gc.analyze_capture_audio(&mut audio);
        assert_eq!(
            gc.process_capture_audio(&mut audio, false),
            Err(Error::StreamParameterNotSet)
        );
        gc.set_stream_analog_level(100).unwrap();
        gc.analyze_capture_audio(&mut audio);
        assert_eq!(gc.process_capture_audio(&mut audio, false), Ok(()));
        assert_eq!(
            gc.process_capture_audio(&mut audio, false),
            Err(Error::StreamParameterNotSet)
        );
    }

    #[test]
    fn quiet_input_raises_analog_level() {
        let mut gc = enabled(Mode::AdaptiveAnalog);
        let mut level = 100;
        for _ in 0..50 {
            gc.set_stream_analog_level(level).unwrap();
            let mut audio = buffer_at(100);
            gc.analyze_capture_audio(&mut audio);
            gc.process_capture_audio(&mut audio, false).unwrap();
            level = gc.stream_analog_level();
        }
        assert!(level > 100, "level {level}");
    }

    #[test]
    fn fixed_digital_applies_compression_gain() {
        let mut gc = enabled(Mode::FixedDigital);
        gc.enable_limiter(false);
        gc.set_compression_gain_db(6).unwrap();
        let mut peak = 0;
        for _ in 0..100 {
            let mut audio = buffer_at(1000);
            gc.analyze_capture_audio(&mut audio);
            gc.process_capture_audio(&mut audio, false).unwrap();
            peak = output_peak(&mut audio);
        }
        assert!((1950..=2010).contains(&peak), "peak {peak}");
    }

    #[test]
    fn limiter_keeps_output_below_full_scale() {
        let mut gc = enabled(Mode::FixedDigital);
        gc.set_compression_gain_db(20).unwrap();
        let mut peak = 0;
        for _ in 0..100 {
            let mut audio = buffer_at(20000);
            gc.analyze_capture_audio(&mut audio);
            gc.process_capture_audio(&mut audio, false).unwrap();
            peak = output_peak(&mut audio);
        }
        assert!(f32::from(peak) <= LIMITER_CEILING, "peak {peak}");
        assert!(f32::from(peak) > LIMITER_KNEE);
    }

    #[test]
    fn clipping_input_is_saturated() {
        let mut gc = enabled(Mode::AdaptiveDigital);
        let mut audio = buffer_at(i16::MAX);
        gc.analyze_capture_audio(&mut audio);
        assert!(gc.stream_is_saturated);
    }
}
