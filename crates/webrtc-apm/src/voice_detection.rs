//! Voice activity detection on the mono low band.
//!
//! A frame counts as voice when its energy stands out from a slowly tracked
//! noise floor and its zero-crossing rate is not noise-like. Decisions are
//! taken once per configured frame and carried to the capture
//! [`AudioFrame`](crate::AudioFrame) as its VAD activity.

use crate::audio_buffer::AudioBuffer;
use crate::audio_frame::VadActivity;
use crate::audio_processing::AudioProcessing;
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};

/// How readily voice is reported. Lower likelihoods reject more noise and
/// miss more speech.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Likelihood {
    VeryLow,
    #[default]
    Low,
    Moderate,
    High,
}

impl Likelihood {
    /// Required frame energy over the noise floor.
    fn energy_ratio(self) -> f32 {
        match self {
            Self::VeryLow => 8.0,
            Self::Low => 5.0,
            Self::Moderate => 3.5,
            Self::High => 2.0,
        }
    }
}

const MAX_ZERO_CROSSING_RATE: f32 = 0.35;
const HANGOVER_FRAMES: u32 = 3;
const MIN_NOISE_ENERGY: f32 = 100.0;

#[derive(Debug)]
pub(crate) struct VoiceDetection {
    enabled: bool,
    likelihood: Likelihood,
    frame_size_ms: usize,
    format: StageFormat,

    frame: Vec<i16>,
    frame_samples: usize,
    noise_energy: f32,
    hangover: u32,
    stream_has_voice: bool,
    external_decision: Option<bool>,
}

impl VoiceDetection {
    pub(crate) fn new() -> Self {
        let mut vad = Self {
            enabled: false,
            likelihood: Likelihood::default(),
            frame_size_ms: 10,
            format: StageFormat::default(),
            frame: Vec::new(),
            frame_samples: 0,
            noise_energy: MIN_NOISE_ENERGY,
            hangover: 0,
            stream_has_voice: false,
            external_decision: None,
        };
        vad.initialize(&StageFormat::default());
        vad
    }

    pub(crate) fn set_frame_size_ms(&mut self, size_ms: usize) -> Result<(), Error> {
        if !matches!(size_ms, 10 | 20 | 30) {
            return Err(Error::BadParameter);
        }
        self.frame_size_ms = size_ms;
        let format = self.format;
        self.initialize(&format);
        Ok(())
    }

    /// Overrides the decision for the next chunk only.
    pub(crate) fn set_stream_has_voice(&mut self, has_voice: bool) {
        self.external_decision = Some(has_voice);
    }

    pub(crate) fn stream_has_voice(&self) -> bool {
        self.stream_has_voice
    }

    fn classify(&mut self) -> bool {
        let n = self.frame.len().max(1) as f32;
        let energy = self.frame.iter().map(|&s| f32::from(s).powi(2)).sum::<f32>() / n;
        let crossings = self
            .frame
            .windows(2)
            .filter(|w| (w[0] >= 0) != (w[1] >= 0))
            .count();
        let zero_crossing_rate = crossings as f32 / n;

        let loud = energy > self.likelihood.energy_ratio() * self.noise_energy;
        let voiced = loud && zero_crossing_rate < MAX_ZERO_CROSSING_RATE;
        if voiced {
            self.hangover = HANGOVER_FRAMES;
        } else {
            // Follow the floor down quickly and up slowly.
            let rate = if energy < self.noise_energy { 0.2 } else { 0.02 };
            self.noise_energy =
                (self.noise_energy + rate * (energy - self.noise_energy)).max(MIN_NOISE_ENERGY);
            self.hangover = self.hangover.saturating_sub(1);
        }
        tracing::trace!(energy, zero_crossing_rate, voiced, "vad frame");
        voiced || self.hangover > 0
    }

    pub(crate) fn process_capture_audio(&mut self, audio: &mut AudioBuffer) {
        if !self.enabled {
            return;
        }
        if let Some(decision) = self.external_decision.take() {
            self.stream_has_voice = decision;
        } else {
            for &sample in audio.mixed_low_pass_data() {
                self.frame.push(sample);
                if self.frame.len() == self.frame_samples {
                    self.stream_has_voice = self.classify();
                    self.frame.clear();
                }
            }
        }
        audio.set_activity(if self.stream_has_voice {
            VadActivity::Active
        } else {
            VadActivity::Passive
        });
    }
}

impl ProcessingComponent for VoiceDetection {
    fn initialize(&mut self, format: &StageFormat) {
        self.format = *format;
        self.frame_samples = self.frame_size_ms * format.split_rate_hz / 1000;
        self.frame = Vec::with_capacity(self.frame_samples);
        self.noise_energy = MIN_NOISE_ENERGY;
        self.hangover = 0;
        self.stream_has_voice = false;
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

/// Settings and decision of the voice activity detector. Returned by
/// [`AudioProcessing::voice_detection`].
#[derive(Debug, Clone, Copy)]
pub struct VoiceDetectionHandle<'a> {
    apm: &'a AudioProcessing,
}

impl<'a> VoiceDetectionHandle<'a> {
    pub(crate) fn new(apm: &'a AudioProcessing) -> Self {
        Self { apm }
    }

    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        self.apm.lock_capture().voice_detection.enable(enable)
    }

    pub fn is_enabled(&self) -> bool {
        self.apm.lock_capture().voice_detection.is_enabled()
    }

    pub fn set_likelihood(&self, likelihood: Likelihood) {
        self.apm.lock_capture().voice_detection.likelihood = likelihood;
    }

    pub fn likelihood(&self) -> Likelihood {
        self.apm.lock_capture().voice_detection.likelihood
    }

    /// 10, 20 or 30 ms; anything else is [`Error::BadParameter`].
    pub fn set_frame_size_ms(&self, size_ms: usize) -> Result<(), Error> {
        self.apm.lock_capture().voice_detection.set_frame_size_ms(size_ms)
    }

    pub fn frame_size_ms(&self) -> usize {
        self.apm.lock_capture().voice_detection.frame_size_ms
    }

    /// Supplies an external decision for the next capture chunk.
    pub fn set_stream_has_voice(&self, has_voice: bool) {
        self.apm.lock_capture().voice_detection.set_stream_has_voice(has_voice);
    }

    pub fn stream_has_voice(&self) -> bool {
        self.apm.lock_capture().voice_detection.stream_has_voice()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn chunk(sample: impl Fn(usize) -> i16) -> AudioBuffer {
        let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
        for (i, s) in audio.channels().bands_mut(0).iter_mut().enumerate() {
            *s = sample(i);
        }
        audio
    }

    fn silence() -> AudioBuffer {
        chunk(|i| if i % 2 == 0 { 5 } else { -5 })
    }

    fn voice() -> AudioBuffer {
        chunk(|i| (6000.0 * (2.0 * PI * 300.0 * i as f32 / 16000.0).sin()) as i16)
    }

    fn enabled() -> VoiceDetection {
        let mut vad = VoiceDetection::new();
        vad.enable(true).unwrap();
        vad
    }

    #[test]
    fn frame_size_is_validated() {
        let mut vad = VoiceDetection::new();
        assert_eq!(vad.set_frame_size_ms(15), Err(Error::BadParameter));
        assert_eq!(vad.set_frame_size_ms(30), Ok(()));
        assert_eq!(vad.frame_samples, 480);
    }

    #[test]
    fn detects_voice_after_silence() {
        let mut vad = enabled();
        for _ in 0..20 {
            let mut audio = silence();
            vad.process_capture_audio(&mut audio);
            assert_eq!(audio.activity(), VadActivity::Passive);
        }
        let mut audio = voice();
        vad.process_capture_audio(&mut audio);
        assert!(vad.stream_has_voice());
        assert_eq!(audio.activity(), VadActivity::Active);
    }

    #[test]
    fn hangover_bridges_short_pauses() {
        let mut vad = enabled();
        vad.process_capture_audio(&mut voice());
        vad.process_capture_audio(&mut silence());
        assert!(vad.stream_has_voice());
        for _ in 0..HANGOVER_FRAMES {
            vad.process_capture_audio(&mut silence());
        }
        assert!(!vad.stream_has_voice());
    }

    #[test]
    fn external_decision_is_used_once() {
        let mut vad = enabled();
        vad.set_stream_has_voice(true);
        let mut audio = silence();
        vad.process_capture_audio(&mut audio);
        assert_eq!(audio.activity(), VadActivity::Active);
        vad.process_capture_audio(&mut audio);
        assert!(!vad.stream_has_voice());
    }

    #[test]
    fn longer_frames_decide_every_third_chunk() {
        let mut vad = enabled();
        vad.set_frame_size_ms(30).unwrap();
        vad.process_capture_audio(&mut voice());
        vad.process_capture_audio(&mut voice());
        assert!(!vad.stream_has_voice());
        vad.process_capture_audio(&mut voice());
        assert!(vad.stream_has_voice());
    }

    #[test]
    fn disabled_detector_leaves_activity_unknown() {
        let mut vad = VoiceDetection::new();
        let mut audio = voice();
        vad.process_capture_audio(&mut audio);
        assert_eq!(audio.activity(), VadActivity::Unknown);
    }
}
