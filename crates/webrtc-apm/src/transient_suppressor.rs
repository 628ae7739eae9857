//! Keyboard click suppression on the full-band capture signal.
//!
//! Suppression arms while the user is typing, known either from the
//! key-pressed flag or from bursts on the keyboard microphone channel, and
//! disarms after four seconds without a key press. While armed, chunks whose
//! low-band energy jumps far above the running background are scaled back
//! towards it, less so when the chunk likely carries speech.

use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};

/// Energy over background that marks a transient.
const TRANSIENT_RATIO: f32 = 8.0;
/// Keyboard channel energy jump treated as a key press.
const KEYBOARD_RATIO: f32 = 4.0;
const CHUNKS_UNTIL_NOT_TYPING: u32 = 400;
const BACKGROUND_SMOOTHING: f32 = 0.95;
const MIN_GAIN: f32 = 0.1;
const EPSILON: f32 = 1.0;

#[derive(Debug)]
pub(crate) struct TransientSuppressor {
    enabled: bool,
    format: StageFormat,
    detection: Vec<f32>,
    background: f32,
    keyboard_background: f32,
    chunks_since_keypress: u32,
    gain: f32,
}

impl TransientSuppressor {
    pub(crate) fn new() -> Self {
        Self {
            enabled: false,
            format: StageFormat::default(),
            detection: Vec::new(),
            background: 0.0,
            keyboard_background: 0.0,
            chunks_since_keypress: CHUNKS_UNTIL_NOT_TYPING,
            gain: 1.0,
        }
    }

    fn mean_energy(data: &[f32]) -> f32 {
        data.iter().map(|x| x * x).sum::<f32>() / data.len().max(1) as f32
    }

    fn update_typing(&mut self, keyboard: Option<&[f32]>, key_pressed: bool) -> bool {
        let mut pressed = key_pressed;
        if let Some(keyboard) = keyboard {
            let energy = Self::mean_energy(keyboard);
            if energy > KEYBOARD_RATIO * (self.keyboard_background + EPSILON) {
                pressed = true;
            } else {
                self.keyboard_background = BACKGROUND_SMOOTHING * self.keyboard_background
                    + (1.0 - BACKGROUND_SMOOTHING) * energy;
            }
        }
        if pressed {
            self.chunks_since_keypress = 0;
        } else {
            self.chunks_since_keypress = self.chunks_since_keypress.saturating_add(1);
        }
        self.chunks_since_keypress < CHUNKS_UNTIL_NOT_TYPING
    }

    /// Runs after band merging, detecting on the low band of the first
    /// channel and attenuating every full-band channel.
    pub(crate) fn process(&mut self, audio: &mut AudioBuffer, voice_probability: f32, key_pressed: bool) {
        if !self.enabled {
            return;
        }
        self.detection.clear();
        self.detection
            .extend_from_slice(audio.split_bands_const_f().channel(LOW_BAND, 0));
        let typing = self.update_typing(audio.keyboard_data(), key_pressed);

        let energy = Self::mean_energy(&self.detection);
        let transient = energy > TRANSIENT_RATIO * (self.background + EPSILON);
        let target = if typing && transient {
            let attenuation = (self.background / energy).sqrt().max(MIN_GAIN);
            let voice = voice_probability.clamp(0.0, 1.0);
            1.0 - (1.0 - attenuation) * (1.0 - voice)
        } else {
            1.0
        };
        // Transients feed the background only up to the detection threshold,
        // so a loud start still lets it climb within a few dozen chunks.
        let tracked = energy.min(TRANSIENT_RATIO * (self.background + EPSILON));
        self.background =
            BACKGROUND_SMOOTHING * self.background + (1.0 - BACKGROUND_SMOOTHING) * tracked;
        if typing && transient {
            tracing::trace!(energy, background = self.background, target, "keyboard transient");
        }

        let start = self.gain;
        if start == 1.0 && target == 1.0 {
            return;
        }
        let num_channels = audio.num_channels();
        let channels = audio.channels_f();
        for ch in 0..num_channels {
            let data = channels.bands_mut(ch);
            let n = data.len() as f32;
            for (i, s) in data.iter_mut().enumerate() {
                let t = (i + 1) as f32 / n;
                *s *= start + (target - start) * t;
            }
        }
        self.gain = target;
    }
}

impl ProcessingComponent for TransientSuppressor {
    fn initialize(&mut self, format: &StageFormat) {
        self.format = *format;
        self.detection = Vec::with_capacity(format.num_frames_per_band());
        self.background = 0.0;
        self.keyboard_background = 0.0;
        self.chunks_since_keypress = CHUNKS_UNTIL_NOT_TYPING;
        self.gain = 1.0;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(amplitude: f32) -> AudioBuffer {
        let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
        for (i, s) in audio.channels_f().bands_mut(0).iter_mut().enumerate() {
            *s = if i % 2 == 0 { amplitude } else { -amplitude };
        }
        audio
    }

    fn peak(audio: &mut AudioBuffer) -> f32 {
        audio
            .channels_const_f()
            .bands(0)
            .iter()
            .fold(0.0, |m: f32, x| m.max(x.abs()))
    }

    fn settled() -> TransientSuppressor {
        let mut ts = TransientSuppressor::new();
        ts.enable(true).unwrap();
        for _ in 0..100 {
            ts.process(&mut chunk(100.0), 0.0, false);
        }
        ts
    }

    #[test]
    fn steady_signal_is_untouched() {
        let mut ts = settled();
        let mut audio = chunk(100.0);
        ts.process(&mut audio, 0.0, true);
        assert_eq!(peak(&mut audio), 100.0);
    }

    #[test]
    fn loud_start_does_not_freeze_the_background() {
        let mut ts = settled();
        assert!(ts.background > 9000.0, "background {}", ts.background);
        let mut audio = chunk(100.0);
        ts.process(&mut audio, 0.0, true);
        assert_eq!(ts.gain, 1.0);
    }

    #[test]
    fn click_while_typing_is_attenuated() {
        let mut ts = settled();
        let mut audio = chunk(5000.0);
        ts.process(&mut audio, 0.0, true);
        // The gain ramps within the chunk; the tail reaches the target.
        let tail = audio.channels_const_f().bands(0)[159].abs();
        assert!(tail < 501.0, "tail {tail}");
    }

    #[test]
    fn click_without_typing_is_kept() {
        let mut ts = settled();
        let mut audio = chunk(5000.0);
        ts.process(&mut audio, 0.0, false);
        assert_eq!(peak(&mut audio), 5000.0);
    }

    #[test]
    fn speech_is_spared() {
        let mut ts = settled();
        let mut audio = chunk(5000.0);
        ts.process(&mut audio, 1.0, true);
        assert_eq!(peak(&mut audio), 5000.0);
    }

    #[test]
    fn typing_state_times_out() {
        let mut ts = settled();
        ts.process(&mut chunk(100.0), 0.0, true);
        for _ in 0..CHUNKS_UNTIL_NOT_TYPING {
            ts.process(&mut chunk(100.0), 0.0, false);
        }
        let mut audio = chunk(5000.0);
        ts.process(&mut audio, 0.0, false);
        assert_eq!(peak(&mut audio), 5000.0);
    }

    #[test]
    fn disabled_suppressor_is_transparent() {
        let mut ts = TransientSuppressor::new();
        let mut audio = chunk(5000.0);
        ts.process(&mut audio, 0.0, true);
        assert_eq!(peak(&mut audio), 5000.0);
    }
}
