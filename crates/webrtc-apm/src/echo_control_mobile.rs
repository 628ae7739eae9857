//! Low-complexity echo suppressor for handsets.
//!
//! Works on magnitude spectra only: a 65-point echo path maps the delayed
//! far-end spectrum onto an echo estimate, and each near-end bin is
//! attenuated by how much of it that estimate explains. The echo path is
//! exposed in Q14 so an application can persist it between calls.

use std::f32::consts::TAU;

use rustfft::num_complex::Complex;

use crate::adaptive_filter::FarEndBuffer;
use crate::audio_buffer::{AudioBuffer, LOW_BAND};
use crate::audio_processing::AudioProcessing;
use crate::error::Error;
use crate::processing_component::{ProcessingComponent, StageFormat};
use crate::render_queue::{RenderQueueReader, RenderQueueWriter, render_queue};
use crate::spectrum::Stft;

/// Acoustic setup the suppressor is tuned for. Louder setups suppress
/// harder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RoutingMode {
    QuietEarpieceOrHeadset,
    Earpiece,
    LoudEarpiece,
    #[default]
    Speakerphone,
    LoudSpeakerphone,
}

impl RoutingMode {
    fn overdrive(self) -> f32 {
        match self {
            Self::QuietEarpieceOrHeadset => 1.0,
            Self::Earpiece => 1.5,
            Self::LoudEarpiece => 2.0,
            Self::Speakerphone => 3.0,
            Self::LoudSpeakerphone => 4.0,
        }
    }
}

/// Bins of the echo path.
pub const ECHO_PATH_BINS: usize = 65;
/// Size in bytes of a serialized echo path: one little-endian Q14 `i16`
/// per bin.
pub const ECHO_PATH_SIZE_BYTES: usize = ECHO_PATH_BINS * 2;

const Q14: f32 = 16384.0;
const MAX_PATH_GAIN: f32 = i16::MAX as f32 / Q14;
const MAX_DELAY_MS: usize = 500;
const FAR_END_ACTIVITY_POWER: f32 = 100.0 * 100.0;
const STEP_SIZE: f32 = 0.1;
const MIN_GAIN: f32 = 0.05;

fn decode_echo_path(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / Q14)
        .collect()
}

fn encode_echo_path(path: &[f32], bytes: &mut [u8]) {
    for (dst, &gain) in bytes.chunks_exact_mut(2).zip(path) {
        let q14 = (gain * Q14).round().clamp(0.0, f32::from(i16::MAX)) as i16;
        dst.copy_from_slice(&q14.to_le_bytes());
    }
}

#[derive(Debug)]
struct ChannelSuppressor {
    echo_path: Vec<f32>,
    noisy: Stft,
    clean: Stft,
    noise_floor: Vec<f32>,
}

#[derive(Debug)]
pub(crate) struct EchoControlMobile {
    enabled: bool,
    routing_mode: RoutingMode,
    comfort_noise: bool,
    external_echo_path: Option<Vec<f32>>,

    format: StageFormat,
    far_end: FarEndBuffer,
    far: Stft,
    far_magnitude: Vec<f32>,
    far_block: Vec<f32>,
    near_magnitude: Vec<f32>,
    block: Vec<f32>,
    channels: Vec<ChannelSuppressor>,
    render_reader: Option<RenderQueueReader<i16>>,
    noise_seed: u32,
}

impl EchoControlMobile {
    pub(crate) fn new() -> Self {
        let mut aecm = Self {
            enabled: false,
            routing_mode: RoutingMode::default(),
            comfort_noise: true,
            external_echo_path: None,
            format: StageFormat::default(),
            far_end: FarEndBuffer::new(1),
            far: Stft::new(1),
            far_magnitude: Vec::new(),
            far_block: Vec::new(),
            near_magnitude: Vec::new(),
            block: Vec::new(),
            channels: Vec::new(),
            render_reader: None,
            noise_seed: 1,
        };
        aecm.initialize(&StageFormat::default());
        aecm
    }

    pub(crate) fn connect_render_queue(&mut self, element_size: usize) -> RenderQueueWriter<i16> {
        let (writer, reader) = render_queue(element_size);
        self.render_reader = Some(reader);
        writer
    }

    pub(crate) fn read_queued_render_data(&mut self) {
        let enabled = self.enabled;
        let num_reverse = self.format.num_reverse_channels.max(1);
        let Some(reader) = &mut self.render_reader else {
            return;
        };
        let far_end = &mut self.far_end;
        let block = &mut self.far_block;
        reader.drain(|item| {
            if !enabled {
                return;
            }
            let frames = item.len() / num_reverse;
            block.clear();
            block.extend((0..frames).map(|i| {
                (0..num_reverse)
                    .map(|ch| f32::from(item[ch * frames + i]))
                    .sum::<f32>()
                    / num_reverse as f32
            }));
            far_end.push(block);
        });
    }

    /// Suppresses echo on the S16 low band. When noise suppression ran
    /// first, the pre-suppression snapshot drives the echo estimate.
    pub(crate) fn process_capture_audio(
        &mut self,
        audio: &mut AudioBuffer,
        stream_delay_ms: i32,
    ) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        let hop = audio.num_frames_per_band();
        if hop != self.far.hop() {
            return Err(Error::BadDataLength);
        }
        let per_ms = self.format.split_rate_hz / 1000;
        let lag = (stream_delay_ms.max(0) as usize * per_ms).min(self.far_end.capacity() - hop);

        self.far_block.resize(hop, 0.0);
        self.far_end.window(lag, &mut self.far_block);
        let far_active =
            self.far_block.iter().map(|x| x * x).sum::<f32>() / hop as f32 > FAR_END_ACTIVITY_POWER;
        let far_spectrum = self.far.analyze(&self.far_block);
        self.far_magnitude.clear();
        self.far_magnitude.extend(far_spectrum.iter().map(|c| c.norm()));

        let num_bins = self.far_magnitude.len();
        let overdrive = self.routing_mode.overdrive();
        let comfort_noise = self.comfort_noise;
        let num_channels = audio.num_channels().min(self.channels.len());
        for ch in 0..num_channels {
            let suppressor = &mut self.channels[ch];
            self.block.clear();
            match audio.low_pass_reference(ch) {
                Some(reference) => self.block.extend(reference.iter().map(|&s| f32::from(s))),
                None => self
                    .block
                    .extend(audio.split_bands_const().channel(LOW_BAND, ch).iter().map(|&s| f32::from(s))),
            }
            let noisy = suppressor.noisy.analyze(&self.block);
            self.near_magnitude.clear();
            self.near_magnitude.extend(noisy.iter().map(|c| c.norm()));

            let far_energy =
                self.far_magnitude.iter().map(|x| x * x).sum::<f32>() / num_bins as f32;
            let regularization = 0.1 * far_energy + 1.0;
            let path = &mut suppressor.echo_path;
            let mut gains = vec![1.0f32; num_bins];
            for k in 0..num_bins {
                let j = k * (ECHO_PATH_BINS - 1) / (num_bins - 1);
                let x = self.far_magnitude[k];
                let y = self.near_magnitude[k];
                let estimate = path[j] * x;
                if far_active {
                    path[j] = (path[j] + STEP_SIZE * x * (y - estimate) / (x * x + regularization))
                        .clamp(0.0, MAX_PATH_GAIN);
                }
                gains[k] = (1.0 - overdrive * estimate / (y + 1.0)).clamp(MIN_GAIN, 1.0);
                let floor = &mut suppressor.noise_floor[k];
                *floor = if y < *floor { y } else { *floor * 1.002 + 0.1 };
            }

            self.block.clear();
            self.block
                .extend(audio.split_bands_const().channel(LOW_BAND, ch).iter().map(|&s| f32::from(s)));
            let floor = &suppressor.noise_floor;
            let seed = &mut self.noise_seed;
            suppressor.clean.process(&mut self.block, |bins: &mut [Complex<f32>]| {
                for (k, bin) in bins.iter_mut().enumerate() {
                    *bin *= gains[k];
                    if comfort_noise && gains[k] < 1.0 {
                        *seed = seed.wrapping_mul(69_069).wrapping_add(1);
                        let phase = *seed as f32 / u32::MAX as f32 * TAU;
                        *bin += Complex::from_polar(floor[k] * (1.0 - gains[k]), phase);
                    }
                }
            });
            let low = audio.split_bands().channel_mut(LOW_BAND, ch);
            for (dst, &src) in low.iter_mut().zip(&self.block) {
                *dst = src.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
            }
        }
        self.far_end.consume(hop);
        Ok(())
    }

    fn set_echo_path(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() != ECHO_PATH_SIZE_BYTES {
            tracing::error!(len = bytes.len(), "echo path has the wrong size");
            return Err(Error::BadParameter);
        }
        let path = decode_echo_path(bytes);
        for channel in &mut self.channels {
            channel.echo_path.copy_from_slice(&path);
        }
        self.external_echo_path = Some(path);
        Ok(())
    }

    fn echo_path(&self, bytes: &mut [u8]) -> Result<(), Error> {
        if !self.enabled {
            return Err(Error::NotEnabled);
        }
        if bytes.len() != ECHO_PATH_SIZE_BYTES {
            tracing::error!(len = bytes.len(), "echo path buffer has the wrong size");
            return Err(Error::BadParameter);
        }
        let path = self
            .channels
            .first()
            .map_or(&[0.0; ECHO_PATH_BINS][..], |c| &c.echo_path[..]);
        encode_echo_path(path, bytes);
        Ok(())
    }
}

impl ProcessingComponent for EchoControlMobile {
    fn initialize(&mut self, format: &StageFormat) {
        self.format = *format;
        let hop = format.num_frames_per_band();
        let per_ms = format.split_rate_hz / 1000;
        self.far_end = FarEndBuffer::new(MAX_DELAY_MS * per_ms + 2 * hop);
        self.far = Stft::new(hop);
        let initial_path = self
            .external_echo_path
            .clone()
            .unwrap_or_else(|| vec![0.0; ECHO_PATH_BINS]);
        self.channels = (0..format.num_proc_channels)
            .map(|_| ChannelSuppressor {
                echo_path: initial_path.clone(),
                noisy: Stft::new(hop),
                clean: Stft::new(hop),
                noise_floor: vec![0.0; hop + 1],
            })
            .collect();
        self.far_block = Vec::with_capacity(hop);
        self.block = Vec::with_capacity(hop);
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

/// Packs the S16 render low band of every channel, channel after channel.
pub(crate) fn pack_render_audio(audio: &mut AudioBuffer, item: &mut Vec<i16>) {
    let num_channels = audio.num_channels();
    let bands = audio.split_bands_const();
    for ch in 0..num_channels {
        item.extend_from_slice(bands.channel(LOW_BAND, ch));
    }
}

/// Settings of the mobile echo suppressor. Returned by
/// [`AudioProcessing::echo_control_mobile`].
#[derive(Debug, Clone, Copy)]
pub struct EchoControlMobileHandle<'a> {
    apm: &'a AudioProcessing,
}

impl<'a> EchoControlMobileHandle<'a> {
    pub(crate) fn new(apm: &'a AudioProcessing) -> Self {
        Self { apm }
    }

    /// Fails with [`Error::BadParameter`] while echo cancellation is on.
    pub fn enable(&self, enable: bool) -> Result<(), Error> {
        let (mut render, mut capture) = self.apm.lock_both();
        if enable && capture.echo_cancellation.is_enabled() {
            tracing::error!("echo control mobile and echo cancellation are mutually exclusive");
            return Err(Error::BadParameter);
        }
        capture.echo_control_mobile.enable(enable)?;
        render.flags.echo_control_mobile = enable;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.apm.lock_capture().echo_control_mobile.is_enabled()
    }

    pub fn set_routing_mode(&self, mode: RoutingMode) {
        self.apm.lock_capture().echo_control_mobile.routing_mode = mode;
    }

    pub fn routing_mode(&self) -> RoutingMode {
        self.apm.lock_capture().echo_control_mobile.routing_mode
    }

    /// Fill suppressed bins with noise at the background level.
    pub fn enable_comfort_noise(&self, enable: bool) {
        self.apm.lock_capture().echo_control_mobile.comfort_noise = enable;
    }

    pub fn is_comfort_noise_enabled(&self) -> bool {
        self.apm.lock_capture().echo_control_mobile.comfort_noise
    }

    /// Seeds the echo path, e.g. with one saved from a previous call. Kept
    /// across reinitialization.
    pub fn set_echo_path(&self, echo_path: &[u8]) -> Result<(), Error> {
        self.apm.lock_capture().echo_control_mobile.set_echo_path(echo_path)
    }

    /// Writes the current echo path into `echo_path`, which must hold
    /// [`ECHO_PATH_SIZE_BYTES`] bytes.
    pub fn echo_path(&self, echo_path: &mut [u8]) -> Result<(), Error> {
        self.apm.lock_capture().echo_control_mobile.echo_path(echo_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_aecm() -> EchoControlMobile {
        let mut aecm = EchoControlMobile::new();
        aecm.enable(true).unwrap();
        aecm
    }

    #[test]
    fn defaults() {
        let aecm = EchoControlMobile::new();
        assert!(!aecm.is_enabled());
        assert_eq!(aecm.routing_mode, RoutingMode::Speakerphone);
        assert!(aecm.comfort_noise);
    }

    #[test]
    fn echo_path_requires_exact_size() {
        let mut aecm = enabled_aecm();
        assert_eq!(aecm.set_echo_path(&[0; 10]), Err(Error::BadParameter));
        let mut out = [0u8; 10];
        assert_eq!(aecm.echo_path(&mut out), Err(Error::BadParameter));
    }

    #[test]
    fn echo_path_read_requires_enabled() {
        let aecm = EchoControlMobile::new();
        let mut out = [0u8; ECHO_PATH_SIZE_BYTES];
        assert_eq!(aecm.echo_path(&mut out), Err(Error::NotEnabled));
    }

    #[test]
    fn echo_path_survives_reinitialization() {
        let mut aecm = enabled_aecm();
        let mut path = [0u8; ECHO_PATH_SIZE_BYTES];
        for (i, b) in path.chunks_exact_mut(2).enumerate() {
            b.copy_from_slice(&(i as i16 * 100).to_le_bytes());
        }
        aecm.set_echo_path(&path).unwrap();
        aecm.initialize(&StageFormat {
            sample_rate_hz: 8000,
            split_rate_hz: 8000,
            ..StageFormat::default()
        });
        let mut out = [0u8; ECHO_PATH_SIZE_BYTES];
        aecm.echo_path(&mut out).unwrap();
        assert_eq!(out, path);
    }

    #[test]
    fn suppresses_delayed_echo() {
        let mut aecm = enabled_aecm();
        aecm.comfort_noise = false;
        let mut writer = aecm.connect_render_queue(160);
        let mut seed = 11u32;
        let mut history = vec![0i16; 320];
        let (mut input, mut output) = (0.0, 0.0);
        for _ in 0..300 {
            let far: Vec<i16> = (0..160)
                .map(|_| {
                    seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    ((seed >> 16) as i16) / 4
                })
                .collect();
            assert!(writer.write(|item| item.extend_from_slice(&far)));
            history.extend_from_slice(&far);
            let echo: Vec<i16> = history[..160].iter().map(|&x| x / 2).collect();
            history.drain(..160);

            let mut audio = AudioBuffer::new(160, 1, 160, 1, 160);
            audio.channels().bands_mut(0).copy_from_slice(&echo);
            aecm.read_queued_render_data();
            aecm.process_capture_audio(&mut audio, 20).unwrap();
            input = echo.iter().map(|&x| f32::from(x).powi(2)).sum::<f32>();
            output = audio
                .channels_const()
                .bands(0)
                .iter()
                .map(|&x| f32::from(x).powi(2))
                .sum::<f32>();
        }
        assert!(output < 0.1 * input, "input {input} output {output}");
        let mut path = [0u8; ECHO_PATH_SIZE_BYTES];
        aecm.echo_path(&mut path).unwrap();
        assert!(decode_echo_path(&path).iter().any(|&g| g > 0.2));
    }
}
