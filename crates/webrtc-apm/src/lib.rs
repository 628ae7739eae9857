//! WebRTC Audio Processing Module.
//!
//! Echo cancellation, noise suppression, gain control, voice activity
//! detection and related stages for real-time voice, applied in 10 ms chunks.
//! The capture (microphone) and render (loudspeaker) streams are processed
//! from separate threads; render data reaches the capture-side stages
//! through bounded [`SwapQueue`]s.
//!
//! Start with [`AudioProcessingBuilder`].

mod adaptive_filter;
mod agc_manager;
mod audio_buffer;
mod audio_converter;
mod audio_frame;
mod audio_processing;
mod audio_processing_impl;
mod beamformer;
mod config;
mod echo_cancellation;
mod echo_control_mobile;
mod error;
mod gain_control;
mod high_pass_filter;
mod intelligibility_enhancer;
mod level_estimator;
mod noise_suppression;
mod processing_component;
mod render_queue;
mod spectrum;
mod splitting_filter;
mod stats;
mod stream_config;
mod submodule_states;
pub mod swap_queue;
mod three_band_filter_bank;
mod transient_suppressor;
mod voice_detection;

pub use audio_frame::{AudioFrame, VadActivity};
pub use audio_processing::{AudioProcessing, AudioProcessingBuilder};
pub use beamformer::{Beamformer, DelayAndSumBeamformer};
pub use config::{
    Beamforming, Config, EchoCanceller, ExperimentalAgc, Intelligibility, Point, SphericalPoint,
    TransientSuppression,
};
pub use echo_cancellation::{EchoCancellationHandle, SuppressionLevel};
pub use echo_control_mobile::{EchoControlMobileHandle, RoutingMode, ECHO_PATH_SIZE_BYTES};
pub use error::Error;
pub use gain_control::{GainControlHandle, Mode as GainControlMode};
pub use high_pass_filter::HighPassFilterHandle;
pub use level_estimator::LevelEstimatorHandle;
pub use noise_suppression::{Level as NoiseSuppressionLevel, NoiseSuppressionHandle};
pub use stats::{AudioProcessingStats, DelayMetrics, EchoMetrics, Statistic};
pub use stream_config::{ChannelLayout, ProcessingConfig, StreamConfig, StreamName};
pub use swap_queue::SwapQueue;
pub use voice_detection::{Likelihood, VoiceDetectionHandle};
