//! Property-based test support for the audio processing and iSAC crates.
//!
//! Provides generators for audio frames, stream formats and packet streams,
//! plus comparison helpers for processed audio.
//!
//! # Usage
//!
//! ```ignore
//! use webrtc_apm_proptest::generators::*;
//! use test_strategy::proptest;
//!
//! #[proptest]
//! fn my_test(#[strategy(audio_frame_f32(16000))] frame: Vec<f32>) {
//!     assert_eq!(frame.len(), 160);
//! }
//! ```

pub mod comparison;
pub mod generators;

pub use proptest;
pub use test_strategy;
