//! DSP primitives shared by the audio processing pipeline.
//!
//! Contains deinterleaved channel storage (single and dual sample format),
//! sample conversions, a streaming resampler and biquad filtering.

pub mod audio_util;
pub mod cascaded_biquad_filter;
pub mod channel_buffer;
pub mod if_channel_buffer;
pub mod push_resampler;
