//! Generators for audio frames, stream formats and packet streams.
//!
//! Provides both strategy functions (for use with `#[strategy(...)]`) and
//! `Arbitrary`-deriving structs for common test inputs.

use proptest::prelude::*;
use test_strategy::Arbitrary;

/// A native processing rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum SampleRate {
    Hz8000,
    Hz16000,
    Hz32000,
    Hz48000,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            Self::Hz8000 => 8000,
            Self::Hz16000 => 16000,
            Self::Hz32000 => 32000,
            Self::Hz48000 => 48000,
        }
    }

    /// Number of samples in a 10ms frame at this rate.
    pub fn frame_size(self) -> usize {
        (self.hz() / 100) as usize
    }
}

/// Any rate a stream may use, native or not.
pub fn any_sample_rate() -> impl Strategy<Value = u32> {
    prop_oneof![
        3 => any::<SampleRate>().prop_map(SampleRate::hz),
        1 => prop::sample::select(vec![11025u32, 22050, 24000, 44100, 96000]),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum ChannelCount {
    #[weight(2)]
    Mono,
    #[weight(2)]
    Stereo,
    #[weight(1)]
    Quad,
}

impl ChannelCount {
    pub fn count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Quad => 4,
        }
    }
}

/// Rate, channel count and keyboard flag of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct StreamFormat {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    pub has_keyboard: bool,
}

impl StreamFormat {
    pub fn frame_size(self) -> usize {
        self.sample_rate.frame_size()
    }
}

/// The four stream formats of one processing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct ProcessingFormats {
    pub input: StreamFormat,
    pub output: StreamFormat,
    pub reverse_input: StreamFormat,
    pub reverse_output: StreamFormat,
}

/// A mono f32 audio frame with its sample rate.
#[derive(Debug, Clone, Arbitrary)]
pub struct MonoFrameF32 {
    pub sample_rate: SampleRate,
    #[strategy(audio_frame_f32(#sample_rate.hz()))]
    pub samples: Vec<f32>,
}

/// A mono i16 audio frame with its sample rate.
#[derive(Debug, Clone, Arbitrary)]
pub struct MonoFrameI16 {
    pub sample_rate: SampleRate,
    #[strategy(audio_frame_i16(#sample_rate.hz()))]
    pub samples: Vec<i16>,
}

/// A deinterleaved multi-channel f32 frame.
#[derive(Debug, Clone, Arbitrary)]
pub struct MultiChannelFrameF32 {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    #[strategy(channels_f32(#sample_rate.hz(), #channels.count()))]
    pub samples: Vec<Vec<f32>>,
}

/// Generate a mono audio frame at a given sample rate (10ms frame).
pub fn audio_frame_f32(sample_rate: u32) -> impl Strategy<Value = Vec<f32>> {
    let frame_size = (sample_rate / 100) as usize;
    proptest::collection::vec(-1.0f32..=1.0f32, frame_size..=frame_size)
}

/// Generate a mono i16 audio frame at a given sample rate (10ms frame).
pub fn audio_frame_i16(sample_rate: u32) -> impl Strategy<Value = Vec<i16>> {
    let frame_size = (sample_rate / 100) as usize;
    proptest::collection::vec(i16::MIN..=i16::MAX, frame_size..=frame_size)
}

/// Generate one 10ms frame per channel.
pub fn channels_f32(sample_rate: u32, channels: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    proptest::collection::vec(audio_frame_f32(sample_rate), channels..=channels)
}

/// One received packet, timestamps in 16 kHz samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub rtp_number: u16,
    pub frame_length_ms: i32,
    pub send_ts: u32,
    pub arr_ts: u32,
    pub size: usize,
}

/// Packets of one call in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketStream {
    pub frame_length_ms: i32,
    pub packets: Vec<Packet>,
}

impl PacketStream {
    /// `count` packets of `size` bytes sent back to back, each arriving
    /// `transit` samples after it was sent.
    pub fn steady(frame_length_ms: i32, size: usize, count: u16, transit: u32) -> Self {
        let step = 16 * frame_length_ms as u32;
        let packets = (0..count)
            .map(|seq| {
                let send_ts = u32::from(seq) * step;
                Packet {
                    rtp_number: seq,
                    frame_length_ms,
                    send_ts,
                    arr_ts: send_ts + transit,
                    size,
                }
            })
            .collect();
        Self {
            frame_length_ms,
            packets,
        }
    }

    /// Implied payload rate in bits/s when every packet arrives.
    pub fn payload_rate(&self) -> f32 {
        let Some(first) = self.packets.first() else {
            return 0.0;
        };
        first.size as f32 * 8000.0 / self.frame_length_ms as f32
    }
}

/// A stream of 30 or 60 ms packets with random sizes, lost packets, arrival
/// jitter and arbitrary starting timestamps (so wraps do occur).
pub fn packet_stream() -> impl Strategy<Value = PacketStream> {
    (
        prop_oneof![Just(30i32), Just(60i32)],
        any::<u16>(),
        any::<u32>(),
        1usize..300,
    )
        .prop_flat_map(|(frame_length_ms, first_rtp, first_ts, len)| {
            // Sequence step (2 or 3 means losses), jitter and payload size.
            let hops = proptest::collection::vec((1u16..=3, 0u32..1600, 20usize..600), len);
            (Just(frame_length_ms), Just(first_rtp), Just(first_ts), hops)
        })
        .prop_map(|(frame_length_ms, first_rtp, first_ts, hops)| {
            let step = 16 * frame_length_ms as u32;
            let mut rtp_number = first_rtp;
            let mut send_ts = first_ts;
            let packets = hops
                .into_iter()
                .map(|(seq_step, jitter, size)| {
                    rtp_number = rtp_number.wrapping_add(seq_step);
                    send_ts = send_ts.wrapping_add(u32::from(seq_step) * step);
                    Packet {
                        rtp_number,
                        frame_length_ms,
                        send_ts,
                        arr_ts: send_ts.wrapping_add(800 + jitter),
                        size,
                    }
                })
                .collect();
            PacketStream {
                frame_length_ms,
                packets,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[proptest]
    fn frame_f32_correct_length(#[strategy(audio_frame_f32(16000))] frame: Vec<f32>) {
        assert_eq!(frame.len(), 160);
        for &s in &frame {
            assert!((-1.0..=1.0).contains(&s));
        }
    }

    #[proptest]
    fn frame_i16_correct_length(#[strategy(audio_frame_i16(8000))] frame: Vec<i16>) {
        assert_eq!(frame.len(), 80);
    }

    #[proptest]
    fn mono_frame_struct_consistent(frame: MonoFrameF32) {
        assert_eq!(frame.samples.len(), frame.sample_rate.frame_size());
    }

    #[proptest]
    fn mono_frame_i16_struct_consistent(frame: MonoFrameI16) {
        assert_eq!(frame.samples.len(), frame.sample_rate.frame_size());
    }

    #[proptest]
    fn multichannel_frame_struct_consistent(frame: MultiChannelFrameF32) {
        assert_eq!(frame.samples.len(), frame.channels.count());
        for channel in &frame.samples {
            assert_eq!(channel.len(), frame.sample_rate.frame_size());
        }
    }

    #[proptest]
    fn any_rate_is_positive(#[strategy(any_sample_rate())] rate: u32) {
        assert!(rate >= 8000);
    }

    #[proptest]
    fn packets_advance_with_their_sequence(#[strategy(packet_stream())] stream: PacketStream) {
        assert!(!stream.packets.is_empty());
        let step = 16 * stream.frame_length_ms as u32;
        for pair in stream.packets.windows(2) {
            let seq_step = pair[1].rtp_number.wrapping_sub(pair[0].rtp_number);
            assert!((1..=3).contains(&seq_step));
            assert_eq!(
                pair[1].send_ts.wrapping_sub(pair[0].send_ts),
                u32::from(seq_step) * step
            );
        }
    }

    #[test]
    fn steady_stream_has_a_fixed_rate() {
        let stream = PacketStream::steady(30, 150, 10, 1000);
        assert_eq!(stream.packets.len(), 10);
        assert_eq!(stream.packets[9].send_ts, 9 * 480);
        assert_eq!(stream.packets[9].arr_ts, 9 * 480 + 1000);
        assert_eq!(stream.payload_rate(), 40000.0);
    }
}
