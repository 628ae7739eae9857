//! Bandwidth feedback carried in incoming packets.
//!
//! The estimator only needs two things from a received payload: the frame
//! length and the bandwidth index the far end estimated for us. A full
//! decoder reads them from the entropy-coded bitstream; [`PacketHeader`]
//! reads them from a plain two-byte prefix.

use crate::bandwidth_estimator::BwEstimator;
use crate::error::IsacError;

/// Payloads shorter than this carry no usable feedback.
pub const MIN_FEEDBACK_PACKET_BYTES: usize = 10;

/// Frame lengths in samples at 16 kHz, by frame length code.
const FRAME_SAMPLES: [usize; 2] = [480, 960];

pub trait BandwidthFeedback {
    /// Samples per frame at 16 kHz.
    fn frame_samples(&self) -> Result<usize, IsacError>;

    /// The far end's bandwidth index, `0..=23`.
    fn bandwidth_index(&self) -> Result<i16, IsacError>;
}

/// Feedback read from the first two payload bytes: a frame length code
/// (`0` for 30 ms, `1` for 60 ms) followed by the bandwidth index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    frame_length_code: u8,
    bandwidth_code: u8,
}

impl PacketHeader {
    pub fn parse(payload: &[u8]) -> Result<Self, IsacError> {
        if payload.len() < MIN_FEEDBACK_PACKET_BYTES {
            return Err(IsacError::EmptyPacket);
        }
        Ok(Self {
            frame_length_code: payload[0],
            bandwidth_code: payload[1],
        })
    }

    /// Writes the header into the start of `payload`.
    pub fn write(frame_samples: usize, bandwidth_index: i16, payload: &mut [u8]) -> Result<(), IsacError> {
        let code = FRAME_SAMPLES
            .iter()
            .position(|&n| n == frame_samples)
            .ok_or(IsacError::DisallowedFrameLength)?;
        if !(0..=23).contains(&bandwidth_index) {
            return Err(IsacError::RangeErrorBwEstimator);
        }
        if payload.len() < MIN_FEEDBACK_PACKET_BYTES {
            return Err(IsacError::EmptyPacket);
        }
        payload[0] = code as u8;
        payload[1] = bandwidth_index as u8;
        Ok(())
    }
}

impl BandwidthFeedback for PacketHeader {
    fn frame_samples(&self) -> Result<usize, IsacError> {
        FRAME_SAMPLES
            .get(usize::from(self.frame_length_code))
            .copied()
            .ok_or(IsacError::RangeErrorDecodeFrameLength)
    }

    fn bandwidth_index(&self) -> Result<i16, IsacError> {
        if self.bandwidth_code > 23 {
            return Err(IsacError::RangeErrorDecodeBandwidth);
        }
        Ok(i16::from(self.bandwidth_code))
    }
}

impl BwEstimator {
    /// Updates the estimator from a received payload carrying a
    /// [`PacketHeader`].
    pub fn update_bw_estimate(
        &mut self,
        payload: &[u8],
        rtp_number: u16,
        send_ts: u32,
        arr_ts: u32,
    ) -> Result<(), IsacError> {
        let header = PacketHeader::parse(payload)?;
        self.estimate_bandwidth(&header, payload.len(), rtp_number, send_ts, arr_ts)
    }
}
