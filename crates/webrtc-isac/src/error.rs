//! Error codes of the bandwidth estimation and rate control paths.

use derive_more::Display;

/// Failures reported by the estimator and the rate helpers. [`code`](Self::code)
/// gives the numeric codec error code.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsacError {
    /// A bandwidth index outside `0..=23`.
    #[display("bandwidth index out of range ({})", self.code())]
    RangeErrorBwEstimator,
    /// The packet is too short to carry bandwidth feedback.
    #[display("empty packet ({})", self.code())]
    EmptyPacket,
    #[display("frame mode not allowed in decoder ({})", self.code())]
    DisallowedFrameModeDecoder,
    #[display("frame length code out of range ({})", self.code())]
    RangeErrorDecodeFrameLength,
    #[display("bandwidth code out of range ({})", self.code())]
    RangeErrorDecodeBandwidth,
    #[display("bottleneck not allowed ({})", self.code())]
    DisallowedBottleneck,
    #[display("frame length not allowed ({})", self.code())]
    DisallowedFrameLength,
    #[display("unsupported sampling frequency ({})", self.code())]
    UnsupportedSamplingFrequency,
}

impl IsacError {
    pub fn code(self) -> i16 {
        match self {
            Self::RangeErrorBwEstimator => 6240,
            Self::EmptyPacket => 6620,
            Self::DisallowedFrameModeDecoder => 6630,
            Self::RangeErrorDecodeFrameLength => 6640,
            Self::RangeErrorDecodeBandwidth => 6650,
            Self::DisallowedBottleneck => 6030,
            Self::DisallowedFrameLength => 6040,
            Self::UnsupportedSamplingFrequency => 6050,
        }
    }
}

impl std::error::Error for IsacError {}
