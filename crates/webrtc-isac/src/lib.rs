//! iSAC bandwidth estimation and rate control.
//!
//! [`BwEstimator`] tracks the downlink bottleneck and jitter from packet
//! arrival timing, and the uplink bottleneck from the feedback index the far
//! end embeds in its packets. On the encoder side [`RateModel`] sizes
//! payloads against the bottleneck and [`BottleneckController`] splits it
//! between the lower and upper band.

mod bandwidth_estimator;
mod bottleneck;
mod error;
mod feedback;
mod rate_model;

pub use bandwidth_estimator::{
    BwEstimator, DownlinkIndex, SamplingRate, MAX_ISAC_BW, MAX_ISAC_MD, MIN_ISAC_BW, MIN_ISAC_MD,
};
pub use bottleneck::{
    clamp_uplink_bottleneck, rate_allocation, AudioBandwidth, BottleneckController, RateAllocation,
};
pub use error::IsacError;
pub use feedback::{BandwidthFeedback, PacketHeader, MIN_FEEDBACK_PACKET_BYTES};
pub use rate_model::RateModel;
