//! Receive-side bottleneck and jitter estimation.
//!
//! [`BwEstimator`] watches the arrival timing of incoming packets and keeps
//! a running estimate of the bottleneck rate from the far end to here. Each
//! outgoing packet carries that estimate, quantized to a bandwidth index, so
//! the far end can adapt its encoder; the index the far end sends back
//! updates the estimate of the rate from here to there.
//!
//! All timestamps are in 16 kHz samples and wrap around.

use crate::error::IsacError;
use crate::feedback::BandwidthFeedback;

/// Sample rate of the timestamps the estimator works in.
pub(crate) const FS: u32 = 16000;
/// Per-packet header overhead in bytes.
const HEADER_SIZE: f32 = 35.0;

pub const MIN_ISAC_BW: i32 = 10000;
pub const MAX_ISAC_BW: i32 = 56000;
/// Bounds of the max-delay estimate, in ms.
pub const MIN_ISAC_MD: i32 = 5;
pub const MAX_ISAC_MD: i32 = 25;

const INIT_FRAME_LEN_WB: i32 = 60;
const INIT_FRAME_LEN_SWB: i32 = 30;
const INIT_BN_EST_WB: f32 = 20000.0;
const INIT_BN_EST_SWB: f32 = 56000.0;
const INIT_HDR_RATE_WB: f32 = HEADER_SIZE * 8.0 * 1000.0 / INIT_FRAME_LEN_WB as f32;
const INIT_HDR_RATE_SWB: f32 = HEADER_SIZE * 8.0 * 1000.0 / INIT_FRAME_LEN_SWB as f32;

/// Packets over which the estimator only tracks timing.
const WARM_UP_PACKETS: i32 = 9;
const MAX_JITTER_MS: f32 = 10.0;
/// Consecutive late packets before the estimate is cut.
const MAX_CONSECUTIVE_LATE: u32 = 50;
/// Rate above which a packet counts towards high-speed network detection.
const HSN_RATE_BPS: f32 = 28000.0;
/// About two seconds of 30 ms packets.
const HSN_PACKETS: u32 = 66;

/// Quantization levels of the wideband bandwidth index.
pub(crate) const Q_RATE_TABLE_WB: [f32; 12] = [
    10000.0, 11115.3, 12355.1, 13733.1, 15264.8, 16967.3, 18859.8, 20963.3, 23301.4, 25900.3,
    28789.0, 32000.0,
];

/// Quantization levels of the super-wideband bandwidth index.
pub(crate) const Q_RATE_TABLE_SWB: [f32; 24] = [
    10000.0, 11115.3, 12355.1, 13733.1, 15264.8, 16967.3, 18859.8, 20963.3, 23153.1, 25342.9,
    27532.7, 29722.5, 31912.3, 34102.1, 36291.9, 38481.7, 40671.4, 42861.2, 45051.0, 47240.8,
    49430.6, 51620.4, 53810.2, 56000.0,
];

/// Codec sampling rate on one side of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingRate {
    /// 16 kHz.
    #[default]
    Wideband,
    /// 32 kHz.
    SuperWideband,
}

impl SamplingRate {
    pub fn from_hz(sample_rate_hz: u32) -> Result<Self, IsacError> {
        match sample_rate_hz {
            16000 => Ok(Self::Wideband),
            32000 => Ok(Self::SuperWideband),
            _ => Err(IsacError::UnsupportedSamplingFrequency),
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            Self::Wideband => 16000,
            Self::SuperWideband => 32000,
        }
    }
}

/// Bandwidth feedback to embed in an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownlinkIndex {
    /// Quantized bottleneck, with the jitter bit folded in for wideband.
    pub bottleneck_index: i16,
    /// `1` if the max delay is closer to the high level.
    pub jitter_info: i16,
}

#[derive(Debug, Clone)]
pub struct BwEstimator {
    encoder_rate: SamplingRate,
    decoder_rate: SamplingRate,

    prev_frame_length: i32,
    prev_rec_rtp_number: u16,
    prev_rec_send_ts: u32,
    prev_rec_arr_ts: u32,
    prev_rec_rtp_rate: f32,
    last_update_ts: u32,
    last_reduction_ts: u32,
    count_tot_updates_rec: i32,

    rec_bw: i32,
    rec_bw_inv: f32,
    rec_bw_avg: f32,
    rec_bw_avg_q: f32,
    rec_jitter: f32,
    rec_jitter_short_term: f32,
    rec_jitter_short_term_abs: f32,
    rec_max_delay: f32,
    rec_max_delay_avg_q: f32,
    rec_header_rate: f32,

    send_bw_avg: f32,
    send_max_delay_avg: f32,

    num_pkts_rec: i32,
    num_consec_rec_pkts_over_30k: u32,
    hsn_detect_rec: bool,
    num_consec_snt_pkts_over_30k: u32,
    hsn_detect_snd: bool,

    in_wait_period: i32,
    num_consec_late_pkts: u32,
    consec_latency: f32,
    in_wait_late_pkts: i32,

    sender_timestamp: u32,
    receiver_timestamp: u32,
}

impl BwEstimator {
    /// `encoder_rate` is the rate this side encodes at, `decoder_rate` the
    /// rate the far end encodes at.
    pub fn new(encoder_rate: SamplingRate, decoder_rate: SamplingRate) -> Self {
        let send_bw_avg = match encoder_rate {
            SamplingRate::Wideband => INIT_BN_EST_WB,
            SamplingRate::SuperWideband => INIT_BN_EST_SWB,
        };
        let (frame_length, bn_est, header_rate) = match decoder_rate {
            SamplingRate::Wideband => (INIT_FRAME_LEN_WB, INIT_BN_EST_WB, INIT_HDR_RATE_WB),
            SamplingRate::SuperWideband => (INIT_FRAME_LEN_SWB, INIT_BN_EST_SWB, INIT_HDR_RATE_SWB),
        };
        Self {
            encoder_rate,
            decoder_rate,
            prev_frame_length: frame_length,
            prev_rec_rtp_number: 0,
            prev_rec_send_ts: 0,
            prev_rec_arr_ts: 0,
            prev_rec_rtp_rate: 1.0,
            last_update_ts: 0,
            last_reduction_ts: 0,
            count_tot_updates_rec: -WARM_UP_PACKETS,
            rec_bw: bn_est as i32,
            rec_bw_inv: 1.0 / (bn_est + header_rate),
            rec_bw_avg: bn_est + header_rate,
            rec_bw_avg_q: bn_est,
            rec_jitter: 10.0,
            rec_jitter_short_term: 0.0,
            rec_jitter_short_term_abs: 5.0,
            rec_max_delay: 10.0,
            rec_max_delay_avg_q: 10.0,
            rec_header_rate: header_rate,
            send_bw_avg,
            send_max_delay_avg: 10.0,
            num_pkts_rec: 0,
            num_consec_rec_pkts_over_30k: 0,
            hsn_detect_rec: false,
            num_consec_snt_pkts_over_30k: 0,
            hsn_detect_snd: false,
            in_wait_period: 0,
            num_consec_late_pkts: 0,
            consec_latency: 0.0,
            in_wait_late_pkts: 0,
            sender_timestamp: 0,
            receiver_timestamp: 0,
        }
    }

    pub fn encoder_rate(&self) -> SamplingRate {
        self.encoder_rate
    }

    pub fn decoder_rate(&self) -> SamplingRate {
        self.decoder_rate
    }

    fn header_rate(frame_length_ms: i32) -> f32 {
        HEADER_SIZE * 8.0 * 1000.0 / frame_length_ms as f32
    }

    /// Restarts the update window so no reduction happens for the next
    /// three seconds.
    fn reset_update_window(&mut self, arr_ts: u32) {
        self.last_update_ts = arr_ts;
        self.last_reduction_ts = arr_ts.wrapping_add(3 * FS);
        self.num_pkts_rec = 0;
    }

    /// Folds one received packet into the downlink estimate.
    ///
    /// `frame_length_ms` is the audio duration of the packet, `send_ts` the
    /// RTP timestamp and `arr_ts` the arrival time, both in 16 kHz samples.
    /// `packet_size` is the payload size in bytes.
    pub fn update(
        &mut self,
        rtp_number: u16,
        frame_length_ms: i32,
        send_ts: u32,
        arr_ts: u32,
        packet_size: usize,
    ) -> Result<(), IsacError> {
        if frame_length_ms <= 0 {
            return Err(IsacError::DisallowedFrameLength);
        }
        let frame_length = frame_length_ms as f32;
        let frame_samples = 16.0 * frame_length;
        let mut delay_correction_factor = 1.0f32;
        let mut immediate_set = false;

        // The header rate follows the packet duration.
        if frame_length_ms != self.prev_frame_length {
            self.rec_header_rate = Self::header_rate(frame_length_ms);
        }

        let rec_rtp_rate = packet_size as f32 * 8.0 * 1000.0 / frame_length + self.rec_header_rate;

        // Arrival clock wrapped around: start over from this packet.
        if arr_ts < self.prev_rec_arr_ts {
            self.prev_rec_arr_ts = arr_ts;
            self.last_update_ts = arr_ts;
            self.last_reduction_ts = arr_ts.wrapping_add(3 * FS);
            self.num_pkts_rec = 0;
            self.prev_frame_length = frame_length_ms;
            self.prev_rec_rtp_rate = rec_rtp_rate;
            self.prev_rec_rtp_number = rtp_number;
            tracing::trace!(arr_ts, "arrival clock wrapped");
            return Ok(());
        }

        self.num_pkts_rec += 1;

        if self.count_tot_updates_rec > 0 {
            self.in_wait_period = (self.in_wait_period - 1).max(0);
            self.in_wait_late_pkts = (self.in_wait_late_pkts - 1).max(0);

            let send_ts_diff = send_ts.wrapping_sub(self.prev_rec_send_ts) as f32;
            if send_ts_diff <= 2.0 * frame_samples {
                self.maybe_reduce_after_silence(arr_ts, frame_length);
            } else {
                self.reset_update_window(arr_ts);
            }

            // Adapt faster right after a frame length change.
            if frame_length_ms != self.prev_frame_length {
                self.count_tot_updates_rec = 10;
                self.rec_header_rate = Self::header_rate(frame_length_ms);
                self.rec_bw_inv = 1.0 / (self.rec_bw as f32 + self.rec_header_rate);
            }

            let mut arr_ts_diff = arr_ts.wrapping_sub(self.prev_rec_arr_ts) as f32;
            let late_diff = if send_ts_diff > 0.0 {
                arr_ts_diff - send_ts_diff
            } else {
                arr_ts_diff - frame_samples
            };

            if late_diff > 0.0 && self.in_wait_late_pkts == 0 {
                self.num_consec_late_pkts += 1;
                self.consec_latency += late_diff;
            } else {
                self.num_consec_late_pkts = 0;
                self.consec_latency = 0.0;
            }
            if self.num_consec_late_pkts > MAX_CONSECUTIVE_LATE {
                let latency_ms = self.consec_latency / (FS / 1000) as f32;
                let average_latency_ms = latency_ms / self.num_consec_late_pkts as f32;
                delay_correction_factor = frame_length / (frame_length + average_latency_ms);
                immediate_set = true;
                self.in_wait_late_pkts = (latency_ms / 30.0) as i32;
                tracing::debug!(average_latency_ms, "persistent late packets");
            }

            // Only consecutive packets say anything about the bottleneck.
            if rtp_number == self.prev_rec_rtp_number.wrapping_add(1) {
                if !(self.hsn_detect_snd && self.hsn_detect_rec)
                    && arr_ts_diff > frame_samples
                    && self.in_wait_period == 0
                {
                    if late_diff > 8000.0 {
                        // Half a second late.
                        delay_correction_factor = 0.7;
                        self.in_wait_period = 55;
                        immediate_set = true;
                    } else if late_diff > 5120.0 {
                        delay_correction_factor = 0.8;
                        self.in_wait_period = 44;
                        immediate_set = true;
                    }
                }

                if self.prev_rec_rtp_rate > self.rec_bw_avg
                    && rec_rtp_rate > self.rec_bw_avg
                    && self.in_wait_period == 0
                {
                    let weight = if self.count_tot_updates_rec > 99 {
                        self.count_tot_updates_rec += 1;
                        0.01
                    } else {
                        self.count_tot_updates_rec += 1;
                        1.0 / self.count_tot_updates_rec as f32
                    };

                    // Outliers of more than 25 ms, or below the frame
                    // duration minus 10 ms, are limited.
                    let frame_span = frame_length * (FS / 1000) as f32;
                    arr_ts_diff = arr_ts_diff.clamp(frame_span - 160.0, frame_span + 400.0);

                    let packet_bits = (packet_size as f32 + HEADER_SIZE) * 8.0;
                    let curr_bw_inv = (arr_ts_diff / (packet_bits * FS as f32))
                        .max(1.0 / (MAX_ISAC_BW as f32 + self.rec_header_rate));
                    self.rec_bw_inv = weight * curr_bw_inv + (1.0 - weight) * self.rec_bw_inv;
                    self.reset_update_window(arr_ts);

                    // Jitter: actual against projected arrival time difference.
                    let t_diff_proj = packet_bits * 1000.0 / self.rec_bw_avg;
                    let arr_time_noise = arr_ts_diff * 1000.0 / FS as f32 - t_diff_proj;
                    let arr_time_noise_abs = arr_time_noise.abs();

                    self.rec_jitter = (weight * arr_time_noise_abs
                        + (1.0 - weight) * self.rec_jitter)
                        .min(MAX_JITTER_MS);
                    self.rec_jitter_short_term_abs =
                        0.05 * arr_time_noise_abs + 0.95 * self.rec_jitter_short_term_abs;
                    self.rec_jitter_short_term =
                        0.05 * arr_time_noise + 0.95 * self.rec_jitter_short_term;
                }
            }
        } else {
            self.reset_update_window(arr_ts);
            self.count_tot_updates_rec += 1;
        }

        let header_rate = self.rec_header_rate;
        self.rec_bw_inv = self.rec_bw_inv.clamp(
            1.0 / (MAX_ISAC_BW as f32 + header_rate),
            1.0 / (MIN_ISAC_BW as f32 + header_rate),
        );

        self.prev_frame_length = frame_length_ms;
        self.prev_rec_rtp_rate = rec_rtp_rate;
        self.prev_rec_rtp_number = rtp_number;
        self.rec_max_delay = 3.0 * self.rec_jitter;
        self.prev_rec_arr_ts = arr_ts;
        self.prev_rec_send_ts = send_ts;

        self.rec_bw = (1.0 / self.rec_bw_inv - header_rate) as i32;

        if immediate_set {
            self.rec_bw = ((delay_correction_factor * self.rec_bw as f32) as i32).max(MIN_ISAC_BW);
            self.rec_bw_avg = self.rec_bw as f32 + header_rate;
            self.rec_bw_avg_q = self.rec_bw as f32;
            self.rec_jitter_short_term = 0.0;
            self.rec_bw_inv = 1.0 / (self.rec_bw as f32 + header_rate);
            self.count_tot_updates_rec = 1;
            self.consec_latency = 0.0;
            self.num_consec_late_pkts = 0;
            tracing::debug!(rec_bw = self.rec_bw, delay_correction_factor, "bottleneck cut");
        }

        self.update_receive_hsn();
        tracing::trace!(
            rtp_number,
            rec_bw = self.rec_bw,
            rec_jitter = self.rec_jitter,
            "downlink estimate"
        );
        Ok(())
    }

    /// Raises the estimate when nothing has updated it for three seconds
    /// although packets kept arriving.
    fn maybe_reduce_after_silence(&mut self, arr_ts: u32, frame_length: f32) {
        let since_update_ms = arr_ts.wrapping_sub(self.last_update_ts) as f32 * 1000.0 / FS as f32;
        if since_update_ms <= 3000.0 {
            return;
        }
        let num_pkts_expected = (since_update_ms / frame_length) as i32;
        if self.num_pkts_rec as f32 / num_pkts_expected as f32 > 0.9 {
            let since_reduction_ms =
                arr_ts.wrapping_sub(self.last_reduction_ts) as f32 * 1000.0 / FS as f32;
            let inv_bitrate = 0.99995f64.powf(f64::from(since_reduction_ms)) as f32;
            if inv_bitrate != 0.0 {
                self.rec_bw_inv /= inv_bitrate;
                if self.hsn_detect_snd && self.hsn_detect_rec {
                    self.rec_bw_inv = self.rec_bw_inv.min(0.000066);
                }
            } else {
                self.rec_bw_inv = 1.0 / (INIT_BN_EST_WB + INIT_HDR_RATE_WB);
            }
            self.last_reduction_ts = arr_ts;
        } else {
            self.reset_update_window(arr_ts);
        }
    }

    fn update_receive_hsn(&mut self) {
        if self.hsn_detect_rec {
            return;
        }
        if self.rec_bw as f32 > HSN_RATE_BPS {
            self.num_consec_rec_pkts_over_30k += 1;
            if self.num_consec_rec_pkts_over_30k >= HSN_PACKETS {
                tracing::debug!("high-speed downlink detected");
                self.hsn_detect_rec = true;
            }
        } else {
            self.num_consec_rec_pkts_over_30k = 0;
        }
    }

    /// Folds the bandwidth index sent by the far end into the uplink
    /// estimate. Out-of-range indices leave the state untouched.
    pub fn update_uplink_bw(&mut self, index: i16) -> Result<(), IsacError> {
        if !(0..=23).contains(&index) {
            return Err(IsacError::RangeErrorBwEstimator);
        }
        let mut index = index as usize;

        match self.encoder_rate {
            SamplingRate::Wideband => {
                let max_delay = if index > 11 {
                    index -= 12;
                    MAX_ISAC_MD
                } else {
                    MIN_ISAC_MD
                };
                self.send_max_delay_avg = 0.9 * self.send_max_delay_avg + 0.1 * max_delay as f32;
                self.send_bw_avg = 0.9 * self.send_bw_avg + 0.1 * Q_RATE_TABLE_WB[index];
            }
            SamplingRate::SuperWideband => {
                self.send_bw_avg = 0.9 * self.send_bw_avg + 0.1 * Q_RATE_TABLE_SWB[index];
            }
        }

        if !self.hsn_detect_snd {
            if self.send_bw_avg > HSN_RATE_BPS {
                self.num_consec_snt_pkts_over_30k += 1;
                if self.num_consec_snt_pkts_over_30k >= HSN_PACKETS {
                    tracing::debug!("high-speed uplink detected");
                    self.hsn_detect_snd = true;
                }
            } else {
                self.num_consec_snt_pkts_over_30k = 0;
            }
        }
        Ok(())
    }

    /// Folds the jitter bit carried in a super-wideband upper band into the
    /// uplink max-delay estimate.
    pub fn update_uplink_jitter(&mut self, index: i32) -> Result<(), IsacError> {
        if !(0..=23).contains(&index) {
            return Err(IsacError::RangeErrorBwEstimator);
        }
        let max_delay = if index > 0 { MAX_ISAC_MD } else { MIN_ISAC_MD };
        self.send_max_delay_avg = 0.9 * self.send_max_delay_avg + 0.1 * max_delay as f32;
        Ok(())
    }

    /// Quantizes the downlink estimate for the next outgoing packet.
    ///
    /// Both running averages move towards the quantized values, so this
    /// must be called exactly once per outgoing packet.
    pub fn downlink_bw_jit_index(&mut self) -> DownlinkIndex {
        const WEIGHT: f32 = 0.1;

        let max_delay = self.downlink_max_delay() as f32;
        let towards_max = (1.0 - WEIGHT) * self.rec_max_delay_avg_q + WEIGHT * MAX_ISAC_MD as f32;
        let towards_min = (1.0 - WEIGHT) * self.rec_max_delay_avg_q + WEIGHT * MIN_ISAC_MD as f32;
        let jitter_info = if towards_max - max_delay > max_delay - towards_min {
            self.rec_max_delay_avg_q = towards_min;
            0
        } else {
            self.rec_max_delay_avg_q = towards_max;
            1
        };

        let rate = self.downlink_bandwidth() as f32;
        let (table, add_jitter_info): (&[f32], i16) = match self.decoder_rate {
            SamplingRate::Wideband => (&Q_RATE_TABLE_WB, 1),
            SamplingRate::SuperWideband => (&Q_RATE_TABLE_SWB, 0),
        };

        let mut min_ind = 0;
        let mut max_ind = table.len() - 1;
        while max_ind > min_ind + 1 {
            let mid = (max_ind + min_ind) / 2;
            if rate > table[mid] {
                min_ind = mid;
            } else {
                max_ind = mid;
            }
        }

        // Pick the level that keeps the running average closest to `rate`.
        let r = (1.0 - WEIGHT) * self.rec_bw_avg_q - rate;
        let e1 = (WEIGHT * table[min_ind] + r).abs();
        let e2 = (WEIGHT * table[max_ind] + r).abs();
        let index = if e1 < e2 { min_ind } else { max_ind };

        self.rec_bw_avg_q = (1.0 - WEIGHT) * self.rec_bw_avg_q + WEIGHT * table[index];
        self.rec_bw_avg =
            (1.0 - WEIGHT) * self.rec_bw_avg + WEIGHT * (rate + self.rec_header_rate);

        DownlinkIndex {
            bottleneck_index: index as i16 + jitter_info * 12 * add_jitter_info,
            jitter_info,
        }
    }

    /// Far-end to here bottleneck in bits/s, adjusted by the short-term
    /// jitter trend.
    pub fn downlink_bandwidth(&self) -> i32 {
        let jitter_sign = self.rec_jitter_short_term / self.rec_jitter_short_term_abs;
        let bw_adjust = 1.0 - jitter_sign * (0.15 + 0.15 * jitter_sign * jitter_sign);
        ((self.rec_bw as f32 * bw_adjust) as i32).clamp(MIN_ISAC_BW, MAX_ISAC_BW)
    }

    /// Far-end to here max delay in ms.
    pub fn downlink_max_delay(&self) -> i32 {
        (self.rec_max_delay as i32).clamp(MIN_ISAC_MD, MAX_ISAC_MD)
    }

    /// Here to far-end bottleneck in bits/s, as reported by the far end.
    pub fn uplink_bandwidth(&self) -> i32 {
        if self.send_bw_avg < MIN_ISAC_BW as f32 {
            MIN_ISAC_BW
        } else if self.send_bw_avg > MAX_ISAC_BW as f32 {
            MAX_ISAC_BW
        } else {
            self.send_bw_avg as i32
        }
    }

    /// Here to far-end max delay in ms, as reported by the far end.
    pub fn uplink_max_delay(&self) -> i32 {
        (self.send_max_delay_avg as i32).clamp(MIN_ISAC_MD, MAX_ISAC_MD)
    }

    /// Seeds the uplink average before any feedback arrives. Accepts
    /// 10 to 32 kbps.
    pub fn set_initial_bottleneck(&mut self, bottleneck: i32) -> Result<(), IsacError> {
        if !(MIN_ISAC_BW..=32000).contains(&bottleneck) {
            return Err(IsacError::DisallowedBottleneck);
        }
        self.send_bw_avg = bottleneck as f32;
        Ok(())
    }

    /// Raw far-end average behind [`uplink_bandwidth`](Self::uplink_bandwidth).
    pub(crate) fn send_bw_avg(&self) -> f32 {
        self.send_bw_avg
    }

    /// Updates both directions from a received packet: the far end's
    /// bandwidth index goes into the uplink estimate, the arrival timing
    /// into the downlink estimate.
    ///
    /// Timestamps are at the far end's rate and are rescaled to 16 kHz.
    pub fn estimate_bandwidth(
        &mut self,
        feedback: &impl BandwidthFeedback,
        packet_size: usize,
        rtp_number: u16,
        send_ts: u32,
        arr_ts: u32,
    ) -> Result<(), IsacError> {
        let frame_samples = feedback.frame_samples()?;
        if self.decoder_rate == SamplingRate::SuperWideband && frame_samples != 480 {
            // Super-wideband streams only carry 30 ms frames.
            return Err(IsacError::DisallowedFrameModeDecoder);
        }
        let index = feedback.bandwidth_index()?;
        self.update_uplink_bw(index)?;

        let mut diff_send = send_ts.wrapping_sub(self.sender_timestamp);
        self.sender_timestamp = send_ts;
        let mut diff_arrival = arr_ts.wrapping_sub(self.receiver_timestamp);
        self.receiver_timestamp = arr_ts;
        if self.decoder_rate == SamplingRate::SuperWideband {
            diff_send >>= 1;
            diff_arrival >>= 1;
        }
        let send_ts_16k = self.prev_rec_send_ts.wrapping_add(diff_send);
        let arr_ts_16k = self.prev_rec_arr_ts.wrapping_add(diff_arrival);

        let frame_length_ms = (frame_samples * 1000 / FS as usize) as i32;
        self.update(rtp_number, frame_length_ms, send_ts_16k, arr_ts_16k, packet_size)
    }
}
