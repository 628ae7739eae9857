//! Encoder-side payload sizing against the bottleneck.
//!
//! [`RateModel`] treats the bottleneck as a leaky bucket: every packet adds
//! its transmission time to the buffered delay, every frame drains one frame
//! duration. It forces a minimum payload during the start-up burst and, when
//! the encoder has stayed under the bottleneck for a while, for a short
//! burst that refills the buffer.

use crate::bandwidth_estimator::FS;
use crate::bottleneck::AudioBandwidth;

/// Packets of a refill burst.
const BURST_LEN: i32 = 3;
/// Packets of the start-up burst, sent after ten unconstrained ones.
const INIT_BURST_LEN: i32 = 5;
/// Time under the bottleneck before a refill burst, in ms.
const BURST_INTERVAL_MS: i32 = 500;
const INIT_RATE_WB: f64 = 20000.0;
const INIT_RATE_SWB: f64 = 56000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RateModel {
    prev_exceed: bool,
    /// Time since the bottleneck was last exceeded, in ms.
    exceed_ago_ms: i32,
    burst_counter: i32,
    init_counter: i32,
    /// Delay still queued at the bottleneck, in ms. Never negative.
    still_buffered_ms: f64,
}

impl Default for RateModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RateModel {
    pub fn new() -> Self {
        Self {
            prev_exceed: false,
            exceed_ago_ms: 0,
            burst_counter: 0,
            init_counter: INIT_BURST_LEN + 10,
            still_buffered_ms: 1.0,
        }
    }

    pub fn still_buffered_ms(&self) -> f64 {
        self.still_buffered_ms
    }

    fn frame_ms(frame_samples: usize) -> i32 {
        (frame_samples * 1000 / FS as usize) as i32
    }

    fn drain(&mut self, stream_size: usize, frame_samples: usize, bottleneck: f64) {
        let transmission_ms = stream_size as f64 * 8.0 * 1000.0 / bottleneck;
        self.still_buffered_ms += transmission_ms - f64::from(Self::frame_ms(frame_samples));
        self.still_buffered_ms = self.still_buffered_ms.max(0.0);
    }

    /// Minimum payload in bytes for the next packet.
    ///
    /// `stream_size` is the size the encoder produced, `bottleneck` the
    /// target rate excluding headers in bits/s and `delay_build_up_ms` the
    /// largest delay the bottleneck buffer may build up.
    pub fn min_bytes(
        &mut self,
        stream_size: usize,
        frame_samples: usize,
        bottleneck: f64,
        delay_build_up_ms: f64,
        bandwidth: AudioBandwidth,
    ) -> usize {
        let samples_per_ms = f64::from(FS / 1000);
        let frames = frame_samples as f64;
        let mut min_rate = 0.0;

        if self.init_counter > 0 {
            if self.init_counter <= INIT_BURST_LEN {
                min_rate = match bandwidth {
                    AudioBandwidth::Khz8 => INIT_RATE_WB,
                    AudioBandwidth::Khz12 | AudioBandwidth::Khz16 => INIT_RATE_SWB,
                };
            }
            self.init_counter -= 1;
        } else if self.burst_counter > 0 {
            let burst_len = f64::from(BURST_LEN);
            min_rate = if self.still_buffered_ms < (1.0 - 1.0 / burst_len) * delay_build_up_ms {
                // Rate that builds up the allowed delay over one burst.
                (1.0 + samples_per_ms * delay_build_up_ms / (burst_len * frames)) * bottleneck
            } else {
                let rate = (1.0 + samples_per_ms * (delay_build_up_ms - self.still_buffered_ms) / frames)
                    * bottleneck;
                rate.max(1.04 * bottleneck)
            };
            self.burst_counter -= 1;
        }

        let min_bytes = (min_rate * frames / (8.0 * f64::from(FS))) as usize;
        let stream_size = stream_size.max(min_bytes);

        let frame_ms = Self::frame_ms(frame_samples);
        if stream_size as f64 * 8.0 * f64::from(FS) / frames > 1.01 * bottleneck {
            if self.prev_exceed {
                // Exceeded twice in a row.
                self.exceed_ago_ms = (self.exceed_ago_ms - BURST_INTERVAL_MS / (BURST_LEN - 1)).max(0);
            } else {
                self.exceed_ago_ms += frame_ms;
                self.prev_exceed = true;
            }
        } else {
            self.prev_exceed = false;
            self.exceed_ago_ms += frame_ms;
        }

        if self.exceed_ago_ms > BURST_INTERVAL_MS && self.burst_counter == 0 {
            self.burst_counter = if self.prev_exceed { BURST_LEN - 1 } else { BURST_LEN };
            tracing::trace!(burst = self.burst_counter, "refill burst");
        }

        self.drain(stream_size, frame_samples, bottleneck);
        min_bytes
    }

    /// Accounts for a packet sized without [`min_bytes`](Self::min_bytes).
    /// Ends the start-up burst.
    pub fn update(&mut self, stream_size: usize, frame_samples: usize, bottleneck: f64) {
        self.init_counter = 0;
        self.drain(stream_size, frame_samples, bottleneck);
    }

    /// Frame length in samples the encoder should switch to at `bottleneck`
    /// bits/s, given the current one. 20 ms frames are never chosen.
    pub fn new_frame_length(bottleneck: f64, current_frame_samples: usize) -> usize {
        const THLD_20_30: f64 = 20000.0;
        const THLD_30_20: f64 = 1_000_000.0;
        const THLD_30_60: f64 = 18000.0;
        const THLD_60_30: f64 = 27000.0;

        match current_frame_samples {
            320 if bottleneck < THLD_20_30 => 480,
            480 if bottleneck < THLD_30_60 => 960,
            480 if bottleneck > THLD_30_20 => 320,
            960 if bottleneck >= THLD_60_30 => 480,
            n => n,
        }
    }

    /// Target signal-to-noise ratio in dB for `bottleneck` bits/s. Unknown
    /// frame lengths give `0`.
    pub fn snr(bottleneck: f64, frame_samples: usize) -> f64 {
        let (a, b) = match frame_samples {
            320 => (-30.0, 0.8),
            480 => (-23.0, 0.48),
            960 => (-23.0, 0.53),
            _ => return 0.0,
        };
        a + b * bottleneck * 0.001
    }
}
