//! # Path RTT Tracking
//!
//! Per-path round-trip-time smoothing (RFC 6298 SRTT/RTTVAR), feeding the
//! multipath selector's [`crate::multipath::PathMetrics::smoothed_rtt_us`]
//! and the retransmission gate's notion of "can this still make the
//! deadline". The base QUIC connection (an external collaborator) owns the
//! actual PING/PONG wire exchange and hands raw RTT samples to this tracker.

use std::time::Duration;

/// Smooths raw RTT samples into SRTT/RTTVAR/min/max per RFC 6298.
pub struct RttTracker {
    srtt_us: f64,
    rttvar_us: f64,
    min_rtt_us: f64,
    max_rtt_us: f64,
    sample_count: u64,
    /// Suggested interval between host-driven RTT probes.
    pub probe_interval: Duration,
}

impl RttTracker {
    pub fn new() -> Self {
        RttTracker {
            srtt_us: 0.0,
            rttvar_us: 0.0,
            min_rtt_us: f64::MAX,
            max_rtt_us: 0.0,
            sample_count: 0,
            probe_interval: Duration::from_millis(100),
        }
    }

    /// Feed in a raw RTT sample (microseconds) observed by the host.
    pub fn on_rtt_sample(&mut self, rtt_us: f64) {
        if rtt_us <= 0.0 {
            return;
        }
        self.sample_count += 1;

        if rtt_us < self.min_rtt_us {
            self.min_rtt_us = rtt_us;
        }
        if rtt_us > self.max_rtt_us {
            self.max_rtt_us = rtt_us;
        }

        if self.sample_count == 1 {
            self.srtt_us = rtt_us;
            self.rttvar_us = rtt_us / 2.0;
        } else {
            // α = 1/8, β = 1/4
            self.rttvar_us = 0.75 * self.rttvar_us + 0.25 * (self.srtt_us - rtt_us).abs();
            self.srtt_us = 0.875 * self.srtt_us + 0.125 * rtt_us;
        }
    }

    pub fn srtt_us(&self) -> f64 {
        self.srtt_us
    }

    pub fn rttvar_us(&self) -> f64 {
        self.rttvar_us
    }

    pub fn min_rtt_us(&self) -> f64 {
        self.min_rtt_us
    }

    /// RFC 6298: RTO = SRTT + 4*RTTVAR, clamped to [1ms, 60s].
    pub fn rto_us(&self) -> f64 {
        let rto = self.srtt_us + 4.0 * self.rttvar_us;
        rto.clamp(1_000.0, 60_000_000.0)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

impl Default for RttTracker {
    fn default() -> Self {
        Self::new()
    }
}
