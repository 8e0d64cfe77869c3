//! # Multipath Composite Path Selector (C10)
//!
//! Scores every initialised, non-demoted path by RTT, effective bandwidth,
//! loss, and congestion headroom, doubling the score of any path that can
//! meet a stream's deadline. Falls back to the fastest path if none can.

/// One minimum-segment size, used as the cwnd-headroom floor below which a
/// path is considered unusable for a new send.
pub const MIN_SEGMENT_BYTES: u64 = 1200;

/// Per-path metrics fed by the host's congestion controller and RTT tracker.
#[derive(Debug, Clone)]
pub struct PathMetrics {
    pub path_id: u8,
    /// Smoothed RTT in µs. `None` until the first sample arrives.
    pub smoothed_rtt_us: Option<u64>,
    /// Host-reported bandwidth estimate in bytes/sec; 0 means "derive it".
    pub bandwidth_estimate_bps: u64,
    /// Congestion window in bytes.
    pub cwin: u64,
    pub bytes_in_transit: u64,
    pub bytes_sent: u64,
    pub bytes_lost: u64,
    /// When the most recent loss event on this path was observed.
    pub last_loss_time_us: Option<u64>,
    /// Paths the host has demoted (e.g. interface down) are never selected.
    pub demoted: bool,
}

impl PathMetrics {
    pub fn new(path_id: u8) -> Self {
        PathMetrics {
            path_id,
            smoothed_rtt_us: None,
            bandwidth_estimate_bps: 0,
            cwin: 0,
            bytes_in_transit: 0,
            bytes_sent: 0,
            bytes_lost: 0,
            last_loss_time_us: None,
            demoted: false,
        }
    }

    fn available_cwnd(&self) -> u64 {
        self.cwin.saturating_sub(self.bytes_in_transit)
    }

    fn effective_bandwidth_bps(&self, rtt_us: u64) -> f64 {
        let headroom = self.available_cwnd() as f64 / self.cwin.max(1) as f64;
        let base = if self.bandwidth_estimate_bps == 0 {
            if rtt_us == 0 {
                0.0
            } else {
                self.cwin as f64 * 1_000_000.0 / rtt_us as f64
            }
        } else {
            self.bandwidth_estimate_bps as f64
        };
        base * headroom
    }

    fn loss_penalty(&self) -> f64 {
        if self.bytes_sent == 0 {
            return 1.0;
        }
        (1.0 - 10.0 * (self.bytes_lost as f64 / self.bytes_sent as f64)).max(0.1)
    }

    fn recent_loss(&self, now_us: u64, rtt_us: u64) -> bool {
        match self.last_loss_time_us {
            Some(t) => now_us.saturating_sub(t) < 10 * rtt_us,
            None => false,
        }
    }

    /// Scored candidacy for a stream with `bytes_remaining` left to send and
    /// an absolute deadline of `deadline_us`, evaluated at `now_us`.
    fn candidate(&self, bytes_remaining: u64, deadline_us: u64, now_us: u64) -> Option<PathCandidate> {
        if self.demoted {
            return None;
        }
        let rtt_us = self.smoothed_rtt_us?;
        if self.available_cwnd() < MIN_SEGMENT_BYTES {
            return None;
        }

        let effective_bw = self.effective_bandwidth_bps(rtt_us);
        let can_meet_deadline = if effective_bw <= 0.0 {
            false
        } else {
            let delivery_us = rtt_us as f64 + bytes_remaining as f64 * 8.0 * 1_000_000.0 / effective_bw;
            let remaining_us = deadline_us.saturating_sub(now_us) as f64;
            delivery_us < remaining_us
        };

        let rtt_ms = rtt_us as f64 / 1000.0;
        let rtt_score = 1000.0 / (rtt_ms + 1.0);
        let bw_score = (effective_bw / 1_000_000.0 * 8.0).min(100.0);
        let loss_penalty = self.loss_penalty();
        let congestion_score = self.available_cwnd() as f64 / self.cwin.max(1) as f64;

        let mut score =
            0.3 * rtt_score + 0.3 * bw_score + 0.2 * loss_penalty + 0.2 * congestion_score;
        score *= if can_meet_deadline { 2.0 } else { 1.0 };
        if self.recent_loss(now_us, rtt_us) {
            score *= 0.5;
        }

        Some(PathCandidate {
            path_id: self.path_id,
            score,
            can_meet_deadline,
            rtt_us,
        })
    }
}

struct PathCandidate {
    path_id: u8,
    score: f64,
    can_meet_deadline: bool,
    rtt_us: u64,
}

/// Pick the best path for a stream with `bytes_remaining` left to send and
/// an absolute deadline `deadline_us`. Returns `None` if no path is
/// initialised and non-demoted.
pub fn select_path<'a>(
    paths: impl Iterator<Item = &'a PathMetrics>,
    bytes_remaining: u64,
    deadline_us: u64,
    now_us: u64,
) -> Option<u8> {
    let mut best_meeting: Option<PathCandidate> = None;
    let mut fastest_rtt: Option<(u8, u64)> = None;

    for p in paths {
        if p.demoted {
            continue;
        }
        if let Some(rtt) = p.smoothed_rtt_us {
            if fastest_rtt.map_or(true, |(_, best)| rtt < best) {
                fastest_rtt = Some((p.path_id, rtt));
            }
        }
        if let Some(c) = p.candidate(bytes_remaining, deadline_us, now_us) {
            if c.can_meet_deadline && best_meeting.as_ref().map_or(true, |b| c.score > b.score) {
                best_meeting = Some(c);
            }
        }
    }

    // No path can meet the deadline: fall back to lowest RTT among
    // non-demoted paths, not the highest composite score — a clean but slow
    // path should never be preferred over a fast one just because neither
    // can make the deadline.
    let chosen = best_meeting
        .map(|c| c.path_id)
        .or_else(|| fastest_rtt.map(|(id, _)| id));

    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(?chosen, bytes_remaining, deadline_us, "multipath selection");
    }
    chosen
}
