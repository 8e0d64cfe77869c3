//! # Connection-Wide Deadline State
//!
//! Negotiation, fairness-window accounting, anti-starvation timers, and the
//! per-path metrics cache shared by the EDF scheduler and the multipath
//! selector. Owned exclusively by the connection.

use std::collections::HashMap;

use crate::errors::DeadlineError;
use crate::multipath::PathMetrics;

/// Rolling fairness window duration (§6 defaults).
pub const FAIRNESS_WINDOW_US: u64 = 100_000;
/// Default floor below which fairness forces a non-deadline pick.
pub const DEFAULT_MIN_NON_DEADLINE_SHARE: f64 = 0.20;
/// Default anti-starvation guard.
pub const DEFAULT_MAX_STARVATION_US: u64 = 50_000;
/// Maximum number of paths tracked in the metrics cache.
pub const MAX_PATHS: usize = 16;

/// Callback invoked when a hard deadline causes bytes to be dropped.
pub type DeadlineMissedCallback = Box<dyn FnMut(u64) + Send>;

/// Connection-scoped deadline-aware-streams state (C3).
pub struct ConnectionDeadlineState {
    /// True iff both endpoints advertised `enable_deadline_aware_streams`.
    pub negotiated: bool,
    /// Mirrors `negotiated` at steady state; kept distinct so a future
    /// extension could suspend scheduling without losing negotiation state.
    pub scheduling_active: bool,

    pub fairness_window_start_us: u64,
    pub deadline_bytes_sent: u64,
    pub non_deadline_bytes_sent: u64,
    pub min_non_deadline_share: f64,

    pub last_non_deadline_scheduled_us: u64,
    pub max_starvation_us: u64,

    on_deadline_missed: Option<DeadlineMissedCallback>,

    paths: HashMap<u8, PathMetrics>,
}

impl ConnectionDeadlineState {
    pub fn new(now_us: u64) -> Self {
        ConnectionDeadlineState {
            negotiated: false,
            scheduling_active: false,
            fairness_window_start_us: now_us,
            deadline_bytes_sent: 0,
            non_deadline_bytes_sent: 0,
            min_non_deadline_share: DEFAULT_MIN_NON_DEADLINE_SHARE,
            last_non_deadline_scheduled_us: now_us,
            max_starvation_us: DEFAULT_MAX_STARVATION_US,
            on_deadline_missed: None,
            paths: HashMap::new(),
        }
    }

    /// Combine the local and peer transport-parameter advertisement into the
    /// connection's negotiated state. The base QUIC handshake (external
    /// collaborator) is responsible for calling this once both sides'
    /// transport parameters are known.
    pub fn set_negotiated(&mut self, local_advertised: bool, peer_advertised: bool) {
        self.negotiated = local_advertised && peer_advertised;
        self.scheduling_active = self.negotiated;
    }

    /// Validate and install new fairness parameters.
    pub fn set_fairness_params(
        &mut self,
        min_non_deadline_share: f64,
        max_starvation_us: u64,
    ) -> Result<(), DeadlineError> {
        if !(0.0..=1.0).contains(&min_non_deadline_share) || max_starvation_us == 0 {
            return Err(DeadlineError::ResourceExhausted);
        }
        self.min_non_deadline_share = min_non_deadline_share;
        self.max_starvation_us = max_starvation_us;
        Ok(())
    }

    pub fn register_deadline_missed_callback(&mut self, cb: DeadlineMissedCallback) {
        self.on_deadline_missed = Some(cb);
    }

    /// Invoke the registered callback, if any, for `stream_id`.
    pub fn fire_deadline_missed(&mut self, stream_id: u64) {
        if let Some(cb) = self.on_deadline_missed.as_mut() {
            cb(stream_id);
        }
    }

    /// Record bytes sent to a deadline or non-deadline stream, rolling the
    /// fairness window over if it has elapsed.
    pub fn record_bytes_sent(&mut self, now_us: u64, is_deadline: bool, bytes: u64) {
        self.maybe_roll_window(now_us);
        if is_deadline {
            self.deadline_bytes_sent += bytes;
        } else {
            self.non_deadline_bytes_sent += bytes;
            self.last_non_deadline_scheduled_us = now_us;
        }
    }

    fn maybe_roll_window(&mut self, now_us: u64) {
        if now_us.saturating_sub(self.fairness_window_start_us) >= FAIRNESS_WINDOW_US {
            self.fairness_window_start_us = now_us;
            self.deadline_bytes_sent = 0;
            self.non_deadline_bytes_sent = 0;
        }
    }

    /// Whether the scheduler must force a non-deadline pick this round.
    pub fn should_force_non_deadline(&mut self, now_us: u64) -> bool {
        let window_elapsed = now_us.saturating_sub(self.fairness_window_start_us) >= FAIRNESS_WINDOW_US;
        let total = self.deadline_bytes_sent + self.non_deadline_bytes_sent;
        let share_violated = window_elapsed
            && total > 0
            && (self.non_deadline_bytes_sent as f64 / total as f64) < self.min_non_deadline_share;
        let starved =
            now_us.saturating_sub(self.last_non_deadline_scheduled_us) > self.max_starvation_us;

        if window_elapsed {
            self.maybe_roll_window(now_us);
        }
        share_violated || starved
    }

    /// Insert or update a path's metrics. Silently ignored once the cache is
    /// full and the path is unknown (design choice: the host is expected to
    /// bound active paths well below `MAX_PATHS` in practice).
    pub fn update_path(&mut self, path_id: u8, metrics: PathMetrics) {
        if !self.paths.contains_key(&path_id) && self.paths.len() >= MAX_PATHS {
            return;
        }
        self.paths.insert(path_id, metrics);
    }

    pub fn remove_path(&mut self, path_id: u8) {
        self.paths.remove(&path_id);
    }

    pub fn path(&self, path_id: u8) -> Option<&PathMetrics> {
        self.paths.get(&path_id)
    }

    pub fn paths(&self) -> impl Iterator<Item = (&u8, &PathMetrics)> {
        self.paths.iter()
    }
}
