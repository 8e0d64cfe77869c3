//! # Earliest-Deadline-First Scheduler (C6)
//!
//! Picks which stream gets to send next. Streams within
//! [`PROXIMITY_THRESHOLD`] of each other's effective deadline are treated as
//! a single fairness group and round-robined by least-recently-sent; between
//! groups, the earliest deadline always wins. A connection-level fairness
//! check can override the pick and force a non-deadline stream through
//! instead, so background traffic isn't starved by a steady stream of
//! urgent writes.

use crate::stream::StreamDeadlineState;

/// Streams whose effective deadlines are within this many microseconds of
/// each other are scheduled as a single group rather than strict EDF order.
pub const PROXIMITY_THRESHOLD_US: u64 = 10_000;

/// A schedulable unit passed to [`pick_next`]: either a deadline stream with
/// its effective deadline, or an ordinary (non-deadline) stream.
#[derive(Debug, Clone, Copy)]
pub struct SchedCandidate {
    pub stream_id: u64,
    /// `None` for non-deadline streams.
    pub effective_deadline_us: Option<u64>,
    pub last_time_data_sent_us: u64,
    pub has_unsent: bool,
    /// Set when the stream has a pending reset or stop-sending request;
    /// ranks above both EDF and the fairness override in [`pick_next`].
    pub urgent_control: bool,
}

impl SchedCandidate {
    pub fn from_deadline_stream(s: &StreamDeadlineState) -> Self {
        SchedCandidate {
            stream_id: s.stream_id,
            effective_deadline_us: Some(s.effective_deadline_us()),
            last_time_data_sent_us: s.last_time_data_sent_us,
            has_unsent: s.has_unsent(),
            urgent_control: s.reset_requested || s.stop_sending_requested,
        }
    }

    pub fn non_deadline(stream_id: u64, last_time_data_sent_us: u64, has_unsent: bool) -> Self {
        SchedCandidate {
            stream_id,
            effective_deadline_us: None,
            last_time_data_sent_us,
            has_unsent,
            urgent_control: false,
        }
    }
}

/// Choose the next stream to send from, honouring connection-wide fairness.
///
/// `force_non_deadline` should be the result of
/// [`crate::connection::ConnectionDeadlineState::should_force_non_deadline`].
/// When true, the earliest-sent non-deadline candidate with unsent data is
/// returned if one exists, before any deadline-stream logic runs.
pub fn pick_next(candidates: &[SchedCandidate], force_non_deadline: bool) -> Option<u64> {
    let mut sendable: Vec<&SchedCandidate> = candidates.iter().filter(|c| c.has_unsent).collect();
    if sendable.is_empty() {
        return None;
    }

    if let Some(c) = sendable.iter().find(|c| c.urgent_control) {
        return Some(c.stream_id);
    }

    if force_non_deadline {
        let non_deadline = sendable
            .iter()
            .filter(|c| c.effective_deadline_us.is_none())
            .min_by_key(|c| c.last_time_data_sent_us);
        if let Some(c) = non_deadline {
            return Some(c.stream_id);
        }
    }

    sendable.sort_by(|a, b| match (a.effective_deadline_us, b.effective_deadline_us) {
        (Some(da), Some(db)) => da.cmp(&db),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.last_time_data_sent_us.cmp(&b.last_time_data_sent_us),
    });

    let earliest = sendable[0];
    let earliest_deadline = match earliest.effective_deadline_us {
        Some(d) => d,
        None => return Some(earliest.stream_id),
    };

    // Gather every deadline candidate within the proximity window of the
    // earliest one and pick the least-recently-sent among them.
    let group: Vec<&&SchedCandidate> = sendable
        .iter()
        .take_while(|c| {
            c.effective_deadline_us
                .is_some_and(|d| d.saturating_sub(earliest_deadline) <= PROXIMITY_THRESHOLD_US)
        })
        .collect();

    group
        .iter()
        .min_by_key(|c| c.last_time_data_sent_us)
        .map(|c| c.stream_id)
}
