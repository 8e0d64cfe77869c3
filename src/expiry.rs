//! # Deadline Expiry Checker (C5)
//!
//! Walks streams whose effective deadline has passed. Hard-class streams
//! drop their unsent tail and queue a `STREAM_DATA_DROPPED` frame; soft-class
//! streams are left alone beyond a missed-deadline count, since expiry only
//! lowers their scheduling priority rather than discarding bytes.
//!
//! Mid-chunk splitting: when a dropped range would fall strictly inside a
//! chunk still being built up by the application (not the common case, since
//! `drop_unsent_tail` drops from the queue onward), the boundary is the
//! chunk's own offset — there is nothing to split here. Splitting applies on
//! the receive side instead, see [`crate::skipper`].

use crate::stream::{DeadlineClass, StreamDeadlineState};
use crate::wire::StreamDataDroppedFrame;

/// Outcome of checking a single stream for expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Deadline has not yet passed.
    NotExpired,
    /// Soft-class deadline passed; nothing dropped, priority only affected.
    SoftMissed,
    /// Hard-class deadline passed and a byte range was dropped.
    HardDropped { offset: u64, length: u64 },
    /// Hard-class deadline passed but there was nothing queued to drop.
    HardNoop,
}

/// Check one stream against `now_us`, mutating its state and returning what
/// happened. Callers should queue a [`StreamDataDroppedFrame`] for
/// `HardDropped` outcomes and fire the deadline-missed callback for both
/// `HardDropped` and `SoftMissed`.
pub fn check_stream_expiry(stream: &mut StreamDeadlineState, now_us: u64) -> ExpiryOutcome {
    if !stream.enabled || now_us < stream.absolute_deadline_us {
        return ExpiryOutcome::NotExpired;
    }

    match stream.class {
        DeadlineClass::Soft => {
            stream.deadlines_missed += 1;
            stream.enabled = false;
            ExpiryOutcome::SoftMissed
        }
        DeadlineClass::Hard => {
            stream.deadlines_missed += 1;
            stream.enabled = false;
            match stream.drop_unsent_tail() {
                Some((offset, end)) => {
                    stream.finished = true;
                    ExpiryOutcome::HardDropped {
                        offset,
                        length: end - offset,
                    }
                }
                None => {
                    stream.finished = true;
                    ExpiryOutcome::HardNoop
                }
            }
        }
    }
}

/// Build the wire frame for a [`ExpiryOutcome::HardDropped`] result.
pub fn dropped_frame(stream_id: u64, offset: u64, length: u64) -> StreamDataDroppedFrame {
    use crate::wire::VarInt;
    StreamDataDroppedFrame {
        stream_id: VarInt::from_u64(stream_id),
        offset: VarInt::from_u64(offset),
        length: VarInt::from_u64(length),
    }
}

/// Scan every stream in `streams`, applying expiry and returning the frames
/// that must be sent to the peer as a result. Streams already finished are
/// skipped.
pub fn run_expiry_pass<'a>(
    streams: impl Iterator<Item = &'a mut StreamDeadlineState>,
    now_us: u64,
) -> Vec<(u64, ExpiryOutcome)> {
    let mut results = Vec::new();
    for stream in streams {
        if stream.finished {
            continue;
        }
        let outcome = check_stream_expiry(stream, now_us);
        if outcome != ExpiryOutcome::NotExpired {
            results.push((stream.stream_id, outcome));
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn hard_stream() -> StreamDeadlineState {
        StreamDeadlineState::new(4, 20, DeadlineClass::Hard, 0)
    }

    fn soft_stream() -> StreamDeadlineState {
        StreamDeadlineState::new(8, 20, DeadlineClass::Soft, 0)
    }

    #[test]
    fn not_expired_before_deadline() {
        let mut s = hard_stream();
        assert_eq!(check_stream_expiry(&mut s, 10_000), ExpiryOutcome::NotExpired);
    }

    #[test]
    fn hard_expiry_drops_queued_bytes() {
        let mut s = hard_stream();
        s.enqueue(Bytes::from(vec![0u8; 1000]), None, 0);
        let outcome = check_stream_expiry(&mut s, 20_000);
        assert_eq!(
            outcome,
            ExpiryOutcome::HardDropped {
                offset: 0,
                length: 1000
            }
        );
        assert!(s.finished);
        assert!(!s.enabled);
    }

    #[test]
    fn hard_expiry_with_empty_queue_is_noop() {
        let mut s = hard_stream();
        let outcome = check_stream_expiry(&mut s, 20_000);
        assert_eq!(outcome, ExpiryOutcome::HardNoop);
        assert!(s.finished);
    }

    #[test]
    fn soft_expiry_never_drops() {
        let mut s = soft_stream();
        s.enqueue(Bytes::from(vec![0u8; 1000]), None, 0);
        let outcome = check_stream_expiry(&mut s, 20_000);
        assert_eq!(outcome, ExpiryOutcome::SoftMissed);
        assert!(!s.finished);
        assert!(s.has_unsent());
    }

    #[test]
    fn already_fired_stream_does_not_refire() {
        let mut s = hard_stream();
        s.enqueue(Bytes::from(vec![0u8; 10]), None, 0);
        assert_ne!(check_stream_expiry(&mut s, 20_000), ExpiryOutcome::NotExpired);
        // enabled is now false; a second pass (even post-deadline) must be a no-op
        assert_eq!(check_stream_expiry(&mut s, 30_000), ExpiryOutcome::NotExpired);
    }

    #[test]
    fn near_chunk_deadline_does_not_drop_stream_with_future_absolute_deadline() {
        let mut s = hard_stream();
        s.set_deadline(20_000, 0);
        s.enqueue(Bytes::from(vec![0u8; 10]), Some(5_000), 0);
        let outcome = check_stream_expiry(&mut s, 10_000);
        assert_eq!(outcome, ExpiryOutcome::NotExpired);
        assert!(s.has_unsent());
        assert!(!s.finished);
    }

    #[test]
    fn run_expiry_pass_skips_finished_streams() {
        let mut s1 = hard_stream();
        s1.finished = true;
        let mut s2 = soft_stream();
        s2.enqueue(Bytes::from_static(b"x"), None, 0);
        let mut streams = vec![s1, s2];
        let results = run_expiry_pass(streams.iter_mut(), 20_000);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 8);
    }
}
