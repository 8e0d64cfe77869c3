//! # Receive-Side Gap Surfacer (C8)
//!
//! The base QUIC stream state machine (an external collaborator) already
//! reassembles and delivers contiguous in-order bytes per stream; this
//! module exists only to tell it — and the application — when a byte range
//! will *never* arrive because the remote sender dropped it, so delivery
//! can skip past the gap instead of stalling on a retransmission that will
//! never come.
//!
//! A `STREAM_DATA_DROPPED` frame can name a range that straddles data
//! already consumed (the drop notification can race the last bytes before
//! the boundary); only the unconsumed suffix is a real gap, so the range is
//! split at `consumed_offset` before being surfaced.

use crate::intervals::ByteIntervalSet;

/// Receive-side bookkeeping for a single stream's dropped ranges.
#[derive(Debug, Clone)]
pub struct StreamGapState {
    pub stream_id: u64,
    /// Offset up to which the application has consumed contiguous bytes.
    pub consumed_offset: u64,
    /// Ranges the remote sender told us it dropped, as reported.
    dropped: ByteIntervalSet,
    /// Ranges already surfaced to the application, so a gap is reported once.
    surfaced: ByteIntervalSet,
}

impl StreamGapState {
    pub fn new(stream_id: u64) -> Self {
        StreamGapState {
            stream_id,
            consumed_offset: 0,
            dropped: ByteIntervalSet::new(),
            surfaced: ByteIntervalSet::new(),
        }
    }

    /// Record a `STREAM_DATA_DROPPED { offset, length }` frame from the peer.
    pub fn record_dropped_range(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        self.dropped.insert(offset, offset + length);
    }

    /// Advance the consumed offset as the host delivers contiguous bytes.
    pub fn advance_consumed(&mut self, new_offset: u64) {
        if new_offset > self.consumed_offset {
            self.consumed_offset = new_offset;
        }
    }

    /// The next unsurfaced gap at or beyond `consumed_offset`, split to its
    /// unconsumed suffix if it straddles the consumed boundary. Returns
    /// `None` if there is no pending gap to report.
    pub fn next_gap(&self) -> Option<(u64, u64)> {
        let (start, end) = self
            .dropped
            .iter()
            .find(|&(_, e)| e > self.consumed_offset)?;
        let effective_start = start.max(self.consumed_offset);
        if effective_start >= end {
            return None;
        }
        if self.surfaced.contains(effective_start) {
            return None;
        }
        Some((effective_start, end))
    }

    /// Mark a gap as surfaced to the application and skip the consumed
    /// cursor past it, so the host can resume delivery from `end`.
    pub fn resolve_gap(&mut self, start: u64, end: u64) {
        self.surfaced.insert(start, end);
        if self.consumed_offset < end {
            self.consumed_offset = end;
        }
    }

    /// Total bytes across all dropped ranges recorded for this stream.
    pub fn total_dropped_bytes(&self) -> u64 {
        self.dropped.total_len()
    }
}
