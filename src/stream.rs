//! # Per-Stream Deadline State
//!
//! Deadline bookkeeping attached to a single application stream, created on
//! demand the first time the application or the peer sets a deadline on it.

use bytes::Bytes;

use crate::intervals::ByteIntervalSet;

/// Reserved stream IDs that may never carry a deadline.
pub const MIN_DEADLINE_STREAM_ID: u64 = 4;

/// Deadline class: governs whether expiry drops bytes or merely deprioritises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineClass {
    /// Unsent bytes are dropped on expiry and the peer is told.
    Hard,
    /// Expiry only lowers scheduling priority; bytes are never dropped.
    Soft,
}

/// A single queued unit of stream data awaiting transmission.
///
/// Chunks are consumed strictly head-first; `offset` is the chunk's starting
/// byte offset in the stream, computed once from the stream's running
/// enqueue cursor.
#[derive(Debug, Clone)]
pub struct QueuedChunk {
    /// Starting offset of this chunk within the stream's byte space.
    pub offset: u64,
    /// Remaining payload. Shrinks in place when the skipper trims a prefix.
    pub data: Bytes,
    /// When this chunk was enqueued (host monotonic clock, µs).
    pub enqueue_time_us: u64,
    /// Optional per-chunk deadline; older chunks expire independently.
    pub chunk_deadline_us: Option<u64>,
}

impl QueuedChunk {
    /// Exclusive end offset of the chunk as currently sized.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Trim `n` bytes off the front of the chunk, advancing its offset.
    pub fn trim_prefix(&mut self, n: u64) {
        let n = n.min(self.data.len() as u64) as usize;
        self.data = self.data.slice(n..);
        self.offset += n as u64;
    }
}

/// Per-stream deadline state (C2). Owned exclusively by the stream.
#[derive(Debug, Clone)]
pub struct StreamDeadlineState {
    pub stream_id: u64,
    /// Relative deadline in milliseconds as last set.
    pub deadline_ms: u64,
    /// Absolute monotonic microsecond instant by which data should be delivered.
    pub absolute_deadline_us: u64,
    pub class: DeadlineClass,
    /// True until the deadline has fired (expired or been acted on once).
    pub enabled: bool,
    /// Stream offsets the sender gave up transmitting.
    pub sender_dropped: ByteIntervalSet,
    /// Stream offsets the peer told us it dropped.
    pub receiver_dropped: ByteIntervalSet,
    pub bytes_dropped: u64,
    pub deadlines_missed: u64,
    /// Running offset of the next byte the application will enqueue.
    pub enqueue_cursor: u64,
    /// Running offset of the next byte that has been handed to the wire.
    pub sent_offset: u64,
    /// Queued, not-yet-serialised chunks, strictly in offset order.
    pub send_queue: std::collections::VecDeque<QueuedChunk>,
    /// Last time (µs) this stream was picked by the scheduler; drives
    /// round-robin within a proximity group and FIFO fallback.
    pub last_time_data_sent_us: u64,
    /// Whether this stream has been marked locally finished (post hard drop).
    pub finished: bool,
    /// Optional path affinity when multipath scheduling is active.
    pub path_affinity: Option<u8>,
    pub reset_requested: bool,
    pub stop_sending_requested: bool,
}

impl StreamDeadlineState {
    pub fn new(stream_id: u64, deadline_ms: u64, class: DeadlineClass, now_us: u64) -> Self {
        StreamDeadlineState {
            stream_id,
            deadline_ms,
            absolute_deadline_us: now_us + deadline_ms * 1000,
            class,
            enabled: true,
            sender_dropped: ByteIntervalSet::new(),
            receiver_dropped: ByteIntervalSet::new(),
            bytes_dropped: 0,
            deadlines_missed: 0,
            enqueue_cursor: 0,
            sent_offset: 0,
            send_queue: std::collections::VecDeque::new(),
            last_time_data_sent_us: 0,
            finished: false,
            path_affinity: None,
            reset_requested: false,
            stop_sending_requested: false,
        }
    }

    /// Update the deadline atomically (per `set_stream_deadline` semantics:
    /// a new call replaces the current deadline, it does not stack).
    pub fn set_deadline(&mut self, deadline_ms: u64, now_us: u64) {
        self.deadline_ms = deadline_ms;
        self.absolute_deadline_us = now_us + deadline_ms * 1000;
        self.enabled = true;
    }

    /// Enqueue application bytes as a new chunk at the current cursor.
    pub fn enqueue(&mut self, data: Bytes, chunk_deadline_us: Option<u64>, now_us: u64) {
        let offset = self.enqueue_cursor;
        self.enqueue_cursor += data.len() as u64;
        self.send_queue.push_back(QueuedChunk {
            offset,
            data,
            enqueue_time_us: now_us,
            chunk_deadline_us,
        });
    }

    /// Whether the stream has unsent bytes queued.
    pub fn has_unsent(&self) -> bool {
        self.send_queue.iter().any(|c| !c.data.is_empty())
    }

    /// Earliest deadline across the stream and its head chunk, used by the
    /// scheduler's EDF ranking.
    pub fn effective_deadline_us(&self) -> u64 {
        match self.send_queue.front().and_then(|c| c.chunk_deadline_us) {
            Some(chunk_deadline) => chunk_deadline.min(self.absolute_deadline_us),
            None => self.absolute_deadline_us,
        }
    }

    /// Drop every queued byte from `sent_offset` to the end of the queue,
    /// recording a single interval. Returns the dropped range if non-empty.
    pub fn drop_unsent_tail(&mut self) -> Option<(u64, u64)> {
        let start = self.sent_offset;
        let end = self.send_queue.back().map(|c| c.end_offset()).unwrap_or(start);
        if end <= start {
            self.send_queue.clear();
            return None;
        }
        self.sender_dropped.insert(start, end);
        self.bytes_dropped += end - start;
        self.sent_offset = end;
        self.send_queue.clear();
        Some((start, end))
    }
}
