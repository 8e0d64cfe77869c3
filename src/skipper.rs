//! # Send-Queue Skipper (C7)
//!
//! Per-chunk deadline enforcement within a stream's send queue. Where
//! [`crate::expiry`] acts on the *stream's* deadline (dropping everything
//! from the current send offset onward), the skipper acts on *individual
//! chunk* deadlines: a long-lived stream can enqueue chunks with their own
//! nearer-term deadlines (e.g. one video frame per chunk), and only the
//! chunks that have gone stale should be discarded — chunks queued behind
//! them with a later deadline are still worth sending.
//!
//! This is the "more complete" resolution of mid-chunk splitting: a chunk
//! that straddles the skip boundary is trimmed rather than dropped whole,
//! so partially-useful data already eligible for transmission is preserved.

use crate::stream::{DeadlineClass, StreamDeadlineState};

/// Drop or trim chunks at the front of `stream`'s send queue whose own
/// `chunk_deadline_us` has passed `now_us`. Only applies to hard-class
/// streams; soft-class chunks are left in place (expiry only affects their
/// scheduling priority). Returns the byte ranges dropped, in order.
pub fn skip_expired_chunks(stream: &mut StreamDeadlineState, now_us: u64) -> Vec<(u64, u64)> {
    if stream.class != DeadlineClass::Hard {
        return Vec::new();
    }

    let mut dropped = Vec::new();

    while let Some(front) = stream.send_queue.front() {
        let expired = match front.chunk_deadline_us {
            Some(d) => now_us >= d,
            None => false,
        };
        if !expired {
            break;
        }
        let chunk = stream.send_queue.pop_front().unwrap();
        let start = chunk.offset;
        let end = chunk.end_offset();
        if end > start {
            stream.sender_dropped.insert(start, end);
            stream.bytes_dropped += end - start;
            dropped.push((start, end));
        }
        // The stream's contiguous send offset must track the skip: bytes
        // between the previous sent_offset and this chunk's end are now
        // either sent or dropped, never to be (re)transmitted.
        if stream.sent_offset < end {
            stream.sent_offset = end;
        }
    }

    dropped
}

/// Trim the unsent prefix of the *first remaining* chunk if its deadline
/// expires partway through being built up by the application (the chunk
/// itself spans a boundary where only a suffix is still worth sending).
/// `valid_from` is the offset at which data becomes worth keeping.
pub fn trim_stale_prefix(stream: &mut StreamDeadlineState, valid_from: u64) -> Option<(u64, u64)> {
    let front = stream.send_queue.front_mut()?;
    if valid_from <= front.offset || valid_from >= front.end_offset() {
        return None;
    }
    let drop_len = valid_from - front.offset;
    let start = front.offset;
    front.trim_prefix(drop_len);
    stream.sender_dropped.insert(start, valid_from);
    stream.bytes_dropped += drop_len;
    Some((start, valid_from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn hard_stream() -> StreamDeadlineState {
        StreamDeadlineState::new(4, 1000, DeadlineClass::Hard, 0)
    }

    #[test]
    fn skips_only_expired_head_chunks() {
        let mut s = hard_stream();
        s.enqueue(Bytes::from_static(b"stale1"), Some(10_000), 0);
        s.enqueue(Bytes::from_static(b"stale2"), Some(15_000), 0);
        s.enqueue(Bytes::from_static(b"fresh!"), Some(50_000), 0);

        let dropped = skip_expired_chunks(&mut s, 20_000);
        assert_eq!(dropped, vec![(0, 6), (6, 12)]);
        assert_eq!(s.send_queue.len(), 1);
        assert_eq!(s.send_queue.front().unwrap().offset, 12);
        assert_eq!(s.sent_offset, 12);
    }

    #[test]
    fn soft_streams_never_skip() {
        let mut s = StreamDeadlineState::new(4, 1000, DeadlineClass::Soft, 0);
        s.enqueue(Bytes::from_static(b"stale"), Some(5), 0);
        let dropped = skip_expired_chunks(&mut s, 100);
        assert!(dropped.is_empty());
        assert_eq!(s.send_queue.len(), 1);
    }

    #[test]
    fn no_expired_chunks_is_noop() {
        let mut s = hard_stream();
        s.enqueue(Bytes::from_static(b"fresh"), Some(50_000), 0);
        assert!(skip_expired_chunks(&mut s, 0).is_empty());
        assert_eq!(s.send_queue.len(), 1);
    }

    #[test]
    fn trim_stale_prefix_splits_head_chunk() {
        let mut s = hard_stream();
        s.enqueue(Bytes::from_static(b"abcdefgh"), None, 0);
        let dropped = trim_stale_prefix(&mut s, 3).unwrap();
        assert_eq!(dropped, (0, 3));
        let front = s.send_queue.front().unwrap();
        assert_eq!(front.offset, 3);
        assert_eq!(&front.data[..], b"defgh");
        assert_eq!(s.bytes_dropped, 3);
    }

    #[test]
    fn trim_stale_prefix_out_of_range_is_noop() {
        let mut s = hard_stream();
        s.enqueue(Bytes::from_static(b"abcdefgh"), None, 0);
        assert!(trim_stale_prefix(&mut s, 0).is_none());
        assert!(trim_stale_prefix(&mut s, 100).is_none());
    }
}
