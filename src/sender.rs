//! # Sender Orchestrator
//!
//! Wires together the per-stream deadline state, the connection-wide
//! fairness/negotiation state, the EDF scheduler, the send-queue skipper, the
//! packet pool, and the retransmission gate into the single entry point the
//! host QUIC connection drives: enqueue application bytes, poll for what to
//! put on the wire next, and feed back ACKs/NACKs as they arrive.
//!
//! The sender does not itself serialize or transmit anything — it hands the
//! host a ready-to-write `OutputPacket` and lets the host's packet writer and
//! socket own the actual I/O, matching the packet pool's pre-existing split
//! between buffer ownership and wire I/O.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::arq::RetransmitTracker;
use crate::connection::{ConnectionDeadlineState, DeadlineMissedCallback};
use crate::errors::DeadlineError;
use crate::expiry::{self, ExpiryOutcome};
use crate::multipath::PathMetrics;
use crate::pool::{PacketContext, PacketHandle, PacketPool, SequenceGenerator, TimestampClock};
use crate::retransmit_gate::{self, GateDecision};
use crate::scheduler::{self, SchedCandidate};
use crate::skipper;
use crate::stats::SenderStats;
use crate::stream::{DeadlineClass, StreamDeadlineState, MIN_DEADLINE_STREAM_ID};
use crate::wire::{DeadlineControlFrame, PacketHeader, StreamDataDroppedFrame, VarInt};

/// Default packet pool size (see `pool.rs` sizing note: seconds of headroom
/// at typical bitrates with zero heap churn on the hot path).
pub const DEFAULT_POOL_CAPACITY: usize = 4096;
/// Default retry budget before a retransmit request is abandoned.
pub const DEFAULT_MAX_RETRIES: u8 = 5;

/// A control frame queued for reliable delivery, not yet serialized.
#[derive(Debug, Clone)]
pub enum ControlFrameOut {
    DeadlineControl(DeadlineControlFrame),
    StreamDataDropped(StreamDataDroppedFrame),
}

/// A data packet ready for the host to hand to its packet writer.
#[derive(Debug, Clone)]
pub struct OutputPacket {
    pub sequence: u64,
    pub header: PacketHeader,
    pub payload: Bytes,
    pub path_id: Option<u8>,
}

/// Tunables for a [`DeadlineSender`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub pool_capacity: usize,
    pub max_retries: u8,
    pub max_payload_size: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
            max_payload_size: crate::wire::MAX_PAYLOAD_LEN,
        }
    }
}

/// Sender-side deadline-aware-streams orchestrator.
pub struct DeadlineSender {
    config: SenderConfig,
    pub connection: ConnectionDeadlineState,
    streams: HashMap<u64, StreamDeadlineState>,
    seq_gen: SequenceGenerator,
    clock: TimestampClock,
    pool: PacketPool,
    retransmit: RetransmitTracker,
    seq_to_handle: HashMap<u64, PacketHandle>,
    pending_control: VecDeque<ControlFrameOut>,
    pub stats: SenderStats,
}

impl DeadlineSender {
    pub fn new(config: SenderConfig, now_us: u64) -> Self {
        DeadlineSender {
            pool: PacketPool::new(config.pool_capacity),
            retransmit: RetransmitTracker::new(config.max_retries),
            config,
            connection: ConnectionDeadlineState::new(now_us),
            streams: HashMap::new(),
            seq_gen: SequenceGenerator::new(),
            clock: TimestampClock::new(),
            seq_to_handle: HashMap::new(),
            pending_control: VecDeque::new(),
            stats: SenderStats::new(),
        }
    }

    /// Combine local/peer transport-parameter advertisement into negotiation.
    pub fn set_negotiated(&mut self, local_advertised: bool, peer_advertised: bool) {
        self.connection.set_negotiated(local_advertised, peer_advertised);
        tracing::debug!(
            local_advertised,
            peer_advertised,
            negotiated = self.connection.negotiated,
            "deadline-aware-streams negotiation updated"
        );
    }

    pub fn set_fairness_params(
        &mut self,
        min_non_deadline_share: f64,
        max_starvation_us: u64,
    ) -> Result<(), DeadlineError> {
        self.connection
            .set_fairness_params(min_non_deadline_share, max_starvation_us)
    }

    pub fn register_deadline_missed_callback(&mut self, cb: DeadlineMissedCallback) {
        self.connection.register_deadline_missed_callback(cb);
    }

    pub fn update_path(&mut self, path_id: u8, metrics: PathMetrics) {
        self.connection.update_path(path_id, metrics);
    }

    pub fn remove_path(&mut self, path_id: u8) {
        self.connection.remove_path(path_id);
    }

    /// Set (or replace) a stream's deadline, creating its state on first use.
    /// Queues a `DEADLINE_CONTROL` frame for reliable delivery to the peer.
    pub fn set_stream_deadline(
        &mut self,
        stream_id: u64,
        deadline_ms: u64,
        class: DeadlineClass,
        now_us: u64,
    ) -> Result<(), DeadlineError> {
        if stream_id < MIN_DEADLINE_STREAM_ID {
            return Err(DeadlineError::InvalidStreamId(stream_id));
        }
        self.streams
            .entry(stream_id)
            .and_modify(|s| s.set_deadline(deadline_ms, now_us))
            .or_insert_with(|| StreamDeadlineState::new(stream_id, deadline_ms, class, now_us));

        self.pending_control
            .push_back(ControlFrameOut::DeadlineControl(DeadlineControlFrame {
                stream_id: VarInt::from_u64(stream_id),
                deadline_ms: VarInt::from_u64(deadline_ms),
            }));
        Ok(())
    }

    /// Enqueue application bytes on a stream. The stream need not already
    /// have a deadline set — streams with none are scheduled FIFO.
    pub fn enqueue(
        &mut self,
        stream_id: u64,
        data: Bytes,
        chunk_deadline_us: Option<u64>,
        now_us: u64,
    ) {
        let stream = self
            .streams
            .entry(stream_id)
            .or_insert_with(|| StreamDeadlineState::new(stream_id, 0, DeadlineClass::Soft, now_us));
        stream.enqueue(data, chunk_deadline_us, now_us);
    }

    /// Run the deadline-expiry pass and the send-queue skipper over every
    /// stream, queuing the `STREAM_DATA_DROPPED` frames produced and firing
    /// the missed-deadline callback for each affected stream.
    pub fn run_expiry_and_skip(&mut self, now_us: u64) {
        let outcomes = expiry::run_expiry_pass(self.streams.values_mut(), now_us);
        for (stream_id, outcome) in outcomes {
            self.stats.deadlines_missed += 1;
            self.connection.fire_deadline_missed(stream_id);
            if let ExpiryOutcome::HardDropped { offset, length } = outcome {
                self.stats.deadline_bytes_dropped += length;
                tracing::warn!(stream_id, offset, length, "hard deadline expired, dropping unsent bytes");
                self.pending_control
                    .push_back(ControlFrameOut::StreamDataDropped(expiry::dropped_frame(
                        stream_id, offset, length,
                    )));
            }
        }

        for stream in self.streams.values_mut() {
            let dropped = skipper::skip_expired_chunks(stream, now_us);
            for (start, end) in dropped {
                self.stats.deadline_bytes_dropped += end - start;
                self.pending_control
                    .push_back(ControlFrameOut::StreamDataDropped(expiry::dropped_frame(
                        stream.stream_id,
                        start,
                        end - start,
                    )));
            }
        }
    }

    /// Pop the next pending reliable control frame, if any.
    pub fn poll_control_frame(&mut self) -> Option<ControlFrameOut> {
        self.pending_control.pop_front()
    }

    /// Pick the next stream via EDF (with fairness override) and pop its
    /// head chunk as a ready-to-send packet. Returns `None` if nothing is
    /// ready to send this round.
    pub fn poll_data_packet(&mut self, now_us: u64) -> Option<OutputPacket> {
        let force_non_deadline = self.connection.should_force_non_deadline(now_us);

        let (stream_id, offset, take, payload, chunk_deadline_us) = loop {
            let candidates: Vec<SchedCandidate> = self
                .streams
                .values()
                .filter(|s| !s.finished && s.has_unsent())
                .map(|s| {
                    if s.deadline_ms > 0 {
                        SchedCandidate::from_deadline_stream(s)
                    } else {
                        SchedCandidate::non_deadline(s.stream_id, s.last_time_data_sent_us, true)
                    }
                })
                .collect();

            let stream_id = scheduler::pick_next(&candidates, force_non_deadline)?;
            let stream = self.streams.get_mut(&stream_id)?;

            // Per-chunk expiry guard: a hard-class stream's head chunk may
            // have gone stale since it was last considered by the scheduler.
            // Drop it here rather than hand expired bytes to the wire, and
            // retry selection if the stream is left with nothing to send.
            let dropped = skipper::skip_expired_chunks(stream, now_us);
            for (start, end) in dropped {
                self.stats.deadline_bytes_dropped += end - start;
                self.pending_control
                    .push_back(ControlFrameOut::StreamDataDropped(expiry::dropped_frame(
                        stream_id,
                        start,
                        end - start,
                    )));
            }
            if !stream.has_unsent() {
                continue;
            }

            let chunk = stream.send_queue.front_mut().unwrap();
            let take = chunk.data.len().min(self.config.max_payload_size);
            let payload = chunk.data.slice(0..take);
            let offset = chunk.offset;
            let chunk_deadline_us = chunk.chunk_deadline_us;
            chunk.trim_prefix(take as u64);
            if chunk.data.is_empty() {
                stream.send_queue.pop_front();
            }
            if stream.sent_offset < offset + take as u64 {
                stream.sent_offset = offset + take as u64;
            }

            break (stream_id, offset, take, payload, chunk_deadline_us);
        };

        let stream = self.streams.get_mut(&stream_id)?;
        let has_stream_deadline = stream.deadline_ms > 0;
        let deadline_class = stream.class;
        let earliest_deadline_us = chunk_deadline_us
            .map(|d| d.min(stream.absolute_deadline_us))
            .or(if has_stream_deadline {
                Some(stream.absolute_deadline_us)
            } else {
                None
            });

        let sequence = self.seq_gen.next();
        let timestamp_us = self.clock.now_us();
        stream.last_time_data_sent_us = now_us;
        let remaining = stream.enqueue_cursor.saturating_sub(stream.sent_offset).max(take as u64);

        let path_id = earliest_deadline_us.and_then(|deadline| {
            crate::multipath::select_path(
                self.connection.paths().map(|(_, m)| m),
                remaining,
                deadline,
                now_us,
            )
        });

        let mut ctx = PacketContext::new(sequence, timestamp_us);
        let mut header = PacketHeader::data(sequence, timestamp_us, payload.len() as u16);
        if let Some(deadline) = earliest_deadline_us {
            ctx = ctx.with_deadline(stream_id, offset, deadline, deadline_class);
            header = header.with_deadline_data();
        }

        self.connection
            .record_bytes_sent(now_us, earliest_deadline_us.is_some(), payload.len() as u64);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += payload.len() as u64;

        if let Some(handle) = self.pool.insert(ctx, payload.clone()) {
            self.seq_to_handle.insert(sequence, handle);
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(sequence, stream_id, ?path_id, "packet scheduled");
        }

        Some(OutputPacket {
            sequence,
            header,
            payload,
            path_id,
        })
    }

    /// Process an incoming cumulative/SACK acknowledgment.
    pub fn process_ack(&mut self, cumulative_seq: u64, sacked: impl Iterator<Item = u64>) {
        self.retransmit.cleanup_below(cumulative_seq);
        for seq in std::iter::once(cumulative_seq).chain(sacked) {
            self.retransmit.mark_acked(seq);
            if let Some(handle) = self.seq_to_handle.remove(&seq) {
                self.pool.mark_acked(handle);
            }
            self.stats.packets_acked += 1;
        }
        self.pool.purge_acked();
    }

    /// Process a NACK, requesting retransmission and running the expired
    /// requests through the retransmission gate. Returns packets the host
    /// should resend; deadline-expired ones are dropped instead and queue a
    /// `STREAM_DATA_DROPPED` frame.
    pub fn process_nack(&mut self, missing_seqs: &[u64], now_us: u64) -> Vec<OutputPacket> {
        for &seq in missing_seqs {
            self.retransmit.request_retransmit(seq);
        }
        let pending = self.retransmit.drain_pending();
        let decisions = retransmit_gate::process_retransmits(&pending, &self.pool, now_us);

        let mut resends = Vec::new();
        for (handle, decision) in decisions {
            match decision {
                GateDecision::Retransmit => {
                    if let Some(entry) = self.pool.get(handle) {
                        self.stats.retransmissions += 1;
                        resends.push(OutputPacket {
                            sequence: entry.context.sequence,
                            header: PacketHeader::data(
                                entry.context.sequence,
                                self.clock.now_us(),
                                entry.payload.len() as u16,
                            )
                            .with_deadline_data_if(entry.context.contains_deadline_data),
                            payload: entry.payload.clone(),
                            path_id: None,
                        });
                    }
                }
                GateDecision::DropExpired {
                    stream_id,
                    offset,
                    length,
                } => {
                    self.stats.gated_retransmits_dropped += 1;
                    self.stats.deadline_bytes_dropped += length;
                    self.pool.remove(handle);
                    self.pending_control
                        .push_back(ControlFrameOut::StreamDataDropped(expiry::dropped_frame(
                            stream_id, offset, length,
                        )));
                }
            }
        }
        resends
    }

    pub fn stream(&self, stream_id: u64) -> Option<&StreamDeadlineState> {
        self.streams.get(&stream_id)
    }
}

trait HeaderDeadlineExt {
    fn with_deadline_data_if(self, cond: bool) -> Self;
}

impl HeaderDeadlineExt for PacketHeader {
    fn with_deadline_data_if(self, cond: bool) -> Self {
        if cond {
            self.with_deadline_data()
        } else {
            self
        }
    }
}
