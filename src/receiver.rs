//! # Receiver Orchestrator
//!
//! Mirrors [`crate::sender::DeadlineSender`] on the other endpoint: feeds
//! incoming sequence numbers to the loss detector, decodes the two
//! deadline-aware-streams control frames, and tracks per-stream dropped
//! ranges so the host's stream-delivery loop can skip a gap instead of
//! stalling on a retransmission that will never arrive.
//!
//! Reassembly of in-order bytes per stream and delivery to the application
//! remain the responsibility of the base QUIC stream state machine; this
//! module only tracks what is needed to make *deadline* semantics visible to
//! that machinery.

use std::collections::HashMap;

use bytes::Bytes;

use crate::arq::LossDetector;
use crate::errors::DeadlineError;
use crate::gap::StreamGapState;
use crate::stats::ReceiverStats;
use crate::wire::{AckPacket, ControlBody, NackPacket, Packet, PacketType, VarInt};

/// What happened while processing one incoming packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// A data packet arrived; hand `payload` to the stream reassembler.
    Data {
        sequence: u64,
        payload: Bytes,
        is_deadline_data: bool,
    },
    /// The peer set (or replaced) a stream's deadline.
    DeadlineAdvertised { stream_id: u64, deadline_ms: u64 },
    /// The peer told us a byte range will never arrive.
    DataDropped {
        stream_id: u64,
        offset: u64,
        length: u64,
    },
}

/// Receiver-side deadline-aware-streams orchestrator.
pub struct DeadlineReceiver {
    negotiated: bool,
    loss: LossDetector,
    gaps: HashMap<u64, StreamGapState>,
    peer_deadlines_ms: HashMap<u64, u64>,
    pub stats: ReceiverStats,
}

impl DeadlineReceiver {
    pub fn new() -> Self {
        DeadlineReceiver {
            negotiated: false,
            loss: LossDetector::new(),
            gaps: HashMap::new(),
            peer_deadlines_ms: HashMap::new(),
            stats: ReceiverStats::new(),
        }
    }

    pub fn set_negotiated(&mut self, negotiated: bool) {
        self.negotiated = negotiated;
        tracing::debug!(negotiated, "deadline-aware-streams negotiation updated");
    }

    fn gap_state(&mut self, stream_id: u64) -> &mut StreamGapState {
        self.gaps
            .entry(stream_id)
            .or_insert_with(|| StreamGapState::new(stream_id))
    }

    /// Decode and process one raw wire packet. Data packets feed the loss
    /// detector and surface as [`ReceiveEvent::Data`]; ACK/NACK control
    /// packets are this side's own outgoing concern and are ignored here.
    pub fn on_packet(
        &mut self,
        pkt: Packet,
        now_us: u64,
    ) -> Result<Option<ReceiveEvent>, DeadlineError> {
        match pkt.header.packet_type {
            PacketType::Data => {
                let sequence = pkt.header.sequence.value();
                self.loss.record_received(sequence);
                self.stats.packets_received += 1;
                self.stats.bytes_received += pkt.payload.len() as u64;
                if sequence > self.stats.highest_delivered_seq {
                    self.stats.highest_delivered_seq = sequence;
                }
                Ok(Some(ReceiveEvent::Data {
                    sequence,
                    payload: pkt.payload,
                    is_deadline_data: pkt.header.is_deadline_data,
                }))
            }
            PacketType::Control => self.on_control_payload(&pkt.payload, now_us),
        }
    }

    fn on_control_payload(
        &mut self,
        payload: &Bytes,
        now_us: u64,
    ) -> Result<Option<ReceiveEvent>, DeadlineError> {
        let mut buf = payload.clone();
        match ControlBody::decode(&mut buf)? {
            None => Ok(None),
            Some(ControlBody::Ack(_)) | Some(ControlBody::Nack(_)) => Ok(None),
            Some(ControlBody::DeadlineControl(frame)) => {
                if !self.negotiated {
                    return Err(DeadlineError::FeatureNotNegotiated("DEADLINE_CONTROL"));
                }
                let stream_id = frame.stream_id.value();
                let deadline_ms = frame.deadline_ms.value();
                self.peer_deadlines_ms.insert(stream_id, deadline_ms);
                self.gap_state(stream_id);
                let _ = now_us;
                Ok(Some(ReceiveEvent::DeadlineAdvertised {
                    stream_id,
                    deadline_ms,
                }))
            }
            Some(ControlBody::StreamDataDropped(frame)) => {
                if !self.negotiated {
                    return Err(DeadlineError::FeatureNotNegotiated("STREAM_DATA_DROPPED"));
                }
                let stream_id = frame.stream_id.value();
                let offset = frame.offset.value();
                let length = frame.length.value();
                self.gap_state(stream_id).record_dropped_range(offset, length);
                self.stats.bytes_reported_dropped += length;
                Ok(Some(ReceiveEvent::DataDropped {
                    stream_id,
                    offset,
                    length,
                }))
            }
        }
    }

    /// Generate a NACK for currently-missing sequences, if any.
    pub fn generate_nack(&mut self) -> Option<NackPacket> {
        let nack = self.loss.generate_nacks();
        if nack.is_some() {
            self.stats.nacks_sent += 1;
        }
        nack
    }

    /// Build a cumulative ACK for the highest contiguous sequence received.
    pub fn ack_packet(&self) -> AckPacket {
        AckPacket {
            cumulative_seq: VarInt::from_u64(self.loss.highest_contiguous()),
            sack_bitmap: 0,
        }
    }

    /// The peer's last-advertised deadline (ms) for a stream, if any.
    pub fn peer_deadline_ms(&self, stream_id: u64) -> Option<u64> {
        self.peer_deadlines_ms.get(&stream_id).copied()
    }

    /// Advance the consumed cursor for a stream as the application delivers
    /// contiguous bytes, so gap reporting tracks actual consumption.
    pub fn advance_consumed(&mut self, stream_id: u64, new_offset: u64) {
        self.gap_state(stream_id).advance_consumed(new_offset);
    }

    /// The next unreported gap for a stream, if any.
    pub fn next_gap(&self, stream_id: u64) -> Option<(u64, u64)> {
        self.gaps.get(&stream_id).and_then(|g| g.next_gap())
    }

    /// Mark a gap as surfaced and skip delivery past it.
    pub fn resolve_gap(&mut self, stream_id: u64, start: u64, end: u64) {
        self.gap_state(stream_id).resolve_gap(start, end);
        self.stats.gaps_surfaced += 1;
    }
}

impl Default for DeadlineReceiver {
    fn default() -> Self {
        Self::new()
    }
}
