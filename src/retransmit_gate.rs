//! # Retransmission Gate (C9)
//!
//! Sits between the NACK-driven [`crate::arq::RetransmitTracker`] and the
//! actual resend: before honouring a retransmit request for a packet that
//! carries deadline data, checks whether the packet's earliest deadline has
//! already passed. A retransmission that cannot possibly arrive in time is
//! wasted bandwidth better spent on something that can still make its
//! deadline, so the gate turns it into a drop instead.

use crate::pool::{PacketContext, PacketHandle, PacketPool};
use crate::stream::DeadlineClass;

/// What the gate decided to do with a single retransmit-pending packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Still worth resending.
    Retransmit,
    /// The packet's deadline has passed; drop it and notify the stream.
    DropExpired {
        stream_id: u64,
        offset: u64,
        length: u64,
    },
}

/// Decide the fate of one retransmit-pending packet. Only hard-class
/// deadline data is ever suppressed — soft-class streams never drop bytes,
/// so their lost packets past the deadline are retransmitted like any other.
pub fn gate_retransmit(ctx: &PacketContext, payload_len: u64, now_us: u64) -> GateDecision {
    if ctx.contains_deadline_data && ctx.deadline_class == Some(DeadlineClass::Hard) {
        if let (Some(deadline_us), Some(stream_id), Some(offset)) =
            (ctx.earliest_deadline_us, ctx.stream_id, ctx.stream_offset)
        {
            if now_us >= deadline_us {
                return GateDecision::DropExpired {
                    stream_id,
                    offset,
                    length: payload_len,
                };
            }
        }
    }
    GateDecision::Retransmit
}

/// Drain `seqs` (as produced by `RetransmitTracker::drain_pending`), look
/// each one up in `pool`, and gate it. Sequences no longer present in the
/// pool (already purged after ACK) are silently skipped — nothing to
/// retransmit or drop.
pub fn process_retransmits(
    seqs: &[u64],
    pool: &PacketPool,
    now_us: u64,
) -> Vec<(PacketHandle, GateDecision)> {
    let mut decisions = Vec::with_capacity(seqs.len());
    for &seq in seqs {
        if let Some((handle, entry)) = pool.iter().find(|(_, e)| e.context.sequence == seq) {
            let decision = gate_retransmit(&entry.context, entry.payload.len() as u64, now_us);
            decisions.push((handle, decision));
        }
    }
    decisions
}
