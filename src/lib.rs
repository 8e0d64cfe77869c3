//! # deadline-streams
//!
//! A QUIC transport extension giving streams (and individual chunks within
//! them) delivery deadlines that drive scheduling, retransmission, path
//! selection, and partial-reliability drops. Composable components meant to
//! be driven by a host QUIC connection — not a standalone transport.
//!
//! Custom wire format with QUIC-style VarInt sequence numbers, NACK-based
//! ARQ, Biscay-derived congestion control with deadline-urgency adaptation,
//! and an EDF scheduler with anti-starvation fairness.
//!
//! ## Crate structure
//!
//! - [`wire`] — Packet header serialization, control packets, VarInt
//! - [`errors`] — Typed error kinds
//! - [`intervals`] — Sparse disjoint byte-range set
//! - [`stream`] — Per-stream deadline state and send queue
//! - [`connection`] — Connection-wide negotiation and fairness accounting
//! - [`pool`] — Slab-based packet buffer pool with deadline metadata
//! - [`expiry`] — Stream-deadline expiry checker
//! - [`scheduler`] — Earliest-deadline-first stream scheduler
//! - [`skipper`] — Per-chunk send-queue expiry
//! - [`gap`] — Receive-side dropped-range surfacing
//! - [`retransmit_gate`] — Deadline-aware retransmission filter
//! - [`multipath`] — Composite path selection
//! - [`path`] — Per-path RTT tracking
//! - [`arq`] — NACK-based loss detection and retransmission
//! - [`congestion`] — Biscay congestion control with urgency adaptation
//! - [`stats`] — Per-link and aggregate statistics
//! - [`sender`] — Sender orchestrator
//! - [`receiver`] — Receiver orchestrator

pub mod arq;
pub mod congestion;
pub mod connection;
pub mod errors;
pub mod expiry;
pub mod gap;
pub mod intervals;
pub mod multipath;
pub mod path;
pub mod pool;
pub mod receiver;
pub mod retransmit_gate;
pub mod scheduler;
pub mod sender;
pub mod skipper;
pub mod stats;
pub mod stream;
pub mod wire;
