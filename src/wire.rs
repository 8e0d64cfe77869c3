//! # Wire Format
//!
//! QUIC-style variable-length integers (RFC 9000 §16), a lightweight packet
//! header, and the two deadline-aware-streams control frames:
//! `DEADLINE_CONTROL` and `STREAM_DATA_DROPPED`.
//!
//! ## Data Packet Header (variable 7-15 bytes)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=1|T| F |K|C|R|          Payload Length (16)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Sequence Number (VarInt, 1-8 bytes)         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Timestamp (32-bit, µs)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ## Control packets (T=1) carry a 1-byte subtype after the base header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::errors::DeadlineError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Minimum header size: 1 (flags) + 2 (payload len) + 1 (min varint) + 4 (timestamp) = 8.
pub const MIN_HEADER_SIZE: usize = 8;

/// Maximum header size: 1 + 2 + 8 + 4 = 15.
pub const MAX_HEADER_SIZE: usize = 15;

/// Maximum payload in a single packet (64 KiB - 1).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ─── VarInt (QUIC-style, RFC 9000 §16) ──────────────────────────────────────

/// A 62-bit variable-length integer encoded in 1, 2, 4, or 8 bytes.
///
/// Encoding:
/// - `0x00..0x3F` → 1 byte  (6 bits)
/// - `0x40..0x3FFF` → 2 bytes (14 bits), prefix `01`
/// - `0x4000..0x3FFF_FFFF` → 4 bytes (30 bits), prefix `10`
/// - `0x4000_0000..0x3FFF_FFFF_FFFF_FFFF` → 8 bytes (62 bits), prefix `11`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u64);

impl VarInt {
    /// Maximum representable value: 2^62 - 1.
    pub const MAX: u64 = (1 << 62) - 1;

    /// Create a VarInt, returning `None` if the value exceeds 62 bits.
    #[inline]
    pub fn new(val: u64) -> Option<Self> {
        if val <= Self::MAX {
            Some(VarInt(val))
        } else {
            None
        }
    }

    /// Create a VarInt from a u64, panicking if out of range.
    #[inline]
    pub fn from_u64(val: u64) -> Self {
        Self::new(val).expect("VarInt value exceeds 62-bit limit")
    }

    /// Get the underlying u64 value.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Number of bytes this value encodes to.
    #[inline]
    pub fn encoded_len(self) -> usize {
        if self.0 < 0x40 {
            1
        } else if self.0 < 0x4000 {
            2
        } else if self.0 < 0x4000_0000 {
            4
        } else {
            8
        }
    }

    /// Encode into a mutable buffer. Panics if insufficient space.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self.encoded_len() {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(0x4000 | self.0 as u16),
            4 => buf.put_u32(0x8000_0000 | self.0 as u32),
            8 => buf.put_u64(0xC000_0000_0000_0000 | self.0),
            _ => unreachable!(),
        }
    }

    /// Decode from a buffer. Returns `None` if buffer is too short or value is invalid.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }

        let first = buf.chunk()[0];
        let prefix = first >> 6;

        let len = 1usize << prefix;
        if buf.remaining() < len {
            return None;
        }

        let val = match len {
            1 => {
                buf.advance(1);
                (first & 0x3F) as u64
            }
            2 => {
                let raw = buf.get_u16();
                (raw & 0x3FFF) as u64
            }
            4 => {
                let raw = buf.get_u32();
                (raw & 0x3FFF_FFFF) as u64
            }
            8 => {
                let raw = buf.get_u64();
                raw & 0x3FFF_FFFF_FFFF_FFFF
            }
            _ => unreachable!(),
        };

        Some(VarInt(val))
    }
}

impl fmt::Debug for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarInt({})", self.0)
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for VarInt {
    fn from(v: u32) -> Self {
        VarInt(v as u64)
    }
}

impl From<u16> for VarInt {
    fn from(v: u16) -> Self {
        VarInt(v as u64)
    }
}

impl From<u8> for VarInt {
    fn from(v: u8) -> Self {
        VarInt(v as u64)
    }
}

// ─── Packet Type ─────────────────────────────────────────────────────────────

/// Whether the packet carries data or control information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Control = 1,
}

// ─── Fragment Flags ──────────────────────────────────────────────────────────

/// Fragmentation status of a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fragment {
    /// Complete packet (not fragmented).
    Complete = 0b00,
    /// First fragment.
    Start = 0b01,
    /// Middle fragment.
    Middle = 0b10,
    /// Last fragment.
    End = 0b11,
}

impl Fragment {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Fragment::Complete,
            0b01 => Fragment::Start,
            0b10 => Fragment::Middle,
            0b11 => Fragment::End,
            _ => unreachable!(),
        }
    }
}

// ─── Control Subtypes ────────────────────────────────────────────────────────

/// Control packet sub-types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlType {
    Ack = 0x01,
    Nack = 0x02,
    /// `DEADLINE_CONTROL`: informs the peer of a newly-set stream deadline.
    DeadlineControl = 0x03,
    /// `STREAM_DATA_DROPPED`: tells the peer a byte range will never arrive.
    StreamDataDropped = 0x04,
}

impl ControlType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(ControlType::Ack),
            0x02 => Some(ControlType::Nack),
            0x03 => Some(ControlType::DeadlineControl),
            0x04 => Some(ControlType::StreamDataDropped),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlType::Ack => "ACK",
            ControlType::Nack => "NACK",
            ControlType::DeadlineControl => "DEADLINE_CONTROL",
            ControlType::StreamDataDropped => "STREAM_DATA_DROPPED",
        }
    }
}

// ─── Packet Header ──────────────────────────────────────────────────────────

/// Decoded packet header — present on every packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version (must be 1).
    pub version: u8,
    /// Data or control packet.
    pub packet_type: PacketType,
    /// Fragment status (meaningful for data packets).
    pub fragment: Fragment,
    /// Whether this packet carries data subject to a deadline.
    pub is_deadline_data: bool,
    /// Whether this packet carries reliably-retransmitted control frames.
    pub is_control_reliable: bool,
    /// Payload length in bytes (after header).
    pub payload_len: u16,
    /// 62-bit sequence number.
    pub sequence: VarInt,
    /// Microsecond timestamp (wraps every ~71 min).
    pub timestamp_us: u32,
}

impl PacketHeader {
    /// Encode the header into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        // Flags byte: VV T FF D C R
        let flags: u8 = ((self.version & 0x03) << 6)
            | ((self.packet_type as u8) << 5)
            | ((self.fragment as u8) << 3)
            | ((self.is_deadline_data as u8) << 2)
            | ((self.is_control_reliable as u8) << 1);
        buf.put_u8(flags);

        // Payload length (16-bit big endian)
        buf.put_u16(self.payload_len);

        // Sequence number (VarInt)
        self.sequence.encode(buf);

        // Timestamp (32-bit µs)
        buf.put_u32(self.timestamp_us);
    }

    /// Decode a header from a buffer. Returns `None` if buffer is too short or invalid.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < MIN_HEADER_SIZE {
            return None;
        }

        let flags = buf.get_u8();
        let version = (flags >> 6) & 0x03;
        if version != PROTOCOL_VERSION {
            return None;
        }

        let packet_type = if (flags >> 5) & 1 == 1 {
            PacketType::Control
        } else {
            PacketType::Data
        };
        let fragment = Fragment::from_bits((flags >> 3) & 0x03);
        let is_deadline_data = (flags >> 2) & 1 == 1;
        let is_control_reliable = (flags >> 1) & 1 == 1;

        let payload_len = buf.get_u16();
        let sequence = VarInt::decode(buf)?;
        if buf.remaining() < 4 {
            return None;
        }
        let timestamp_us = buf.get_u32();

        Some(PacketHeader {
            version,
            packet_type,
            fragment,
            is_deadline_data,
            is_control_reliable,
            payload_len,
            sequence,
            timestamp_us,
        })
    }

    /// Total encoded size of this header.
    pub fn encoded_len(&self) -> usize {
        1 + 2 + self.sequence.encoded_len() + 4
    }

    /// Create a new data packet header.
    pub fn data(sequence: u64, timestamp_us: u32, payload_len: u16) -> Self {
        PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Data,
            fragment: Fragment::Complete,
            is_deadline_data: false,
            is_control_reliable: false,
            payload_len,
            sequence: VarInt::from_u64(sequence),
            timestamp_us,
        }
    }

    /// Create a new control packet header.
    pub fn control(sequence: u64, timestamp_us: u32, payload_len: u16) -> Self {
        PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Control,
            fragment: Fragment::Complete,
            is_deadline_data: false,
            is_control_reliable: false,
            payload_len,
            sequence: VarInt::from_u64(sequence),
            timestamp_us,
        }
    }

    /// Mark this packet as carrying deadline-governed stream data.
    pub fn with_deadline_data(mut self) -> Self {
        self.is_deadline_data = true;
        self
    }

    /// Mark this packet as carrying a reliably-retransmitted control frame.
    pub fn with_control_reliable(mut self) -> Self {
        self.is_control_reliable = true;
        self
    }

    /// Set fragmentation.
    pub fn with_fragment(mut self, frag: Fragment) -> Self {
        self.fragment = frag;
        self
    }
}

// ─── Control Packet Bodies ──────────────────────────────────────────────────

/// ACK packet: cumulative acknowledgment + selective ACK bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    /// Highest contiguously received sequence number.
    pub cumulative_seq: VarInt,
    /// Bitmap of received packets beyond cumulative_seq (up to 64 bits).
    /// Bit 0 = cumulative_seq + 1, Bit 1 = cumulative_seq + 2, etc.
    pub sack_bitmap: u64,
}

impl AckPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ControlType::Ack as u8);
        self.cumulative_seq.encode(buf);
        buf.put_u64(self.sack_bitmap);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        let cumulative_seq = VarInt::decode(buf)?;
        if buf.remaining() < 8 {
            return None;
        }
        let sack_bitmap = buf.get_u64();
        Some(AckPacket {
            cumulative_seq,
            sack_bitmap,
        })
    }

    /// Iterate the specific sequence numbers acknowledged by the SACK bitmap.
    pub fn sacked_sequences(&self) -> impl Iterator<Item = u64> + '_ {
        (0..64).filter_map(move |i| {
            if self.sack_bitmap & (1u64 << i) != 0 {
                Some(self.cumulative_seq.value() + 1 + i)
            } else {
                None
            }
        })
    }
}

/// NACK packet: range-based loss report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackPacket {
    /// List of (start_seq, count) ranges of missing packets.
    pub ranges: Vec<NackRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRange {
    pub start: VarInt,
    pub count: VarInt,
}

impl NackPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ControlType::Nack as u8);
        VarInt::from_u64(self.ranges.len() as u64).encode(buf);
        for range in &self.ranges {
            range.start.encode(buf);
            range.count.encode(buf);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        let num_ranges = VarInt::decode(buf)?.value() as usize;
        if num_ranges > 256 {
            return None; // sanity limit
        }
        let mut ranges = Vec::with_capacity(num_ranges);
        for _ in 0..num_ranges {
            let start = VarInt::decode(buf)?;
            let count = VarInt::decode(buf)?;
            ranges.push(NackRange { start, count });
        }
        Some(NackPacket { ranges })
    }
}

/// `DEADLINE_CONTROL { stream_id: varint, deadline_ms: varint }` — informs the
/// peer of a newly-set stream deadline. Queued the first time a stream
/// receives a deadline and reliably retransmitted until acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineControlFrame {
    pub stream_id: VarInt,
    pub deadline_ms: VarInt,
}

impl DeadlineControlFrame {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ControlType::DeadlineControl as u8);
        self.stream_id.encode(buf);
        self.deadline_ms.encode(buf);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, DeadlineError> {
        let stream_id = VarInt::decode(buf)
            .ok_or(DeadlineError::FrameFormat("DEADLINE_CONTROL"))?;
        let deadline_ms = VarInt::decode(buf)
            .ok_or(DeadlineError::FrameFormat("DEADLINE_CONTROL"))?;
        Ok(DeadlineControlFrame {
            stream_id,
            deadline_ms,
        })
    }
}

/// `STREAM_DATA_DROPPED { stream_id: varint, offset: varint, length: varint }`
/// — tells the peer a contiguous byte range of this stream will never
/// arrive. Sent by the side that dropped the bytes, reliably retransmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDataDroppedFrame {
    pub stream_id: VarInt,
    pub offset: VarInt,
    pub length: VarInt,
}

impl StreamDataDroppedFrame {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ControlType::StreamDataDropped as u8);
        self.stream_id.encode(buf);
        self.offset.encode(buf);
        self.length.encode(buf);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, DeadlineError> {
        let stream_id = VarInt::decode(buf)
            .ok_or(DeadlineError::FrameFormat("STREAM_DATA_DROPPED"))?;
        let offset = VarInt::decode(buf)
            .ok_or(DeadlineError::FrameFormat("STREAM_DATA_DROPPED"))?;
        let length = VarInt::decode(buf)
            .ok_or(DeadlineError::FrameFormat("STREAM_DATA_DROPPED"))?;
        Ok(StreamDataDroppedFrame {
            stream_id,
            offset,
            length,
        })
    }
}

// ─── Full Packet Serialization ──────────────────────────────────────────────

/// A fully serialized packet (header + payload).
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    /// Serialize the entire packet (header + payload) into a new `BytesMut`.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.header.encoded_len() + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a complete packet from raw bytes.
    pub fn decode(data: &mut impl Buf) -> Option<Self> {
        let header = PacketHeader::decode(data)?;
        let payload_len = header.payload_len as usize;
        if data.remaining() < payload_len {
            return None;
        }
        let payload = data.copy_to_bytes(payload_len);
        Some(Packet { header, payload })
    }

    /// Create a new data packet.
    pub fn new_data(sequence: u64, timestamp_us: u32, payload: Bytes) -> Self {
        Packet {
            header: PacketHeader::data(sequence, timestamp_us, payload.len() as u16),
            payload,
        }
    }
}

// ─── Decoded Control Packet ─────────────────────────────────────────────────

/// A decoded control packet with its typed body.
#[derive(Debug, Clone)]
pub enum ControlBody {
    Ack(AckPacket),
    Nack(NackPacket),
    DeadlineControl(DeadlineControlFrame),
    StreamDataDropped(StreamDataDroppedFrame),
}

impl ControlBody {
    /// Decode a control body from a buffer. The first byte is the subtype.
    ///
    /// Returns `Ok(None)` only if the buffer is empty or carries an unknown
    /// subtype byte (treated as "not ours"); a recognised subtype that fails
    /// to parse its own fields is a `DeadlineError::FrameFormat`.
    pub fn decode(buf: &mut impl Buf) -> Result<Option<Self>, DeadlineError> {
        if !buf.has_remaining() {
            return Ok(None);
        }
        let subtype = buf.get_u8();
        let ct = match ControlType::from_byte(subtype) {
            Some(ct) => ct,
            None => return Ok(None),
        };
        match ct {
            ControlType::Ack => Ok(AckPacket::decode(buf).map(ControlBody::Ack)),
            ControlType::Nack => Ok(NackPacket::decode(buf).map(ControlBody::Nack)),
            ControlType::DeadlineControl => {
                DeadlineControlFrame::decode(buf).map(|f| Some(ControlBody::DeadlineControl(f)))
            }
            ControlType::StreamDataDropped => StreamDataDroppedFrame::decode(buf)
                .map(|f| Some(ControlBody::StreamDataDropped(f))),
        }
    }
}
