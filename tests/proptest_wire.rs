//! Property-based tests for the deadline-aware-streams wire format.
//!
//! These tests verify roundtrip correctness for VarInt encoding, packet
//! headers, and all control frames across the full value range.

use bytes::{Buf, Bytes, BytesMut};
use proptest::prelude::*;
use deadline_streams::wire::*;

// ─── VarInt Roundtrip ────────────────────────────────────────────────────────

/// Strategy that generates valid VarInt values (0..2^62 - 1).
fn varint_value() -> impl Strategy<Value = u64> {
    prop_oneof![
        0u64..0x40,
        0x40u64..0x4000,
        0x4000u64..0x4000_0000,
        0x4000_0000u64..VarInt::MAX,
    ]
}

fn varint_boundary() -> impl Strategy<Value = u64> {
    prop_oneof![
        Just(0u64),
        Just(0x3F),
        Just(0x40),
        Just(0x3FFF),
        Just(0x4000),
        Just(0x3FFF_FFFF),
        Just(0x4000_0000),
        Just(VarInt::MAX),
    ]
}

proptest! {
    #[test]
    fn varint_roundtrip(val in varint_value()) {
        let vi = VarInt::from_u64(val);
        let mut buf = BytesMut::new();
        vi.encode(&mut buf);
        prop_assert_eq!(buf.len(), vi.encoded_len());
        let decoded = VarInt::decode(&mut buf.freeze()).unwrap();
        prop_assert_eq!(decoded.value(), val);
    }

    #[test]
    fn varint_boundary_roundtrip(val in varint_boundary()) {
        let vi = VarInt::from_u64(val);
        let mut buf = BytesMut::new();
        vi.encode(&mut buf);
        let decoded = VarInt::decode(&mut buf.freeze()).unwrap();
        prop_assert_eq!(decoded.value(), val);
    }

    #[test]
    fn varint_encoding_length_is_correct(val in varint_value()) {
        let vi = VarInt::from_u64(val);
        let expected = if val < 0x40 { 1 }
                       else if val < 0x4000 { 2 }
                       else if val < 0x4000_0000 { 4 }
                       else { 8 };
        prop_assert_eq!(vi.encoded_len(), expected);
    }

    #[test]
    fn varint_rejects_values_above_max(val in (VarInt::MAX + 1)..=u64::MAX) {
        prop_assert!(VarInt::new(val).is_none());
    }

    #[test]
    fn varint_multiple_roundtrip(
        a in varint_value(),
        b in varint_value(),
        c in varint_value()
    ) {
        let mut buf = BytesMut::new();
        VarInt::from_u64(a).encode(&mut buf);
        VarInt::from_u64(b).encode(&mut buf);
        VarInt::from_u64(c).encode(&mut buf);

        let mut readable = buf.freeze();
        let da = VarInt::decode(&mut readable).unwrap();
        let db = VarInt::decode(&mut readable).unwrap();
        let dc = VarInt::decode(&mut readable).unwrap();

        prop_assert_eq!(da.value(), a);
        prop_assert_eq!(db.value(), b);
        prop_assert_eq!(dc.value(), c);
        prop_assert_eq!(readable.remaining(), 0);
    }
}

// ─── Packet Header Roundtrip ─────────────────────────────────────────────────

fn fragment_strategy() -> impl Strategy<Value = Fragment> {
    prop_oneof![
        Just(Fragment::Complete),
        Just(Fragment::Start),
        Just(Fragment::Middle),
        Just(Fragment::End),
    ]
}

proptest! {
    #[test]
    fn packet_header_roundtrip(
        seq in varint_value(),
        timestamp in any::<u32>(),
        payload_len in any::<u16>(),
        fragment in fragment_strategy(),
        is_deadline_data in any::<bool>(),
        is_control_reliable in any::<bool>(),
    ) {
        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Data,
            fragment,
            is_deadline_data,
            is_control_reliable,
            payload_len,
            sequence: VarInt::from_u64(seq),
            timestamp_us: timestamp,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let decoded = PacketHeader::decode(&mut buf.freeze()).unwrap();

        prop_assert_eq!(decoded.version, PROTOCOL_VERSION);
        prop_assert_eq!(decoded.packet_type, PacketType::Data);
        prop_assert_eq!(decoded.fragment, fragment);
        prop_assert_eq!(decoded.is_deadline_data, is_deadline_data);
        prop_assert_eq!(decoded.is_control_reliable, is_control_reliable);
        prop_assert_eq!(decoded.payload_len, payload_len);
        prop_assert_eq!(decoded.sequence.value(), seq);
        prop_assert_eq!(decoded.timestamp_us, timestamp);
    }

    #[test]
    fn full_data_packet_roundtrip(
        seq in varint_value(),
        timestamp in any::<u32>(),
        payload_len in 0usize..1024,
    ) {
        let payload: Vec<u8> = (0..payload_len).map(|i| (i % 256) as u8).collect();
        let payload = Bytes::from(payload);

        let pkt = Packet::new_data(seq, timestamp, payload.clone());
        let encoded = pkt.encode();
        let decoded = Packet::decode(&mut encoded.freeze()).unwrap();

        prop_assert_eq!(decoded.header.sequence.value(), seq);
        prop_assert_eq!(decoded.header.timestamp_us, timestamp);
        prop_assert_eq!(decoded.payload, payload);
    }
}

// ─── ACK Packet Roundtrip ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn ack_roundtrip(
        cumulative in varint_value(),
        bitmap in any::<u64>(),
    ) {
        let ack = AckPacket {
            cumulative_seq: VarInt::from_u64(cumulative),
            sack_bitmap: bitmap,
        };

        let mut buf = BytesMut::new();
        ack.encode(&mut buf);
        let _ = buf.split_to(1);
        let decoded = AckPacket::decode(&mut buf).unwrap();

        prop_assert_eq!(decoded.cumulative_seq.value(), cumulative);
        prop_assert_eq!(decoded.sack_bitmap, bitmap);
    }

    #[test]
    fn sack_iterator_produces_correct_sequences(
        base in 0u64..1_000_000,
        bitmap in any::<u64>(),
    ) {
        let ack = AckPacket {
            cumulative_seq: VarInt::from_u64(base),
            sack_bitmap: bitmap,
        };

        let sacked: Vec<u64> = ack.sacked_sequences().collect();

        for &seq in &sacked {
            let offset = seq - base - 1;
            prop_assert!(offset < 64, "offset out of range: {offset}");
            prop_assert!((bitmap >> offset) & 1 == 1,
                "seq {seq} returned but bit {offset} is not set");
        }
        prop_assert_eq!(sacked.len(), bitmap.count_ones() as usize);
    }
}

// ─── NACK Packet Roundtrip ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn nack_roundtrip(
        starts in prop::collection::vec(0u64..1_000_000, 1..8),
        counts in prop::collection::vec(1u64..100, 1..8),
    ) {
        let len = starts.len().min(counts.len());
        let ranges: Vec<NackRange> = starts.into_iter().zip(counts)
            .take(len)
            .map(|(s, c)| NackRange {
                start: VarInt::from_u64(s),
                count: VarInt::from_u64(c),
            })
            .collect();

        let nack = NackPacket { ranges: ranges.clone() };

        let mut buf = BytesMut::new();
        nack.encode(&mut buf);
        let _ = buf.split_to(1);
        let decoded = NackPacket::decode(&mut buf).unwrap();

        prop_assert_eq!(decoded.ranges.len(), ranges.len());
        for (orig, dec) in ranges.iter().zip(decoded.ranges.iter()) {
            prop_assert_eq!(orig.start.value(), dec.start.value());
            prop_assert_eq!(orig.count.value(), dec.count.value());
        }
    }
}

// ─── DEADLINE_CONTROL Roundtrip ──────────────────────────────────────────────

proptest! {
    #[test]
    fn deadline_control_roundtrip(
        stream_id in 4u64..VarInt::MAX,
        deadline_ms in varint_value(),
    ) {
        let frame = DeadlineControlFrame {
            stream_id: VarInt::from_u64(stream_id),
            deadline_ms: VarInt::from_u64(deadline_ms),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let _ = buf.split_to(1);
        let decoded = DeadlineControlFrame::decode(&mut buf).unwrap();
        prop_assert_eq!(decoded, frame);
    }
}

// ─── STREAM_DATA_DROPPED Roundtrip ───────────────────────────────────────────

proptest! {
    #[test]
    fn stream_data_dropped_roundtrip(
        stream_id in 4u64..VarInt::MAX,
        offset in varint_value(),
        length in varint_value(),
    ) {
        let frame = StreamDataDroppedFrame {
            stream_id: VarInt::from_u64(stream_id),
            offset: VarInt::from_u64(offset),
            length: VarInt::from_u64(length),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let _ = buf.split_to(1);
        let decoded = StreamDataDroppedFrame::decode(&mut buf).unwrap();
        prop_assert_eq!(decoded, frame);
    }
}

// ─── ControlBody Dispatch ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn control_body_roundtrips_deadline_control(
        stream_id in 4u64..VarInt::MAX,
        deadline_ms in varint_value(),
    ) {
        let frame = DeadlineControlFrame {
            stream_id: VarInt::from_u64(stream_id),
            deadline_ms: VarInt::from_u64(deadline_ms),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut bytes = buf.freeze();
        let decoded = ControlBody::decode(&mut bytes).unwrap().unwrap();
        match decoded {
            ControlBody::DeadlineControl(f) => prop_assert_eq!(f, frame),
            _ => prop_assert!(false, "wrong variant"),
        }
    }
}
