// tests/unit_codec_test.rs

//! Unit tests for the frame codec: header layout, incremental decoding,
//! and resynchronization after corrupted input.

use bytes::{BufMut, BytesMut};
use ferrochat::core::protocol::{encode_packet, ImCodec, MessageKind, Packet, HEADER_LEN, MAGIC};
use tokio_util::codec::{Decoder, Encoder};

fn decode_all(codec: &mut ImCodec, buf: &mut BytesMut) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Some(packet) = codec.decode(buf).expect("decode") {
        packets.push(packet);
    }
    packets
}

#[test]
fn encoder_writes_big_endian_header() {
    let bytes = encode_packet(MessageKind::Heartbeat, b"");
    assert_eq!(bytes.len(), HEADER_LEN);
    assert_eq!(&bytes[..4], &[0x49, 0x4D, 0x49, 0x4D]);
    assert_eq!(&bytes[4..6], &[0x00, 0x07]);
    assert_eq!(&bytes[6..10], &[0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn encoder_and_trait_impl_agree() {
    let packet = Packet::new(MessageKind::SendMessage, &b"{\"content\":\"hi\"}"[..]);
    let mut codec = ImCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(packet.clone(), &mut buf).expect("encode");
    assert_eq!(&buf[..], &encode_packet(packet.kind, &packet.payload)[..]);
}

#[test]
fn decodes_a_complete_frame() {
    let mut codec = ImCodec::new();
    let mut buf = BytesMut::from(&encode_packet(MessageKind::LoginRequest, b"{}")[..]);
    let packets = decode_all(&mut codec, &mut buf);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, MessageKind::LoginRequest);
    assert_eq!(&packets[0].payload[..], b"{}");
    assert!(buf.is_empty());
}

#[test]
fn partial_frame_is_retained_across_feeds() {
    let encoded = encode_packet(MessageKind::SendMessage, b"{\"content\":\"hello\"}");
    let mut codec = ImCodec::new();
    let mut buf = BytesMut::new();

    // Header only: not decodable yet.
    buf.extend_from_slice(&encoded[..HEADER_LEN]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());
    assert_eq!(buf.len(), HEADER_LEN);

    // Rest of the body arrives: one packet.
    buf.extend_from_slice(&encoded[HEADER_LEN..]);
    let packets = decode_all(&mut codec, &mut buf);
    assert_eq!(packets.len(), 1);
    assert_eq!(&packets[0].payload[..], b"{\"content\":\"hello\"}");
}

#[test]
fn resync_discards_up_to_ten_garbage_bytes() {
    let encoded = encode_packet(MessageKind::Heartbeat, b"");
    for garbage_len in 1..=10usize {
        let mut codec = ImCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![0xFFu8; garbage_len]);
        buf.extend_from_slice(&encoded);
        let packets = decode_all(&mut codec, &mut buf);
        assert_eq!(packets.len(), 1, "garbage prefix of {garbage_len} bytes");
        assert_eq!(packets[0].kind, MessageKind::Heartbeat);
    }
}

#[test]
fn more_than_ten_mismatches_flushes_the_buffer() {
    let mut codec = ImCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0xFFu8; 11]);
    buf.extend_from_slice(&encode_packet(MessageKind::Heartbeat, b""));

    // The eleventh mismatch throws everything away, valid tail included.
    let packets = decode_all(&mut codec, &mut buf);
    assert!(packets.is_empty());
    assert!(buf.is_empty());

    // The decoder is usable again afterwards.
    buf.extend_from_slice(&encode_packet(MessageKind::Heartbeat, b""));
    assert_eq!(decode_all(&mut codec, &mut buf).len(), 1);
}

#[test]
fn mismatch_counter_resets_on_successful_frame() {
    let encoded = encode_packet(MessageKind::Heartbeat, b"");
    let mut codec = ImCodec::new();
    let mut buf = BytesMut::new();

    // 6 + 7 garbage bytes exceed 10 in total, but a good frame between
    // them resets the counter, so both frames survive.
    buf.extend_from_slice(&[0xFFu8; 6]);
    buf.extend_from_slice(&encoded);
    buf.extend_from_slice(&[0xFFu8; 7]);
    buf.extend_from_slice(&encoded);
    let packets = decode_all(&mut codec, &mut buf);
    assert_eq!(packets.len(), 2);
}

#[test]
fn unknown_kind_is_skipped_and_stream_continues() {
    let mut raw = BytesMut::new();
    raw.put_u32(MAGIC);
    raw.put_u16(0x7777); // no such kind
    raw.put_u32(2);
    raw.extend_from_slice(b"{}");
    raw.extend_from_slice(&encode_packet(MessageKind::Heartbeat, b""));

    let mut codec = ImCodec::new();
    let mut buf = BytesMut::from(&raw[..]);
    let packets = decode_all(&mut codec, &mut buf);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, MessageKind::Heartbeat);
}

#[test]
fn oversized_length_is_an_error() {
    let mut buf = BytesMut::new();
    buf.put_u32(MAGIC);
    buf.put_u16(MessageKind::SendMessage.as_u16());
    buf.put_u32(u32::MAX);
    let mut codec = ImCodec::new();
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn empty_payload_roundtrip() {
    let mut codec = ImCodec::new();
    let mut buf = BytesMut::from(&encode_packet(MessageKind::UserListRequest, b"")[..]);
    let packets = decode_all(&mut codec, &mut buf);
    assert_eq!(packets.len(), 1);
    assert!(packets[0].payload.is_empty());
}
