// src/core/protocol/codec.rs

//! Implements the length-prefixed frame codec and its resynchronization
//! behavior for corrupted input streams.

use super::message::{MessageKind, Packet, HEADER_LEN, MAGIC};
use crate::core::ImError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, warn};

/// How many consecutive one-byte discards the decoder tolerates before it
/// gives up and flushes the whole buffer. Bounds the work done on a
/// pathologically corrupted stream.
const MAX_MAGIC_MISMATCH: u32 = 10;

/// Frames larger than this are rejected outright; well-behaved clients send
/// a few KiB of JSON.
const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// A `tokio_util::codec` implementation for the wire frame format.
///
/// The decoder is stateful per connection: a partial frame is retained
/// across reads, and the mismatch counter tracks resync progress so that a
/// corrupted prefix cannot stall the stream forever.
#[derive(Debug, Default)]
pub struct ImCodec {
    magic_mismatches: u32,
}

impl ImCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder<Packet> for ImCodec {
    type Error = ImError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32(MAGIC);
        dst.put_u16(item.kind.as_u16());
        dst.put_u32(item.payload.len() as u32);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for ImCodec {
    type Item = Packet;
    type Error = ImError;

    /// Emits the next complete frame, discarding garbage one byte at a time
    /// until the magic word lines up. Returns `Ok(None)` once the buffer
    /// holds no complete frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while src.len() >= HEADER_LEN {
            let magic = u32::from_be_bytes(src[0..4].try_into().unwrap());
            if magic != MAGIC {
                self.magic_mismatches += 1;
                if self.magic_mismatches > MAX_MAGIC_MISMATCH {
                    error!(
                        buffered = src.len(),
                        "too many magic mismatches, flushing decode buffer"
                    );
                    src.clear();
                    self.magic_mismatches = 0;
                    return Ok(None);
                }
                warn!(
                    attempt = self.magic_mismatches,
                    "magic mismatch (got {magic:#010X}, expected {MAGIC:#010X}), discarding one byte"
                );
                src.advance(1);
                continue;
            }
            self.magic_mismatches = 0;

            let code = u16::from_be_bytes(src[4..6].try_into().unwrap());
            let length = u32::from_be_bytes(src[6..10].try_into().unwrap()) as usize;
            if length > MAX_PAYLOAD_LEN {
                return Err(ImError::FrameTooLarge(length));
            }
            if src.len() < HEADER_LEN + length {
                // Partial frame; keep it verbatim and wait for more bytes.
                src.reserve(HEADER_LEN + length - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let payload: Bytes = src.split_to(length).freeze();

            let Some(kind) = MessageKind::from_u16(code) else {
                // A well-formed frame of a kind this server does not know.
                // Skip it here so the connection keeps its framing; the
                // dispatcher never sees it.
                warn!("unknown message kind {code:#06X}, frame dropped");
                continue;
            };

            if kind.is_heartbeat() {
                debug!(length, "decoded heartbeat frame {code:#06X}");
            } else {
                debug!(length, "decoded frame {code:#06X}");
            }
            return Ok(Some(Packet { kind, payload }));
        }
        Ok(None)
    }
}

/// Convenience for callers outside a `Framed` transport (tests, fan-out
/// paths that pre-encode once).
pub fn encode_packet(kind: MessageKind, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(MAGIC);
    buf.put_u16(kind.as_u16());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    buf.freeze()
}
