// src/core/protocol/mod.rs

//! The binary wire protocol: frame layout, message catalog, and the
//! encoder/decoder used by every connection.

mod codec;
mod message;

pub use codec::{encode_packet, ImCodec};
pub use message::{MessageKind, Packet, HEADER_LEN, MAGIC};
