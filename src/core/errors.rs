// src/core/errors.rs

//! Defines the transport-level error type. Handler-level failures never
//! reach this enum; they become `success:false` response payloads so the
//! connection survives them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame payload of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),
}

impl ImError {
    /// Peer-initiated teardown is routine and logged quietly; everything
    /// else is worth a warning.
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(self, ImError::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ))
    }
}
