//! Protocol errors

use thiserror::Error;

/// Errors that can occur during a session with the controller
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port unavailable: {0}")]
    PortUnavailable(String),

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    #[error("Timed out waiting for the controller")]
    Timeout,

    #[error("Handshake failed after {attempts} attempt(s)")]
    HandshakeFailed { attempts: u32 },

    #[error("Not connected to controller")]
    NotConnected,

    #[error("Ignition map exchange failed: {0}")]
    Map(#[from] MapError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether reopening the port may clear this error. Configuration
    /// mistakes fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProtocolError::UnsupportedBaud(_)
                | ProtocolError::Map(MapError::LayoutMismatch { .. })
                | ProtocolError::Map(MapError::BinMismatch { .. })
        )
    }
}

/// Per-frame validation errors.
///
/// These never end a session: the synchronizer discards the candidate and
/// keeps scanning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame must be 22 bytes, got {0}")]
    WrongLength(usize),

    #[error("bad header byte 0x{0:02X}")]
    BadHeader(u8),

    #[error("bad terminator byte 0x{0:02X}")]
    BadTerminator(u8),

    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Errors from the provisional ignition map sub-protocol.
///
/// Kept apart from [`FrameError`] so a half-understood map reply can never
/// be mistaken for a telemetry failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    #[error("controller did not answer the map command in time")]
    Timeout,

    #[error("malformed map response: {0}")]
    Malformed(String),

    #[error("controller refused the map read (NACK)")]
    Nack,

    #[error("controller rejected the map write")]
    Rejected,

    #[error("map has {actual} entries, layout expects {expected}")]
    LayoutMismatch { expected: usize, actual: usize },

    #[error("map entry {index} is at {actual} RPM, layout bin is {expected} RPM")]
    BinMismatch {
        index: usize,
        expected: u16,
        actual: u16,
    },
}
