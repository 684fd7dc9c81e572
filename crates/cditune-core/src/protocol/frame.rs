//! Telemetry frame encoding/decoding
//!
//! The controller reports live data in fixed 22-byte frames:
//!
//! ```text
//!  0      header (0x03)
//!  1..=2  rpm, big-endian u16
//!  3..=6  reserved
//!  7      battery voltage in decivolts
//!  8..=9  status / ignition timing
//! 10..=19 auxiliary status
//! 20      checksum: wrapping sum of bytes 0..=19
//! 21      terminator (0xA9)
//! ```
//!
//! Only rpm and battery voltage are understood. The remaining bytes are kept
//! verbatim so a decoded frame re-encodes to the exact same bytes.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::FrameError;

/// Total frame size
pub const FRAME_LEN: usize = 22;

/// First byte of every frame
pub const FRAME_HEADER: u8 = 0x03;

/// Last byte of every frame
pub const FRAME_TERMINATOR: u8 = 0xA9;

const CHECKSUM_INDEX: usize = 20;

/// One decoded telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Engine speed in revolutions per minute
    pub rpm: u16,
    /// Bytes 3..=6, unused by the controller as far as is known
    pub reserved: [u8; 4],
    /// Battery voltage × 10
    pub battery_decivolts: u8,
    /// Bytes 8..=9: status mode and timing byte
    pub status_timing: [u8; 2],
    /// Bytes 10..=19
    pub auxiliary: [u8; 10],
}

impl TelemetryFrame {
    /// Decode and validate a raw frame.
    ///
    /// Checks run in wire order: header, terminator, then checksum.
    pub fn decode(raw: &[u8; FRAME_LEN]) -> Result<Self, FrameError> {
        if raw[0] != FRAME_HEADER {
            return Err(FrameError::BadHeader(raw[0]));
        }
        if raw[FRAME_LEN - 1] != FRAME_TERMINATOR {
            return Err(FrameError::BadTerminator(raw[FRAME_LEN - 1]));
        }
        let expected = checksum(raw);
        let actual = raw[CHECKSUM_INDEX];
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        let mut frame = TelemetryFrame {
            rpm: BigEndian::read_u16(&raw[1..3]),
            battery_decivolts: raw[7],
            ..Default::default()
        };
        frame.reserved.copy_from_slice(&raw[3..7]);
        frame.status_timing.copy_from_slice(&raw[8..10]);
        frame.auxiliary.copy_from_slice(&raw[10..20]);
        Ok(frame)
    }

    /// Decode from a slice that must be exactly [`FRAME_LEN`] bytes
    pub fn from_slice(raw: &[u8]) -> Result<Self, FrameError> {
        let raw: &[u8; FRAME_LEN] = raw
            .try_into()
            .map_err(|_| FrameError::WrongLength(raw.len()))?;
        Self::decode(raw)
    }

    /// Encode to wire bytes, filling in header, checksum and terminator
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut raw = [0u8; FRAME_LEN];
        raw[0] = FRAME_HEADER;
        BigEndian::write_u16(&mut raw[1..3], self.rpm);
        raw[3..7].copy_from_slice(&self.reserved);
        raw[7] = self.battery_decivolts;
        raw[8..10].copy_from_slice(&self.status_timing);
        raw[10..20].copy_from_slice(&self.auxiliary);
        raw[CHECKSUM_INDEX] = checksum(&raw);
        raw[FRAME_LEN - 1] = FRAME_TERMINATOR;
        raw
    }

    /// Battery voltage in volts
    pub fn battery_volts(&self) -> f64 {
        self.battery_decivolts as f64 / 10.0
    }

    /// Status mode byte (byte 8); selects how the timing byte is read
    pub fn status_byte(&self) -> u8 {
        self.status_timing[0]
    }

    /// Raw ignition timing byte (byte 9)
    pub fn timing_byte(&self) -> u8 {
        self.status_timing[1]
    }
}

impl TryFrom<&[u8]> for TelemetryFrame {
    type Error = FrameError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(raw)
    }
}

/// Frame checksum: 8-bit wrapping sum over header and payload (bytes 0..=19).
///
/// Accepts a full frame or just its first 20 bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .take(CHECKSUM_INDEX)
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}
