//! Ignition map exchange (provisional)
//!
//! The map commands are only partly reverse-engineered. What is known from
//! captured traffic: a write is the command byte `0x0D` followed by the
//! advance values as 16-bit little-endian words, sent one byte at a time,
//! and the controller may or may not answer.
//!
//! The read side is a best guess and fully configurable through
//! [`MapProtocol`]:
//!
//! ```text
//! host -> CDI   read_command
//! CDI  -> host  ack | entry_count x u16 LE | checksum (wrapping sum)
//!          or   nack
//! ```
//!
//! Failures here are reported as [`MapError`] and never touch the telemetry
//! path.

use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;

use super::transport::Link;
use super::{MapError, ProtocolError};
use crate::ignition::{IgnitionMap, MapLayout};

/// How a map write is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAck {
    /// The controller must answer with ACK within the response timeout
    Required,
    /// Silence within the settle window counts as success; a NACK still fails
    Optional,
}

/// Command bytes and timing for the map sub-protocol
#[derive(Debug, Clone)]
pub struct MapProtocol {
    /// Request the current map
    pub read_command: u8,
    /// Start a map upload
    pub write_command: u8,
    /// Positive acknowledgement
    pub ack: u8,
    /// Negative acknowledgement
    pub nack: u8,
    /// Pause between bytes of an upload
    pub inter_byte_delay: Duration,
    /// Maximum wait for a required response
    pub response_timeout: Duration,
    /// Window to listen for an optional write acknowledgement
    pub settle_time: Duration,
    /// Write confirmation policy
    pub write_ack: WriteAck,
}

impl Default for MapProtocol {
    fn default() -> Self {
        Self {
            read_command: 0x0C,
            write_command: 0x0D,
            ack: 0x06,
            nack: 0x15,
            inter_byte_delay: Duration::from_millis(1),
            response_timeout: Duration::from_millis(1000),
            settle_time: Duration::from_millis(100),
            write_ack: WriteAck::Optional,
        }
    }
}

/// Map an I/O timeout to the map-specific error, leave the rest alone
fn map_timeout(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::Timeout => ProtocolError::Map(MapError::Timeout),
        other => other,
    }
}

/// Encode advance values as little-endian words
pub fn encode_payload(map: &IgnitionMap) -> Vec<u8> {
    let mut payload = vec![0u8; map.len() * 2];
    for (chunk, advance) in payload.chunks_exact_mut(2).zip(map.advances()) {
        LittleEndian::write_u16(chunk, advance);
    }
    payload
}

/// Parse a read response (everything after the status byte)
pub fn decode_payload(body: &[u8], layout: &MapLayout) -> Result<IgnitionMap, MapError> {
    let expected_len = layout.payload_len() + 1;
    if body.len() != expected_len {
        return Err(MapError::Malformed(format!(
            "expected {} bytes, got {}",
            expected_len,
            body.len()
        )));
    }
    let (words, tail) = body.split_at(layout.payload_len());
    let expected = words_checksum(words);
    if tail[0] != expected {
        return Err(MapError::Malformed(format!(
            "checksum expected 0x{:02X}, got 0x{:02X}",
            expected, tail[0]
        )));
    }
    let advances: Vec<u16> = words.chunks_exact(2).map(LittleEndian::read_u16).collect();
    Ok(IgnitionMap::from_advances(layout, &advances))
}

/// Checksum over a map payload: wrapping sum of every byte, like telemetry
pub fn words_checksum(words: &[u8]) -> u8 {
    words.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Read the controller's ignition map
pub fn read_map(
    link: &mut Link,
    protocol: &MapProtocol,
    layout: &MapLayout,
) -> Result<IgnitionMap, ProtocolError> {
    link.clear_input()?;
    tracing::debug!("map read: sending command 0x{:02X}", protocol.read_command);
    link.write(&[protocol.read_command])?;

    let status = link
        .read_exact(1, protocol.response_timeout)
        .map_err(map_timeout)?[0];
    if status == protocol.nack {
        return Err(MapError::Nack.into());
    }
    if status != protocol.ack {
        return Err(MapError::Malformed(format!("unexpected status byte 0x{:02X}", status)).into());
    }

    let body = link
        .read_exact(layout.payload_len() + 1, protocol.response_timeout)
        .map_err(map_timeout)?;
    let map = decode_payload(&body, layout)?;
    tracing::info!("map read: {} entries", map.len());
    Ok(map)
}

/// Upload an ignition map
pub fn write_map(
    link: &mut Link,
    protocol: &MapProtocol,
    layout: &MapLayout,
    map: &IgnitionMap,
) -> Result<(), ProtocolError> {
    map.check_layout(layout)?;

    link.clear_input()?;
    tracing::debug!(
        "map write: sending command 0x{:02X} and {} entries",
        protocol.write_command,
        map.len()
    );
    link.write(&[protocol.write_command])?;

    // The controller drops bytes when the upload is sent in one burst
    for byte in encode_payload(map) {
        link.write(&[byte])?;
        if !protocol.inter_byte_delay.is_zero() {
            std::thread::sleep(protocol.inter_byte_delay);
        }
    }

    match protocol.write_ack {
        WriteAck::Required => {
            let reply = link
                .read_exact(1, protocol.response_timeout)
                .map_err(map_timeout)?[0];
            if reply == protocol.ack {
                Ok(())
            } else {
                tracing::warn!("map write: reply 0x{:02X}", reply);
                Err(MapError::Rejected.into())
            }
        }
        WriteAck::Optional => {
            let reply = link.read_available(protocol.settle_time)?;
            match reply.first() {
                Some(&b) if b == protocol.nack => Err(MapError::Rejected.into()),
                Some(_) => {
                    tracing::debug!("map write: reply {:02x?}", reply);
                    Ok(())
                }
                None => {
                    tracing::debug!("map write: no reply (accepted silently)");
                    Ok(())
                }
            }
        }
    }
}
