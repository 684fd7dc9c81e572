//! Handshake negotiation
//!
//! The controller stays silent until it receives the 4-byte init sequence.
//! Sending it again later is harmless, which is also how telemetry is
//! re-requested when the stream stalls.

use std::time::{Duration, Instant};

use super::frame::FRAME_HEADER;
use super::sync::FrameSynchronizer;
use super::transport::Link;
use super::ProtocolError;

/// Init sequence expected by the controller
pub const HANDSHAKE_SEQUENCE: [u8; 4] = [0x01, 0xAB, 0xAC, 0xA1];

/// Handshake settings
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Rounds to try before giving up
    pub attempts: u32,
    /// How long each round waits for a frame header
    pub response_timeout: Duration,
    /// Write the sequence one byte per write call instead of in one write
    pub byte_by_byte: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            response_timeout: Duration::from_millis(500),
            byte_by_byte: true,
        }
    }
}

/// Write the init sequence
pub fn send_sequence(link: &mut Link, byte_by_byte: bool) -> Result<(), ProtocolError> {
    if byte_by_byte {
        for byte in HANDSHAKE_SEQUENCE {
            link.write(&[byte])?;
        }
        Ok(())
    } else {
        link.write(&HANDSHAKE_SEQUENCE)
    }
}

/// Run one handshake round.
///
/// `sync` is reset first. Received bytes from the first header onwards are
/// handed to it, so the frame that proved the controller is alive is not
/// lost. Succeeds as soon as a header byte is observed.
pub fn negotiate(
    link: &mut Link,
    sync: &mut FrameSynchronizer,
    config: &HandshakeConfig,
) -> Result<(), ProtocolError> {
    sync.reset();
    send_sequence(link, config.byte_by_byte)?;

    let start = Instant::now();
    loop {
        let remaining = config.response_timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(ProtocolError::HandshakeFailed { attempts: 1 });
        }
        let bytes = link.read_available(remaining)?;
        if let Some(pos) = bytes.iter().position(|&b| b == FRAME_HEADER) {
            tracing::debug!(
                "handshake: header after {} stray byte(s), {} bytes received",
                pos,
                bytes.len()
            );
            sync.push(&bytes[pos..]);
            return Ok(());
        }
        if !bytes.is_empty() {
            tracing::debug!("handshake: ignoring {} bytes without header", bytes.len());
        }
    }
}

/// Negotiate with up to `config.attempts` rounds
pub fn negotiate_with_retry(
    link: &mut Link,
    sync: &mut FrameSynchronizer,
    config: &HandshakeConfig,
) -> Result<(), ProtocolError> {
    let attempts = config.attempts.max(1);
    for attempt in 1..=attempts {
        match negotiate(link, sync, config) {
            Ok(()) => {
                tracing::info!("handshake complete (attempt {})", attempt);
                return Ok(());
            }
            Err(ProtocolError::HandshakeFailed { .. }) => {
                tracing::warn!("handshake attempt {}/{} got no frame header", attempt, attempts);
            }
            Err(e) => return Err(e),
        }
    }
    Err(ProtocolError::HandshakeFailed { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::SimulatedCdi;
    use crate::protocol::serial::BaudRate;
    use crate::protocol::transport::Transport;

    /// Controller that never answers
    struct Silent;

    impl Transport for Silent {
        fn read_timeout(&mut self, _buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            Ok(0)
        }

        fn write_all(&mut self, _data: &[u8]) -> std::io::Result<()> {
            Ok(())
        }

        fn clear_input(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn quick() -> HandshakeConfig {
        HandshakeConfig {
            response_timeout: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[test]
    fn test_negotiate_hands_frame_to_sync() {
        let mut link = Link::from_transport(
            "sim",
            BaudRate::B19200,
            Box::new(SimulatedCdi::with_seed(11)),
        );
        let mut sync = FrameSynchronizer::new();
        negotiate(&mut link, &mut sync, &quick()).unwrap();
        assert!(sync.next_frame().is_some());
        assert_eq!(link.counters().0, 4);
    }

    #[test]
    fn test_retry_reports_attempts() {
        let mut link = Link::from_transport("silent", BaudRate::B19200, Box::new(Silent));
        let mut sync = FrameSynchronizer::new();
        let config = HandshakeConfig {
            attempts: 3,
            ..quick()
        };
        assert!(matches!(
            negotiate_with_retry(&mut link, &mut sync, &config),
            Err(ProtocolError::HandshakeFailed { attempts: 3 })
        ));
        assert_eq!(link.counters().0, 12);
    }

    #[test]
    fn test_sequence_single_write() {
        let mut link = Link::from_transport("silent", BaudRate::B19200, Box::new(Silent));
        send_sequence(&mut link, false).unwrap();
        assert_eq!(link.counters(), (4, 0));
    }
}
