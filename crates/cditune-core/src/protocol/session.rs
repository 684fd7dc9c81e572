//! Session management
//!
//! A [`Session`] owns the link to one controller and everything built on it:
//! handshake, frame synchronization and the map sub-protocol. All I/O goes
//! through `&mut self`, so one conversation at a time per link is enforced
//! by the borrow checker; wrap the session in a mutex to share it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::handshake::{self, HandshakeConfig};
use super::map_exchange::{self, MapProtocol};
use super::serial::BaudRate;
use super::sync::{FrameSynchronizer, SyncStats};
use super::transport::Link;
use super::{MapError, ProtocolError, TelemetryFrame, DEFAULT_TIMEOUT_MS};
use crate::ignition::{IgnitionMap, MapLayout};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake done, telemetry flowing
    Streaming,
    /// A map transaction completed; telemetry needs a new handshake
    Quiet,
    /// A map transaction was cut short; the controller's reply buffer is in
    /// an unknown state and any further I/O needs a new handshake
    NeedsHandshake,
    /// Link closed by `close()` or a fatal I/O error
    Closed,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud: BaudRate,
    /// Handshake policy
    pub handshake: HandshakeConfig,
    /// Re-send the init sequence when no frame completes within this window.
    /// `None` relies on the controller streaming on its own.
    pub repoll_interval: Option<Duration>,
    /// Longest single read while waiting for telemetry
    pub read_slice: Duration,
    /// Map command bytes and timing
    pub map_protocol: MapProtocol,
    /// Map table shape
    pub map_layout: MapLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud: BaudRate::default(),
            handshake: HandshakeConfig::default(),
            repoll_interval: Some(Duration::from_millis(200)),
            read_slice: Duration::from_millis(50),
            map_protocol: MapProtocol::default(),
            map_layout: MapLayout::default(),
        }
    }
}

impl SessionConfig {
    /// Config for a port at the given baud, other settings default
    pub fn new(port_name: impl Into<String>, baud: u32) -> Result<Self, ProtocolError> {
        Ok(Self {
            port_name: port_name.into(),
            baud: BaudRate::try_from(baud)?,
            ..Default::default()
        })
    }

    /// Default wait used by [`Session::next_telemetry_default`]
    pub fn default_timeout() -> Duration {
        Duration::from_millis(DEFAULT_TIMEOUT_MS)
    }
}

/// Live conversation with one controller
pub struct Session {
    link: Option<Link>,
    sync: FrameSynchronizer,
    config: SessionConfig,
    state: SessionState,
    last_request: Instant,
}

impl Session {
    /// Open the configured serial port and negotiate
    pub fn open(config: SessionConfig) -> Result<Self, ProtocolError> {
        let link = Link::open(&config.port_name, config.baud.as_u32())?;
        Self::start(link, config)
    }

    /// Negotiate over an already open link.
    ///
    /// On failure the link is dropped, releasing the port.
    pub fn start(mut link: Link, config: SessionConfig) -> Result<Self, ProtocolError> {
        let mut sync = FrameSynchronizer::new();
        handshake::negotiate_with_retry(&mut link, &mut sync, &config.handshake)?;
        tracing::info!("session started on {}", link.name());
        Ok(Self {
            link: Some(link),
            sync,
            config,
            state: SessionState::Streaming,
            last_request: Instant::now(),
        })
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration in use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Frame synchronizer counters
    pub fn stats(&self) -> SyncStats {
        self.sync.stats()
    }

    /// Cumulative (tx, rx) byte counters, if the link is still open
    pub fn counters(&self) -> Option<(u64, u64)> {
        self.link.as_ref().map(|l| l.counters())
    }

    /// Close the session, releasing the port
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.sync.reset();
        self.state = SessionState::Closed;
    }

    /// Apply the propagation policy: I/O failures close the link
    fn check<T>(&mut self, result: Result<T, ProtocolError>) -> Result<T, ProtocolError> {
        if let Err(ProtocolError::Io(e)) = &result {
            tracing::warn!("I/O failure, closing link: {}", e);
            self.shutdown();
        }
        result
    }

    /// Run the handshake again, e.g. after a map transaction
    pub fn renegotiate(&mut self) -> Result<(), ProtocolError> {
        let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
        let result = handshake::negotiate_with_retry(link, &mut self.sync, &self.config.handshake);
        let result = self.check(result);
        if result.is_ok() {
            self.state = SessionState::Streaming;
            self.last_request = Instant::now();
        }
        result
    }

    /// Wait up to `timeout` for the next telemetry frame.
    ///
    /// `Ok(None)` means no frame arrived in time, which is normal. Corrupt
    /// frames are dropped silently and only show up in [`Session::stats`].
    pub fn next_telemetry(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<TelemetryFrame>, ProtocolError> {
        match self.state {
            SessionState::Closed => return Err(ProtocolError::NotConnected),
            SessionState::Quiet | SessionState::NeedsHandshake => self.renegotiate()?,
            SessionState::Streaming => {}
        }

        let start = Instant::now();
        loop {
            if let Some(frame) = self.sync.next_frame() {
                self.last_request = Instant::now();
                return Ok(Some(frame));
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Ok(None);
            }

            let repoll_due = self
                .config
                .repoll_interval
                .map(|interval| self.last_request.elapsed() >= interval)
                .unwrap_or(false);

            let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
            let result = if repoll_due {
                tracing::debug!("no frame within re-poll interval, re-sending init sequence");
                self.last_request = Instant::now();
                handshake::send_sequence(link, self.config.handshake.byte_by_byte)
                    .map(|_| Vec::new())
            } else {
                link.read_available(remaining.min(self.config.read_slice))
            };
            let bytes = self.check(result)?;
            self.sync.push(&bytes);
        }
    }

    /// [`Session::next_telemetry`] with the default timeout
    pub fn next_telemetry_default(&mut self) -> Result<Option<TelemetryFrame>, ProtocolError> {
        self.next_telemetry(SessionConfig::default_timeout())
    }

    /// Deliver frames to `on_frame` until `stop` is raised.
    ///
    /// `stop` is only checked between frames, so the synchronizer is never
    /// left holding a torn frame. Returns the synchronizer counters.
    pub fn run_telemetry<F>(
        &mut self,
        stop: &AtomicBool,
        poll_timeout: Duration,
        mut on_frame: F,
    ) -> Result<SyncStats, ProtocolError>
    where
        F: FnMut(&TelemetryFrame),
    {
        while !stop.load(Ordering::Relaxed) {
            if let Some(frame) = self.next_telemetry(poll_timeout)? {
                on_frame(&frame);
            }
        }
        Ok(self.stats())
    }

    fn begin_map_transaction(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Closed => Err(ProtocolError::NotConnected),
            SessionState::NeedsHandshake => self.renegotiate(),
            SessionState::Streaming | SessionState::Quiet => Ok(()),
        }
    }

    fn end_map_transaction<T>(
        &mut self,
        result: Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let result = self.check(result);
        // Telemetry bytes buffered before the command are stale either way
        self.sync.reset();
        if self.state != SessionState::Closed {
            // A clean reply (even a refusal) leaves the controller in a known state
            self.state = match &result {
                Ok(_) | Err(ProtocolError::Map(MapError::Nack | MapError::Rejected)) => {
                    SessionState::Quiet
                }
                Err(_) => SessionState::NeedsHandshake,
            };
        }
        result
    }

    /// Read the controller's ignition map (provisional sub-protocol)
    pub fn read_ignition_map(&mut self) -> Result<IgnitionMap, ProtocolError> {
        self.begin_map_transaction()?;
        let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
        let result = map_exchange::read_map(
            link,
            &self.config.map_protocol,
            &self.config.map_layout,
        );
        self.end_map_transaction(result)
    }

    /// Upload an ignition map (provisional sub-protocol)
    pub fn write_ignition_map(&mut self, map: &IgnitionMap) -> Result<(), ProtocolError> {
        // Refuse a mis-sized map before touching the wire
        map.check_layout(&self.config.map_layout)?;
        self.begin_map_transaction()?;
        let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
        let result = map_exchange::write_map(
            link,
            &self.config.map_protocol,
            &self.config.map_layout,
            map,
        );
        self.end_map_transaction(result)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.link.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.baud, BaudRate::B19200);
        assert_eq!(config.handshake.attempts, 2);
        assert_eq!(config.repoll_interval, Some(Duration::from_millis(200)));
        assert_eq!(config.map_layout.entry_count, 16);
    }

    #[test]
    fn test_session_config_new_validates_baud() {
        let config = SessionConfig::new("/dev/ttyUSB0", 57600).unwrap();
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud, BaudRate::B57600);

        assert!(matches!(
            SessionConfig::new("/dev/ttyUSB0", 12345),
            Err(ProtocolError::UnsupportedBaud(12345))
        ));
    }

    #[test]
    fn test_open_missing_port() {
        let mut config = SessionConfig::default();
        config.port_name = "/dev/cditune-no-such-port".to_string();
        assert!(matches!(
            Session::open(config),
            Err(ProtocolError::PortUnavailable(_))
        ));
    }
}
