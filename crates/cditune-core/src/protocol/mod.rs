//! Serial Protocol Communication
//!
//! Implements the CDI controller's serial protocol: port setup, the init
//! sequence, framing of the 22-byte telemetry stream and the provisional
//! ignition map commands.
//!
//! Layering, bottom to top:
//! - [`transport`]: byte I/O over a serial port or any [`Transport`]
//! - [`handshake`]: the init sequence that starts the telemetry stream
//! - [`sync`]: recovers frame boundaries from the raw byte stream
//! - [`frame`]: decodes and validates a single frame
//! - [`map_exchange`]: ignition map read/write
//! - [`session`]: ties the above together for one controller

mod error;
pub mod frame;
pub mod handshake;
pub mod map_exchange;
pub mod serial;
pub mod session;
pub mod sync;
pub mod transport;

pub use error::{FrameError, MapError, ProtocolError};
pub use frame::{checksum, TelemetryFrame, FRAME_HEADER, FRAME_LEN, FRAME_TERMINATOR};
pub use handshake::{HandshakeConfig, HANDSHAKE_SEQUENCE};
pub use map_exchange::{MapProtocol, WriteAck};
pub use serial::{configure_port, list_ports, open_port, BaudRate, PortInfo};
pub use session::{Session, SessionConfig, SessionState};
pub use sync::{FrameSynchronizer, SyncState, SyncStats};
pub use transport::{Link, SerialTransport, Transport};

/// Default baud rate for the controller
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default wait for a telemetry frame in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Open a serial port and start a session with default settings
pub fn open_session(port: &str, baud: u32) -> Result<Session, ProtocolError> {
    Session::open(SessionConfig::new(port, baud)?)
}
