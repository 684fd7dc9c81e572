//! # CDITune Core Library
//!
//! Core functionality for talking to serial CDI ignition controllers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial port setup and the controller's init handshake
//! - Frame synchronization and decoding of the 22-byte telemetry stream
//! - Reading and writing the ignition map (provisional command set)
//! - Ignition map files in `.cfg` and `.json` form
//! - A simulated controller for demo mode and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use cditune_core::protocol::open_session;
//!
//! let mut session = open_session("/dev/ttyUSB0", 19200)?;
//! if let Some(frame) = session.next_telemetry_default()? {
//!     println!("RPM: {} battery: {:.1} V", frame.rpm, frame.battery_volts());
//! }
//! let map = session.read_ignition_map()?;
//! map.save("ignition.cfg")?;
//! ```

pub mod demo;
pub mod ignition;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::{NoiseConfig, SimulatedCdi};
    pub use crate::ignition::{IgnitionMap, IgnitionMapEntry, MapFileError, MapLayout};
    pub use crate::protocol::{
        open_session, BaudRate, FrameError, FrameSynchronizer, Link, MapError, ProtocolError,
        Session, SessionConfig, SessionState, TelemetryFrame, Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
