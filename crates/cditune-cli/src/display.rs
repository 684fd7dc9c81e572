//! Telemetry output formatting

use anyhow::{bail, Context};
use chrono::{DateTime, Local};
use serde::Serialize;

use cditune_core::protocol::TelemetryFrame;

/// Column header for table output
pub const HEADER: &str = "Time     | RPM  | Battery | Timing byte | Status byte";

/// Frames captured by the monitor on a running engine, used by `decode`
/// when no frames are given
pub const SAMPLE_FRAMES: [&str; 7] = [
    "030000000000007210040008000a020103020201a6a9",
    "030300000000007210040008000a020103020201a9a9",
    "030300000000007210040008000a020103020201a9a9",
    "030d40000000007f0660000800220201030202016aa9",
    "03078000000000780cff0009001102010403020134a9",
    "0303c000000000740da50008000a02010302020109a9",
    "0302c000000000730d9c0008000a020103020201fea9",
];

fn hex_and_decimal(byte: u8) -> String {
    format!("0x{:02X} ({:3})", byte, byte)
}

/// One table row; `None` renders the placeholder row for a rejected frame
pub fn format_row(time: &DateTime<Local>, frame: Option<&TelemetryFrame>) -> String {
    let timestamp = time.format("%H:%M:%S");
    match frame {
        Some(frame) => format!(
            "{} | {:4} | {:^7} | {:^11} | {:^11}",
            timestamp,
            frame.rpm,
            format!("{:5.1}V", frame.battery_volts()),
            hex_and_decimal(frame.timing_byte()),
            hex_and_decimal(frame.status_byte()),
        ),
        None => format!(
            "{} | {:^4} | {:^7} | {:^11} | {:^11}",
            timestamp, "---", "---", "---", "---"
        ),
    }
}

/// JSON form of one frame
#[derive(Debug, Serialize)]
pub struct TelemetryRecord {
    pub time: DateTime<Local>,
    pub rpm: u16,
    pub battery_volts: f64,
    pub timing_byte: u8,
    pub status_byte: u8,
    pub frame: TelemetryFrame,
}

impl TelemetryRecord {
    pub fn new(time: DateTime<Local>, frame: &TelemetryFrame) -> Self {
        Self {
            time,
            rpm: frame.rpm,
            battery_volts: frame.battery_volts(),
            timing_byte: frame.timing_byte(),
            status_byte: frame.status_byte(),
            frame: *frame,
        }
    }
}

/// Parse a hex frame, with or without separating whitespace
pub fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() {
        bail!("non-hex characters in '{}'", text);
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits in '{}'", text);
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}
