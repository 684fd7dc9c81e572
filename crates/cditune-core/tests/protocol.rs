use cditune_core::protocol::{
    checksum, FrameError, MapError, ProtocolError, TelemetryFrame, FRAME_LEN,
};

fn hex(s: &str) -> Vec<u8> {
    s.split_whitespace()
        .map(|b| u8::from_str_radix(b, 16).unwrap())
        .collect()
}

fn raw(s: &str) -> [u8; FRAME_LEN] {
    hex(s).try_into().unwrap()
}

const VECTOR_IDLE: &str = "03 00 00 00 00 00 00 74 10 04 00 08 00 0A 02 01 03 02 02 01 A8 A9";
const VECTOR_2880: &str = "03 0B 40 00 00 00 00 7E 08 59 00 08 00 1D 02 01 03 02 02 01 5D A9";
const VECTOR_1216: &str = "03 04 C0 00 00 00 00 76 0D A2 00 08 00 10 02 01 03 02 02 01 0F A9";

/// Frames captured by the monitor on a running engine
const CAPTURED: [&str; 6] = [
    "030000000000007210040008000a020103020201a6a9",
    "030300000000007210040008000a020103020201a9a9",
    "030d40000000007f0660000800220201030202016aa9",
    "03078000000000780cff0009001102010403020134a9",
    "0303c000000000740da50008000a02010302020109a9",
    "0302c000000000730d9c0008000a020103020201fea9",
];

fn captured(s: &str) -> [u8; FRAME_LEN] {
    let bytes: Vec<u8> = (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect();
    bytes.try_into().unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn test_worked_vector_idle() {
    let frame = TelemetryFrame::decode(&raw(VECTOR_IDLE)).unwrap();
    assert_eq!(frame.rpm, 0);
    assert_close(frame.battery_volts(), 11.6);
}

#[test]
fn test_worked_vector_2880_rpm() {
    let frame = TelemetryFrame::decode(&raw(VECTOR_2880)).unwrap();
    assert_eq!(frame.rpm, 2880);
    assert_close(frame.battery_volts(), 12.6);
    assert_eq!(frame.status_byte(), 0x08);
    assert_eq!(frame.timing_byte(), 0x59);
}

#[test]
fn test_worked_vector_1216_rpm() {
    let frame = TelemetryFrame::decode(&raw(VECTOR_1216)).unwrap();
    assert_eq!(frame.rpm, 1216);
    assert_close(frame.battery_volts(), 11.8);
}

#[test]
fn test_worked_vectors_reencode_byte_for_byte() {
    for vector in [VECTOR_IDLE, VECTOR_2880, VECTOR_1216] {
        let bytes = raw(vector);
        let frame = TelemetryFrame::decode(&bytes).unwrap();
        assert_eq!(frame.encode(), bytes, "vector {}", vector);
    }
}

#[test]
fn test_checksum_matches_every_known_frame() {
    for vector in [VECTOR_IDLE, VECTOR_2880, VECTOR_1216] {
        let bytes = raw(vector);
        assert_eq!(checksum(&bytes), bytes[20]);
    }
    for sample in CAPTURED {
        let bytes = captured(sample);
        assert_eq!(checksum(&bytes), bytes[20], "sample {}", sample);
        assert!(TelemetryFrame::decode(&bytes).is_ok());
    }
}

#[test]
fn test_captured_samples_decode() {
    let frames: Vec<TelemetryFrame> = CAPTURED
        .iter()
        .map(|s| TelemetryFrame::decode(&captured(s)).unwrap())
        .collect();

    let rpms: Vec<u16> = frames.iter().map(|f| f.rpm).collect();
    assert_eq!(rpms, vec![0, 768, 3392, 1920, 960, 704]);

    assert_close(frames[0].battery_volts(), 11.4);
    assert_close(frames[2].battery_volts(), 12.7);
    assert_eq!(frames[3].timing_byte(), 0xFF);
    assert_eq!(frames[3].status_byte(), 0x0C);
}

#[test]
fn test_battery_scaling() {
    let mut frame = TelemetryFrame::default();
    frame.battery_decivolts = 0x73;
    assert_close(frame.battery_volts(), 11.5);
    frame.battery_decivolts = 0x82;
    assert_close(frame.battery_volts(), 13.0);
}

#[test]
fn test_rpm_is_big_endian() {
    let mut bytes = raw(VECTOR_IDLE);
    bytes[1] = 0x02;
    bytes[2] = 0x80;
    bytes[20] = checksum(&bytes);
    assert_eq!(TelemetryFrame::decode(&bytes).unwrap().rpm, 640);

    bytes[1] = 0x05;
    bytes[2] = 0xC0;
    bytes[20] = checksum(&bytes);
    assert_eq!(TelemetryFrame::decode(&bytes).unwrap().rpm, 1472);
}

#[test]
fn test_any_single_corruption_of_framing_bytes_is_rejected() {
    for vector in [VECTOR_IDLE, VECTOR_2880, VECTOR_1216] {
        let good = raw(vector);
        for flip in 1..=255u8 {
            let mut bytes = good;
            bytes[0] ^= flip;
            assert!(matches!(
                TelemetryFrame::decode(&bytes),
                Err(FrameError::BadHeader(_))
            ));

            let mut bytes = good;
            bytes[21] ^= flip;
            assert!(matches!(
                TelemetryFrame::decode(&bytes),
                Err(FrameError::BadTerminator(_))
            ));

            let mut bytes = good;
            bytes[20] ^= flip;
            assert!(matches!(
                TelemetryFrame::decode(&bytes),
                Err(FrameError::ChecksumMismatch { .. })
            ));
        }
    }
}

#[test]
fn test_payload_corruption_fails_checksum() {
    let good = raw(VECTOR_2880);
    for index in 1..20 {
        let mut bytes = good;
        bytes[index] = bytes[index].wrapping_add(1);
        assert!(
            matches!(
                TelemetryFrame::decode(&bytes),
                Err(FrameError::ChecksumMismatch { .. })
            ),
            "byte {}",
            index
        );
    }
}

#[test]
fn test_from_slice_checks_length() {
    let bytes = hex(VECTOR_IDLE);
    assert_eq!(
        TelemetryFrame::from_slice(&bytes[..21]),
        Err(FrameError::WrongLength(21))
    );
    assert!(TelemetryFrame::try_from(bytes.as_slice()).is_ok());
}

#[test]
fn test_frame_serializes_to_json() {
    let frame = TelemetryFrame::decode(&raw(VECTOR_1216)).unwrap();
    let json = serde_json::to_string(&frame).unwrap();
    let back: TelemetryFrame = serde_json::from_str(&json).unwrap();
    assert_eq!(back, frame);
}

#[test]
fn test_protocol_error_display() {
    let err = ProtocolError::HandshakeFailed { attempts: 2 };
    assert_eq!(err.to_string(), "Handshake failed after 2 attempt(s)");
    assert!(!ProtocolError::Timeout.to_string().is_empty());
}

#[test]
fn test_protocol_error_retryable() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
    assert!(ProtocolError::from(io).is_retryable());
    assert!(ProtocolError::NotConnected.is_retryable());
    assert!(ProtocolError::Timeout.is_retryable());
    assert!(ProtocolError::HandshakeFailed { attempts: 2 }.is_retryable());
    assert!(!ProtocolError::UnsupportedBaud(14400).is_retryable());
    let mismatch = MapError::LayoutMismatch {
        expected: 16,
        actual: 12,
    };
    assert!(!ProtocolError::from(mismatch).is_retryable());
}

#[test]
fn test_constructed_frame_survives_encoding() {
    // Payload bytes that look like framing bytes must not matter
    let frame = TelemetryFrame {
        rpm: 0xA903,
        reserved: [0x03, 0xA9, 0xFF, 0x00],
        battery_decivolts: 0xFF,
        status_timing: [0xA9, 0x03],
        auxiliary: [0x03; 10],
    };
    let bytes = frame.encode();
    assert_eq!(bytes[0], 0x03);
    assert_eq!(bytes[21], 0xA9);
    assert_eq!(TelemetryFrame::decode(&bytes), Ok(frame));
}
