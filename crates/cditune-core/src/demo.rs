//! Demo Mode - Simulated CDI controller
//!
//! [`SimulatedCdi`] behaves like the controller on the far end of the serial
//! line: it waits for the init sequence, then streams telemetry frames of an
//! engine idling at ~1300 RPM with random throttle blips. It also answers the
//! ignition map commands and can inject line noise to exercise resync.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use crate::ignition::{IgnitionMap, MapLayout};
use crate::protocol::map_exchange::{encode_payload, words_checksum, MapProtocol};
use crate::protocol::{Transport, TelemetryFrame, HANDSHAKE_SEQUENCE};

/// Simulated time between frames
const FRAME_PERIOD_MS: u64 = 100;

/// Auxiliary bytes as captured from a real controller at idle
const AUX_IDLE: [u8; 10] = [0x00, 0x08, 0x00, 0x0A, 0x02, 0x01, 0x03, 0x02, 0x02, 0x01];

/// Advance table captured from the tuner's upload
pub const CAPTURED_MAP: [u16; 16] = [
    4730, 6375, 7573, 8914, 10268, 11336, 11926, 12891, 13975, 15070, 16000, 600, 631, 1086,
    1817, 2456,
];

/// Line noise injection
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseConfig {
    /// Chance of 1-5 garbage bytes ahead of a frame
    pub garbage_probability: f64,
    /// Chance of a flipped payload byte (checksum mismatch)
    pub corrupt_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlipState {
    /// Engine idling normally
    Idle,
    /// Throttle opening, RPM rising
    RampUp { start_ms: u64 },
    /// At peak RPM, holding
    Hold { start_ms: u64 },
    /// Throttle closing, RPM falling
    RampDown { start_ms: u64 },
}

/// Engine model producing telemetry frames
struct EngineModel {
    sim_time_ms: u64,
    next_blip_at_ms: u64,
    blip_state: BlipState,
    blip_target_rpm: f64,
}

impl EngineModel {
    const IDLE_RPM: f64 = 1300.0;
    const RAMP_UP_MS: u64 = 300;
    const HOLD_MS: u64 = 200;
    const RAMP_DOWN_MS: u64 = 800;

    fn new(rng: &mut StdRng) -> Self {
        Self {
            sim_time_ms: 0,
            next_blip_at_ms: rng.gen_range(3000..8000),
            blip_state: BlipState::Idle,
            blip_target_rpm: Self::IDLE_RPM,
        }
    }

    fn next_frame(&mut self, rng: &mut StdRng) -> TelemetryFrame {
        self.sim_time_ms += FRAME_PERIOD_MS;
        self.update_blip_state(rng);

        let t = self.sim_time_ms as f64 / 1000.0;
        let wobble = if self.blip_state == BlipState::Idle {
            25.0 * (t * 2.5).sin() + 10.0 * (t * 7.3).sin()
        } else {
            0.0
        };
        let rpm = (self.target_rpm() + wobble).clamp(0.0, u16::MAX as f64);

        // Charging voltage rises a little with engine speed
        let volts = 12.4 + (rpm / 10000.0) * 1.6 + rng.gen_range(-0.1..0.1);
        let decivolts = (volts * 10.0).round().clamp(0.0, 255.0) as u8;

        // The timing byte tracks load; the status byte stays in the mode
        // observed at idle
        let timing = (4.0 + rpm / 40.0).clamp(0.0, 255.0) as u8;

        TelemetryFrame {
            rpm: rpm as u16,
            reserved: [0; 4],
            battery_decivolts: decivolts,
            status_timing: [0x10, timing],
            auxiliary: AUX_IDLE,
        }
    }

    fn update_blip_state(&mut self, rng: &mut StdRng) {
        let now = self.sim_time_ms;
        match self.blip_state {
            BlipState::Idle => {
                if now >= self.next_blip_at_ms {
                    self.blip_target_rpm = rng.gen_range(2500.0..6000.0);
                    self.blip_state = BlipState::RampUp { start_ms: now };
                }
            }
            BlipState::RampUp { start_ms } => {
                if now >= start_ms + Self::RAMP_UP_MS {
                    self.blip_state = BlipState::Hold { start_ms: now };
                }
            }
            BlipState::Hold { start_ms } => {
                if now >= start_ms + Self::HOLD_MS {
                    self.blip_state = BlipState::RampDown { start_ms: now };
                }
            }
            BlipState::RampDown { start_ms } => {
                if now >= start_ms + Self::RAMP_DOWN_MS {
                    self.blip_state = BlipState::Idle;
                    self.next_blip_at_ms = now + rng.gen_range(5000..12000);
                }
            }
        }
    }

    fn target_rpm(&self) -> f64 {
        let now = self.sim_time_ms;
        match self.blip_state {
            BlipState::Idle => Self::IDLE_RPM,
            BlipState::RampUp { start_ms } => {
                let progress = ((now - start_ms) as f64 / Self::RAMP_UP_MS as f64).min(1.0);
                Self::IDLE_RPM + (self.blip_target_rpm - Self::IDLE_RPM) * progress
            }
            BlipState::Hold { .. } => self.blip_target_rpm,
            BlipState::RampDown { start_ms } => {
                let progress = ((now - start_ms) as f64 / Self::RAMP_DOWN_MS as f64).min(1.0);
                self.blip_target_rpm + (Self::IDLE_RPM - self.blip_target_rpm) * progress
            }
        }
    }
}

/// Simulated controller implementing [`Transport`]
pub struct SimulatedCdi {
    rng: StdRng,
    engine: EngineModel,
    noise: NoiseConfig,
    frame_interval: Option<Duration>,
    next_frame_at: Instant,
    streaming: bool,
    recent: VecDeque<u8>,
    outbound: VecDeque<u8>,
    upload: Option<Vec<u8>>,
    map: IgnitionMap,
    layout: MapLayout,
    protocol: MapProtocol,
    ack_writes: bool,
}

impl Default for SimulatedCdi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCdi {
    /// Simulator seeded from entropy
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic simulator
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let layout = MapLayout::default();
        let engine = EngineModel::new(&mut rng);
        Self {
            rng,
            engine,
            noise: NoiseConfig::default(),
            frame_interval: None,
            next_frame_at: Instant::now(),
            streaming: false,
            recent: VecDeque::with_capacity(HANDSHAKE_SEQUENCE.len()),
            outbound: VecDeque::new(),
            upload: None,
            map: IgnitionMap::from_advances(&layout, &CAPTURED_MAP),
            layout,
            protocol: MapProtocol::default(),
            ack_writes: false,
        }
    }

    /// Inject line noise
    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = noise;
        self
    }

    /// Pace frames in real time; without this frames are produced on demand
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Use a different map table and layout
    pub fn with_map(mut self, layout: MapLayout, map: IgnitionMap) -> Self {
        self.layout = layout;
        self.map = map;
        self
    }

    /// Use different map command bytes
    pub fn with_protocol(mut self, protocol: MapProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Answer completed uploads with ACK
    pub fn with_write_ack(mut self, ack: bool) -> Self {
        self.ack_writes = ack;
        self
    }

    /// Map currently stored in the simulated controller
    pub fn map(&self) -> &IgnitionMap {
        &self.map
    }

    fn receive(&mut self, byte: u8) {
        if let Some(buf) = self.upload.as_mut() {
            buf.push(byte);
            if buf.len() == self.layout.payload_len() {
                let advances: Vec<u16> = buf
                    .chunks_exact(2)
                    .map(|w| u16::from_le_bytes([w[0], w[1]]))
                    .collect();
                self.map = IgnitionMap::from_advances(&self.layout, &advances);
                self.upload = None;
                tracing::debug!("simulator: stored uploaded map");
                if self.ack_writes {
                    self.outbound.push_back(self.protocol.ack);
                }
            }
            return;
        }

        if self.recent.len() == HANDSHAKE_SEQUENCE.len() {
            self.recent.pop_front();
        }
        self.recent.push_back(byte);
        if self.recent.iter().eq(HANDSHAKE_SEQUENCE.iter()) {
            self.recent.clear();
            if !self.streaming {
                tracing::debug!("simulator: init sequence received, streaming");
            }
            self.streaming = true;
            return;
        }

        if byte == self.protocol.read_command {
            self.streaming = false;
            self.outbound.clear();
            let payload = encode_payload(&self.map);
            self.outbound.push_back(self.protocol.ack);
            self.outbound.extend(payload.iter().copied());
            self.outbound.push_back(words_checksum(&payload));
        } else if byte == self.protocol.write_command {
            self.streaming = false;
            self.outbound.clear();
            self.upload = Some(Vec::with_capacity(self.layout.payload_len()));
        }
    }

    fn emit_frame(&mut self) {
        if self.rng.gen_bool(self.noise.garbage_probability.clamp(0.0, 1.0)) {
            let count = self.rng.gen_range(1..=5);
            for _ in 0..count {
                let b: u8 = self.rng.gen();
                self.outbound.push_back(b);
            }
        }

        let mut raw = self.engine.next_frame(&mut self.rng).encode();
        if self.rng.gen_bool(self.noise.corrupt_probability.clamp(0.0, 1.0)) {
            let idx = self.rng.gen_range(1..20);
            raw[idx] ^= 0x5A;
        }
        self.outbound.extend(raw);
    }
}

impl Transport for SimulatedCdi {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.outbound.is_empty() && self.streaming {
            match self.frame_interval {
                Some(interval) => {
                    let now = Instant::now();
                    if now < self.next_frame_at {
                        let wait = (self.next_frame_at - now).min(timeout);
                        std::thread::sleep(wait);
                    }
                    if Instant::now() >= self.next_frame_at {
                        self.next_frame_at = Instant::now() + interval;
                        self.emit_frame();
                    }
                }
                None => self.emit_frame(),
            }
        }

        if self.outbound.is_empty() {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            return Ok(0);
        }

        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        for &b in data {
            self.receive(b);
        }
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }
}
