//! Frame synchronization
//!
//! The controller streams frames back to back with no length prefix or
//! escaping, so frame boundaries are recovered from the header and
//! terminator bytes alone. Invalid candidates are counted and dropped; they
//! never surface as errors.

use std::collections::VecDeque;

use super::frame::{TelemetryFrame, FRAME_HEADER, FRAME_LEN, FRAME_TERMINATOR};
use super::FrameError;

/// Synchronizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Discarding bytes until a header byte shows up
    SeekingHeader,
    /// Collecting a candidate frame
    Accumulating,
    /// A complete candidate with a valid terminator is being validated
    FrameReady,
    /// Candidate was rejected; re-scanning it for the next header
    Resync,
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames that passed validation
    pub frames: u64,
    /// Candidates dropped for a bad terminator
    pub bad_terminators: u64,
    /// Candidates dropped for a checksum mismatch
    pub checksum_mismatches: u64,
    /// Bytes thrown away while hunting for a header
    pub discarded_bytes: u64,
}

/// Turns a raw byte stream into validated telemetry frames
#[derive(Debug)]
pub struct FrameSynchronizer {
    state: SyncState,
    candidate: Vec<u8>,
    pending: VecDeque<u8>,
    stats: SyncStats,
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynchronizer {
    /// Empty synchronizer, seeking a header
    pub fn new() -> Self {
        Self {
            state: SyncState::SeekingHeader,
            candidate: Vec::with_capacity(FRAME_LEN),
            pending: VecDeque::new(),
            stats: SyncStats::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Diagnostic counters since creation
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// True once a header byte has been seen and a candidate is in progress
    pub fn is_locked(&self) -> bool {
        self.state == SyncState::Accumulating
    }

    /// Number of bytes buffered but not yet consumed by the state machine
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend(data);
    }

    /// Drop all buffered input and any partial candidate
    pub fn reset(&mut self) {
        self.pending.clear();
        self.candidate.clear();
        self.state = SyncState::SeekingHeader;
    }

    /// Run the state machine over buffered bytes until a frame validates or
    /// the buffer runs dry. Unconsumed bytes stay queued for the next call.
    pub fn next_frame(&mut self) -> Option<TelemetryFrame> {
        while let Some(byte) = self.pending.pop_front() {
            if let Some(frame) = self.step(byte) {
                return Some(frame);
            }
        }
        None
    }

    /// Push bytes and collect every frame they complete
    pub fn feed(&mut self, data: &[u8]) -> Vec<TelemetryFrame> {
        self.push(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    fn step(&mut self, byte: u8) -> Option<TelemetryFrame> {
        match self.state {
            SyncState::SeekingHeader => {
                if byte == FRAME_HEADER {
                    self.candidate.clear();
                    self.candidate.push(byte);
                    self.state = SyncState::Accumulating;
                } else {
                    self.stats.discarded_bytes += 1;
                }
                None
            }
            SyncState::Accumulating => {
                self.candidate.push(byte);
                if self.candidate.len() < FRAME_LEN {
                    return None;
                }
                if self.candidate[FRAME_LEN - 1] == FRAME_TERMINATOR {
                    self.state = SyncState::FrameReady;
                    self.validate()
                } else {
                    self.state = SyncState::Resync;
                    self.resync();
                    None
                }
            }
            // Both are transient and resolved inside the step that entered them
            SyncState::FrameReady | SyncState::Resync => {
                self.state = SyncState::SeekingHeader;
                self.step(byte)
            }
        }
    }

    fn validate(&mut self) -> Option<TelemetryFrame> {
        match TelemetryFrame::from_slice(&self.candidate) {
            Ok(frame) => {
                self.candidate.clear();
                self.state = SyncState::SeekingHeader;
                self.stats.frames += 1;
                Some(frame)
            }
            Err(FrameError::ChecksumMismatch { expected, actual }) => {
                self.stats.checksum_mismatches += 1;
                tracing::warn!(
                    "dropping frame: checksum expected 0x{:02X}, got 0x{:02X}",
                    expected,
                    actual
                );
                self.state = SyncState::Resync;
                self.rescan();
                None
            }
            Err(e) => {
                tracing::warn!("dropping frame: {}", e);
                self.state = SyncState::Resync;
                self.rescan();
                None
            }
        }
    }

    /// Discard a candidate whose terminator was wrong
    fn resync(&mut self) {
        self.stats.bad_terminators += 1;
        tracing::debug!(
            "bad terminator 0x{:02X}, resynchronizing",
            self.candidate[FRAME_LEN - 1]
        );
        self.rescan();
    }

    /// Drop a rejected candidate. The bytes after its first header are
    /// re-queued from the next header byte onwards, since a misaligned window
    /// can hide the start of the real frame.
    fn rescan(&mut self) {
        let next_header = self.candidate[1..]
            .iter()
            .position(|&b| b == FRAME_HEADER)
            .map(|i| i + 1);
        let dropped = next_header.unwrap_or(FRAME_LEN);
        self.stats.discarded_bytes += dropped as u64;

        if let Some(start) = next_header {
            for &b in self.candidate[start..].iter().rev() {
                self.pending.push_front(b);
            }
        }
        self.candidate.clear();
        self.state = SyncState::SeekingHeader;
    }
}
