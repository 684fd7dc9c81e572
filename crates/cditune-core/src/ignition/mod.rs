//! Ignition Map
//!
//! In-memory form of the controller's tunable ignition table. Values are
//! carried as raw 16-bit words; nothing here interprets what an advance
//! value means to the engine.

mod file;

pub use file::MapFileError;

use serde::{Deserialize, Serialize};

/// Shape of the controller's ignition table.
///
/// Entry count and bin spacing were found empirically and differ between
/// firmware revisions, so they are configuration rather than constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLayout {
    /// Number of RPM bins in the table
    pub entry_count: usize,
    /// RPM of the first bin
    pub first_bin_rpm: u16,
    /// RPM distance between bins
    pub bin_step_rpm: u16,
}

impl Default for MapLayout {
    fn default() -> Self {
        Self {
            entry_count: 16,
            first_bin_rpm: 1000,
            bin_step_rpm: 1000,
        }
    }
}

impl MapLayout {
    /// RPM value of bin `index`
    pub fn bin_rpm(&self, index: usize) -> u16 {
        let offset = (index as u32).saturating_mul(self.bin_step_rpm as u32);
        (self.first_bin_rpm as u32)
            .saturating_add(offset)
            .min(u16::MAX as u32) as u16
    }

    /// All bin RPM values in order
    pub fn bins(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.entry_count).map(|i| self.bin_rpm(i))
    }

    /// Size of the advance payload on the wire (one 16-bit word per entry)
    pub fn payload_len(&self) -> usize {
        self.entry_count * 2
    }
}

/// One (RPM bin, timing advance) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnitionMapEntry {
    /// Bin RPM
    pub rpm: u16,
    /// Raw advance value as stored by the controller
    pub advance: u16,
}

/// Full ignition table, ordered by RPM bin
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IgnitionMap {
    pub entries: Vec<IgnitionMapEntry>,
}

impl IgnitionMap {
    /// Create a map from explicit entries
    pub fn new(entries: Vec<IgnitionMapEntry>) -> Self {
        Self { entries }
    }

    /// Pair advance values with the layout's bins.
    ///
    /// Extra values beyond the layout's entry count are ignored; missing ones
    /// leave the map short, which [`IgnitionMap::check_layout`] reports.
    pub fn from_advances(layout: &MapLayout, advances: &[u16]) -> Self {
        let entries = layout
            .bins()
            .zip(advances.iter())
            .map(|(rpm, &advance)| IgnitionMapEntry { rpm, advance })
            .collect();
        Self { entries }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advance values in bin order
    pub fn advances(&self) -> Vec<u16> {
        self.entries.iter().map(|e| e.advance).collect()
    }

    /// Advance stored for an exact bin RPM
    pub fn advance_at(&self, rpm: u16) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.rpm == rpm)
            .map(|e| e.advance)
    }

    /// Whether the entries match the layout's count and bins.
    ///
    /// Only advances go over the wire, so a map whose bins differ from the
    /// layout would be uploaded against the wrong RPMs.
    pub fn check_layout(&self, layout: &MapLayout) -> Result<(), crate::protocol::MapError> {
        if self.entries.len() != layout.entry_count {
            return Err(crate::protocol::MapError::LayoutMismatch {
                expected: layout.entry_count,
                actual: self.entries.len(),
            });
        }
        for (index, (entry, bin)) in self.entries.iter().zip(layout.bins()).enumerate() {
            if entry.rpm != bin {
                return Err(crate::protocol::MapError::BinMismatch {
                    index,
                    expected: bin,
                    actual: entry.rpm,
                });
            }
        }
        Ok(())
    }
}
