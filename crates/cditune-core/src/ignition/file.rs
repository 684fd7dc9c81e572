//! Ignition map files
//!
//! Two on-disk forms are supported:
//! - `.json`: the serde form of [`IgnitionMap`]
//! - anything else: tab-separated `.cfg` text, first row the RPM bins,
//!   second row the advance values. A file holding exactly `entry_count`
//!   values in any row arrangement is read as advances on the layout's bins.

use std::fs;
use std::path::Path;

use thiserror::Error;

use super::{IgnitionMap, IgnitionMapEntry, MapLayout};

/// Errors reading or writing a map file
#[derive(Error, Debug)]
pub enum MapFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: '{value}' is not a 16-bit unsigned value")]
    Parse { line: usize, value: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("map file layout: {0}")]
    Layout(String),
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl IgnitionMap {
    /// Load a map file, picking the format from the extension
    pub fn load(path: impl AsRef<Path>, layout: &MapLayout) -> Result<Self, MapFileError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        if is_json(path) {
            Ok(serde_json::from_str(&text)?)
        } else {
            Self::from_cfg_str(&text, layout)
        }
    }

    /// Save a map file, picking the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MapFileError> {
        let path = path.as_ref();
        let text = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            self.to_cfg_string()
        };
        fs::write(path, text)?;
        Ok(())
    }

    /// Parse the tab-separated text form
    pub fn from_cfg_str(text: &str, layout: &MapLayout) -> Result<Self, MapFileError> {
        let mut rows: Vec<Vec<u16>> = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|v| {
                    v.parse::<u16>().map_err(|_| MapFileError::Parse {
                        line: idx + 1,
                        value: v.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }

        let paired = rows.len() == 2 && rows[0].len() == rows[1].len();
        let flat_len: usize = rows.iter().map(|r| r.len()).sum();

        // A flat list wins unless the two rows each already span the layout
        if paired && (rows[0].len() == layout.entry_count || flat_len != layout.entry_count) {
            let entries = rows[0]
                .iter()
                .zip(rows[1].iter())
                .map(|(&rpm, &advance)| IgnitionMapEntry { rpm, advance })
                .collect();
            return Ok(IgnitionMap::new(entries));
        }

        if flat_len == layout.entry_count {
            let flat: Vec<u16> = rows.into_iter().flatten().collect();
            return Ok(IgnitionMap::from_advances(layout, &flat));
        }

        Err(MapFileError::Layout(format!(
            "expected a bins row and an advance row of equal length, or {} advance values; found {} values",
            layout.entry_count,
            flat_len
        )))
    }

    /// Render the tab-separated text form
    pub fn to_cfg_string(&self) -> String {
        let join = |values: Vec<u16>| {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("\t")
        };
        format!(
            "{}\n{}\n",
            join(self.entries.iter().map(|e| e.rpm).collect()),
            join(self.advances())
        )
    }
}
