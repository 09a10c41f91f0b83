//! On-disk store for pinned window identities.
//!
//! Window handles do not survive a restart, so the file keeps each pin's title,
//! class, monitor and baseline geometry. On startup they are matched back to live
//! windows; unmatched entries are dropped and the file is rewritten.

use anyhow::{Context, Result};
use deskpin_core_engine::PersistedPin;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const PIN_FILE_NAME: &str = "pinned-windows.json";
const PIN_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PinFile {
    version: u32,
    /// Seconds since the Unix epoch.
    saved_at: u64,
    pins: Vec<PersistedPin>,
}

/// JSON file holding the pinned windows.
#[derive(Debug, Clone)]
pub struct PinStore {
    path: PathBuf,
}

impl PinStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the per-user data directory.
    pub fn default_location() -> Option<Self> {
        crate::config::project_dirs().map(|dirs| Self::new(dirs.data_dir().join(PIN_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved pins. A missing file means no pins.
    pub fn load(&self) -> Result<Vec<PersistedPin>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read pin file: {}", self.path.display()))?;
        let file: PinFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pin file: {}", self.path.display()))?;
        if file.version != PIN_FILE_VERSION {
            tracing::warn!(
                "Pin file {} has version {}, expected {}; loading anyway",
                self.path.display(),
                file.version,
                PIN_FILE_VERSION
            );
        }
        Ok(file.pins)
    }

    /// Replace the saved pins. Written to a temporary file first, then renamed.
    pub fn save(&self, pins: &[PersistedPin]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let file = PinFile {
            version: PIN_FILE_VERSION,
            saved_at,
            pins: pins.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialize pins")?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write pin file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace pin file: {}", self.path.display()))?;

        tracing::debug!("Saved {} pin(s) to {}", pins.len(), self.path.display());
        Ok(())
    }
}
