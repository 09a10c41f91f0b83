//! Desktop fingerprints.
//!
//! The OS offers no dependable "active virtual desktop" query, so the set of
//! visible top-level windows is used as a surrogate. Two fingerprints are equal
//! exactly when they cover the same set of handles.
//!
//! Known limitation: two desktops showing the identical set of windows produce
//! identical fingerprints, and a switch between them goes unnoticed.

use crate::topology::{MonitorId, TopologySnapshot};
use crate::{WindowHandle, WindowSystem, WindowSystemError};
use serde::{Deserialize, Serialize};

/// Which windows contribute to a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FingerprintScope {
    /// Every visible window on every monitor.
    #[default]
    AllMonitors,
    /// Only windows whose geometry resolves to this monitor.
    Monitor(MonitorId),
}

/// Exact-set key over visible window handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DesktopFingerprint {
    handles: Vec<WindowHandle>,
}

impl DesktopFingerprint {
    /// Build a fingerprint from handles in any order; duplicates are ignored.
    pub fn from_handles(handles: impl IntoIterator<Item = WindowHandle>) -> Self {
        let mut handles: Vec<WindowHandle> = handles.into_iter().collect();
        handles.sort_unstable();
        handles.dedup();
        Self { handles }
    }

    /// Capture the current fingerprint.
    pub fn capture(
        window_system: &dyn WindowSystem,
        topology: &TopologySnapshot,
        scope: FingerprintScope,
    ) -> Result<Self, WindowSystemError> {
        let windows = window_system.enumerate_visible_windows()?;
        let handles = windows.into_iter().filter_map(|w| match scope {
            FingerprintScope::AllMonitors => Some(w.handle),
            FingerprintScope::Monitor(id) => (topology.resolve(&w.rect) == id).then_some(w.handle),
        });
        Ok(Self::from_handles(handles))
    }

    /// Handles in canonical (ascending) order.
    pub fn handles(&self) -> &[WindowHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Compact FNV-1a digest for log lines. Never used for comparison.
    pub fn digest(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        self.handles
            .iter()
            .flat_map(|h| h.to_le_bytes())
            .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
    }
}
