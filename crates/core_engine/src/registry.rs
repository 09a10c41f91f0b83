//! Pinned window registry.
//!
//! Every read and write goes through one mutex; callers receive cloned entries,
//! so a reader never observes an entry mid-update.

use crate::topology::{MonitorId, TopologySnapshot};
use crate::{
    PinError, Rect, ShowState, WindowGeometry, WindowHandle, WindowInfo, WindowSnapshot,
    WindowSystem,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A pinned window with its baseline snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedWindow {
    pub handle: WindowHandle,
    pub snapshot: WindowSnapshot,
    pub title: String,
    pub class_name: String,
}

impl PinnedWindow {
    /// The restart-stable form of this pin.
    pub fn persisted(&self) -> PersistedPin {
        PersistedPin {
            title: self.title.clone(),
            class_name: self.class_name.clone(),
            monitor: self.snapshot.monitor,
            rect: self.snapshot.rect(),
            show_state: self.snapshot.show_state(),
        }
    }
}

/// Window identity that survives a process restart.
///
/// Raw handles are meaningless after a restart, so pins are stored by title,
/// class and the geometry they were pinned at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedPin {
    pub title: String,
    pub class_name: String,
    pub monitor: MonitorId,
    pub rect: Rect,
    #[serde(default)]
    pub show_state: ShowState,
}

/// Outcome of resolving persisted pins against live windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolved: Vec<WindowHandle>,
    pub dropped: Vec<PersistedPin>,
}

/// The set of windows kept fixed across desktop switches.
#[derive(Debug, Default)]
pub struct PinnedWindowRegistry {
    entries: Mutex<HashMap<WindowHandle, PinnedWindow>>,
}

impl PinnedWindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowHandle, PinnedWindow>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pin a window, capturing its current geometry as the baseline.
    ///
    /// The baseline is always recorded as visible: a pinned window is meant to
    /// stay on screen.
    pub fn add(
        &self,
        window_system: &dyn WindowSystem,
        topology: &TopologySnapshot,
        handle: WindowHandle,
    ) -> Result<WindowSnapshot, PinError> {
        if self.contains(handle) {
            return Err(PinError::AlreadyPinned(handle));
        }

        let (snapshot, info) = capture(window_system, topology, handle)?;

        let mut entries = self.lock();
        if entries.contains_key(&handle) {
            return Err(PinError::AlreadyPinned(handle));
        }
        info!(
            "Pinned window {:#x} \"{}\" at {} on monitor {}",
            handle,
            info.title,
            snapshot.rect(),
            snapshot.monitor
        );
        entries.insert(
            handle,
            PinnedWindow {
                handle,
                snapshot,
                title: info.title,
                class_name: info.class_name,
            },
        );
        Ok(snapshot)
    }

    /// Unpin a window. Returns whether anything was removed.
    pub fn remove(&self, handle: WindowHandle) -> bool {
        let removed = self.lock().remove(&handle).is_some();
        if removed {
            info!("Unpinned window {:#x}", handle);
        }
        removed
    }

    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.lock().contains_key(&handle)
    }

    pub fn get(&self, handle: WindowHandle) -> Option<PinnedWindow> {
        self.lock().get(&handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All pinned windows, ordered by handle.
    pub fn list(&self) -> Vec<PinnedWindow> {
        let mut list: Vec<PinnedWindow> = self.lock().values().cloned().collect();
        list.sort_by_key(|p| p.handle);
        list
    }

    /// Make the window's current geometry its new baseline.
    ///
    /// A stale handle is removed from the registry.
    pub fn refresh_snapshot(
        &self,
        window_system: &dyn WindowSystem,
        topology: &TopologySnapshot,
        handle: WindowHandle,
    ) -> Result<WindowSnapshot, PinError> {
        if !self.contains(handle) {
            return Err(PinError::NotPinned(handle));
        }

        let (snapshot, info) = match capture(window_system, topology, handle) {
            Ok(captured) => captured,
            Err(PinError::StaleHandle(h)) => {
                self.lock().remove(&h);
                info!("Pinned window {:#x} is gone; removed", h);
                return Err(PinError::StaleHandle(h));
            }
            Err(e) => return Err(e),
        };

        let mut entries = self.lock();
        let entry = entries.get_mut(&handle).ok_or(PinError::NotPinned(handle))?;
        *entry = PinnedWindow {
            handle,
            snapshot,
            title: info.title,
            class_name: info.class_name,
        };
        info!(
            "Baseline for window {:#x} updated to {} on monitor {}",
            handle,
            snapshot.rect(),
            snapshot.monitor
        );
        Ok(snapshot)
    }

    /// Remove several entries at once. Returns how many were present.
    pub fn prune(&self, handles: &[WindowHandle]) -> usize {
        let mut entries = self.lock();
        handles.iter().filter(|h| entries.remove(h).is_some()).count()
    }

    /// Restart-stable identities of every pin, ordered by handle.
    pub fn identities(&self) -> Vec<PersistedPin> {
        self.list().iter().map(PinnedWindow::persisted).collect()
    }

    /// Match persisted pins to live windows and register them.
    ///
    /// A candidate must match title and class exactly. Among several candidates the
    /// one on the saved monitor wins, then the one whose top-left corner is closest
    /// to the saved position, then the lowest handle. A live window is claimed by at
    /// most one pin. Pins whose monitor is no longer connected, or that match no
    /// window, are dropped. Resolved entries keep the persisted geometry as their
    /// baseline.
    pub fn resolve_identities(
        &self,
        window_system: &dyn WindowSystem,
        topology: &TopologySnapshot,
        pins: &[PersistedPin],
    ) -> Result<ResolveReport, PinError> {
        let candidates = window_system
            .enumerate_windows()
            .map_err(|e| PinError::WindowSystemUnavailable(e.to_string()))?;

        let mut report = ResolveReport::default();
        let mut entries = self.lock();
        let mut claimed: HashSet<WindowHandle> = entries.keys().copied().collect();

        for pin in pins {
            if !topology.is_empty() && !topology.contains(pin.monitor) {
                warn!(
                    "Dropping saved pin \"{}\": monitor {} is not connected",
                    pin.title, pin.monitor
                );
                report.dropped.push(pin.clone());
                continue;
            }

            let Some(window) = best_match(&candidates, &claimed, topology, pin) else {
                debug!("No live window matches saved pin \"{}\" ({})", pin.title, pin.class_name);
                report.dropped.push(pin.clone());
                continue;
            };

            claimed.insert(window.handle);
            let snapshot = WindowSnapshot {
                handle: window.handle,
                geometry: WindowGeometry::new(pin.rect, pin.show_state),
                monitor: pin.monitor,
            };
            entries.insert(
                window.handle,
                PinnedWindow {
                    handle: window.handle,
                    snapshot,
                    title: window.title.clone(),
                    class_name: window.class_name.clone(),
                },
            );
            report.resolved.push(window.handle);
        }

        info!(
            "Resolved {} of {} saved pin(s)",
            report.resolved.len(),
            pins.len()
        );
        Ok(report)
    }
}

fn capture(
    window_system: &dyn WindowSystem,
    topology: &TopologySnapshot,
    handle: WindowHandle,
) -> Result<(WindowSnapshot, WindowInfo), PinError> {
    // Without a known monitor the baseline would carry a made-up id that the next
    // restoration treats as vanished.
    if topology.is_empty() {
        return Err(PinError::TopologyEnumerationFailure(
            "no monitors known yet".to_string(),
        ));
    }
    let geometry = window_system
        .window_geometry(handle)
        .map_err(|e| PinError::from_window_system(handle, e))?;
    let info = window_system
        .window_info(handle)
        .map_err(|e| PinError::from_window_system(handle, e))?;

    let snapshot = WindowSnapshot {
        handle,
        geometry: WindowGeometry {
            visible: true,
            ..geometry
        },
        monitor: topology.resolve(&geometry.rect),
    };
    Ok((snapshot, info))
}

fn best_match<'a>(
    candidates: &'a [WindowInfo],
    claimed: &HashSet<WindowHandle>,
    topology: &TopologySnapshot,
    pin: &PersistedPin,
) -> Option<&'a WindowInfo> {
    candidates
        .iter()
        .filter(|c| !claimed.contains(&c.handle))
        .filter(|c| c.title == pin.title && c.class_name == pin.class_name)
        .min_by_key(|c| {
            let off_monitor = topology.resolve(&c.rect) != pin.monitor;
            let dx = i64::from(c.rect.x - pin.rect.x);
            let dy = i64::from(c.rect.y - pin.rect.y);
            (off_monitor, dx * dx + dy * dy, c.handle)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWindowSystem;
    use crate::MonitorInfo;

    fn topology() -> TopologySnapshot {
        TopologySnapshot::new(vec![
            MonitorInfo::new(Rect::new(0, 0, 1920, 1080), Rect::new(0, 0, 1920, 1040), true, "DISPLAY1"),
            MonitorInfo::new(
                Rect::new(1920, 0, 1920, 1080),
                Rect::new(1920, 0, 1920, 1040),
                false,
                "DISPLAY2",
            ),
        ])
    }

    fn secondary() -> MonitorId {
        MonitorId::from_rect(&Rect::new(1920, 0, 1920, 1080))
    }

    #[test]
    fn test_add_captures_snapshot() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        let registry = PinnedWindowRegistry::new();

        let snap = registry.add(&ws, &topology(), 0x100).unwrap();
        assert_eq!(snap.rect(), Rect::new(2020, 100, 800, 600));
        assert_eq!(snap.monitor, secondary());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].title, "Chat");
    }

    #[test]
    fn test_add_rejects_duplicate_and_invalid() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        let registry = PinnedWindowRegistry::new();
        registry.add(&ws, &topology(), 0x100).unwrap();

        assert_eq!(
            registry.add(&ws, &topology(), 0x100),
            Err(PinError::AlreadyPinned(0x100))
        );
        assert_eq!(
            registry.add(&ws, &topology(), 0xdead),
            Err(PinError::StaleHandle(0xdead))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_without_known_monitors_fails() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        let registry = PinnedWindowRegistry::new();

        let err = registry.add(&ws, &TopologySnapshot::default(), 0x100).unwrap_err();
        assert!(matches!(err, PinError::TopologyEnumerationFailure(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = PinnedWindowRegistry::new();
        assert!(!registry.remove(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_refresh_snapshot_updates_baseline() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        let registry = PinnedWindowRegistry::new();
        registry.add(&ws, &topology(), 0x100).unwrap();

        ws.move_window(0x100, Rect::new(2500, 300, 640, 480));
        let snap = registry.refresh_snapshot(&ws, &topology(), 0x100).unwrap();
        assert_eq!(snap.rect(), Rect::new(2500, 300, 640, 480));
        assert_eq!(registry.get(0x100).map(|p| p.snapshot), Some(snap));
    }

    #[test]
    fn test_refresh_snapshot_removes_stale() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        let registry = PinnedWindowRegistry::new();
        registry.add(&ws, &topology(), 0x100).unwrap();
        ws.remove_window(0x100);

        assert_eq!(
            registry.refresh_snapshot(&ws, &topology(), 0x100),
            Err(PinError::StaleHandle(0x100))
        );
        assert!(!registry.contains(0x100));
        assert_eq!(
            registry.refresh_snapshot(&ws, &topology(), 0x100),
            Err(PinError::NotPinned(0x100))
        );
    }

    #[test]
    fn test_pinned_hidden_window_baseline_is_visible() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        ws.set_visible(0x100, false);
        let registry = PinnedWindowRegistry::new();
        let snap = registry.add(&ws, &topology(), 0x100).unwrap();
        assert!(snap.geometry.visible);
    }

    #[test]
    fn test_identities_roundtrip_json() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        let registry = PinnedWindowRegistry::new();
        registry.add(&ws, &topology(), 0x100).unwrap();

        let json = serde_json::to_string(&registry.identities()).unwrap();
        let parsed: Vec<PersistedPin> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, registry.identities());
        assert_eq!(parsed[0].monitor, secondary());
    }

    #[test]
    fn test_resolve_identities_tie_break() {
        let ws = MockWindowSystem::new();
        // Two identical terminals; the one on the saved monitor wins even though the
        // other has a lower handle.
        ws.add_window(0x10, "Terminal", "ConsoleWindowClass", Rect::new(100, 100, 800, 600));
        ws.add_window(0x20, "Terminal", "ConsoleWindowClass", Rect::new(2600, 500, 800, 600));
        ws.add_window(0x30, "Terminal", "ConsoleWindowClass", Rect::new(2020, 100, 800, 600));

        let registry = PinnedWindowRegistry::new();
        let pins = vec![
            PersistedPin {
                title: "Terminal".into(),
                class_name: "ConsoleWindowClass".into(),
                monitor: secondary(),
                rect: Rect::new(2000, 90, 800, 600),
                show_state: ShowState::Normal,
            },
            PersistedPin {
                title: "Terminal".into(),
                class_name: "ConsoleWindowClass".into(),
                monitor: secondary(),
                rect: Rect::new(2000, 90, 800, 600),
                show_state: ShowState::Normal,
            },
        ];
        let report = registry.resolve_identities(&ws, &topology(), &pins).unwrap();

        // Closest on-monitor first, then the remaining on-monitor window.
        assert_eq!(report.resolved, vec![0x30, 0x20]);
        assert!(report.dropped.is_empty());
        // Persisted geometry is the baseline.
        assert_eq!(
            registry.get(0x20).map(|p| p.snapshot.rect()),
            Some(Rect::new(2000, 90, 800, 600))
        );
    }

    #[test]
    fn test_resolve_identities_drops_unmatched_and_vanished() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x10, "Notes", "NotesClass", Rect::new(2100, 100, 500, 500));
        let registry = PinnedWindowRegistry::new();
        let gone_monitor = MonitorId::from_rect(&Rect::new(3840, 0, 1280, 1024));
        let pins = vec![
            PersistedPin {
                title: "Missing".into(),
                class_name: "NotesClass".into(),
                monitor: secondary(),
                rect: Rect::new(2100, 100, 500, 500),
                show_state: ShowState::Normal,
            },
            PersistedPin {
                title: "Notes".into(),
                class_name: "NotesClass".into(),
                monitor: gone_monitor,
                rect: Rect::new(3900, 100, 500, 500),
                show_state: ShowState::Normal,
            },
        ];
        let report = registry.resolve_identities(&ws, &topology(), &pins).unwrap();
        assert!(report.resolved.is_empty());
        assert_eq!(report.dropped.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_identities_keeps_window_on_other_desktop() {
        let ws = MockWindowSystem::new();
        ws.add_window(0x100, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        ws.add_window(0x200, "Editor", "EditorClass", Rect::new(100, 100, 800, 600));
        let pinned = PinnedWindowRegistry::new();
        pinned.add(&ws, &topology(), 0x100).unwrap();
        pinned.add(&ws, &topology(), 0x200).unwrap();
        let pins = pinned.identities();

        // The chat window is cloaked on another desktop; the editor was closed to the tray.
        ws.set_visible(0x100, false);
        ws.hide_window(0x200);

        let registry = PinnedWindowRegistry::new();
        let report = registry.resolve_identities(&ws, &topology(), &pins).unwrap();
        assert_eq!(report.resolved, vec![0x100]);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].title, "Editor");
        assert!(registry.contains(0x100));
    }

    #[test]
    fn test_prune_counts_present() {
        let ws = MockWindowSystem::new();
        ws.add_window(1, "A", "A", Rect::new(2000, 0, 100, 100));
        ws.add_window(2, "B", "B", Rect::new(2100, 0, 100, 100));
        let registry = PinnedWindowRegistry::new();
        registry.add(&ws, &topology(), 1).unwrap();
        registry.add(&ws, &topology(), 2).unwrap();
        assert_eq!(registry.prune(&[1, 3]), 1);
        assert_eq!(registry.list().len(), 1);
    }
}
