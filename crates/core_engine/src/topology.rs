//! Monitor topology.
//!
//! Monitor ids are derived from the monitor's bounding rectangle, so they change
//! whenever a display is moved or resized. Callers must never cache ids across a
//! refresh; the snapshot they hold is the only valid reference frame.

use crate::{Rect, WindowSystem};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

/// Fallback monitor used when no monitor was ever detected.
const FALLBACK_MONITOR_WIDTH: i32 = 1920;
const FALLBACK_MONITOR_HEIGHT: i32 = 1080;

/// Identifier of a monitor, derived from its bounding rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorId {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl MonitorId {
    pub fn from_rect(rect: &Rect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    fn fallback() -> Self {
        Self::from_rect(&Rect::new(0, 0, FALLBACK_MONITOR_WIDTH, FALLBACK_MONITOR_HEIGHT))
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{},{}", self.width, self.height, self.x, self.y)
    }
}

/// A connected display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub id: MonitorId,
    /// Full monitor rectangle.
    pub rect: Rect,
    /// Work area (excludes taskbar).
    pub work_area: Rect,
    pub is_primary: bool,
    /// Device name (e.g., `\\.\DISPLAY1`).
    pub device_name: String,
}

impl MonitorInfo {
    pub fn new(rect: Rect, work_area: Rect, is_primary: bool, device_name: impl Into<String>) -> Self {
        Self {
            id: MonitorId::from_rect(&rect),
            rect,
            work_area,
            is_primary,
            device_name: device_name.into(),
        }
    }
}

/// Immutable set of monitors, ordered left to right then top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    monitors: Vec<MonitorInfo>,
}

impl TopologySnapshot {
    pub fn new(mut monitors: Vec<MonitorInfo>) -> Self {
        // Ids are recomputed from the rectangles here; ids handed in are not trusted.
        for m in &mut monitors {
            m.id = MonitorId::from_rect(&m.rect);
        }
        monitors.sort_by_key(|m| (m.rect.x, m.rect.y));
        monitors.dedup_by_key(|m| m.id);
        Self { monitors }
    }

    pub fn monitors(&self) -> &[MonitorInfo] {
        &self.monitors
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn get(&self, id: MonitorId) -> Option<&MonitorInfo> {
        self.monitors.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: MonitorId) -> bool {
        self.get(id).is_some()
    }

    /// The primary monitor, or the first one if none is flagged primary.
    pub fn primary(&self) -> Option<&MonitorInfo> {
        self.monitors
            .iter()
            .find(|m| m.is_primary)
            .or_else(|| self.monitors.first())
    }

    /// Resolve the monitor that owns a rectangle.
    ///
    /// The monitor containing the center wins; otherwise the one with the largest
    /// overlap; otherwise the primary monitor. Never fails.
    pub fn resolve(&self, rect: &Rect) -> MonitorId {
        let (cx, cy) = rect.center();
        if let Some(m) = self.monitors.iter().find(|m| m.rect.contains_point(cx, cy)) {
            return m.id;
        }

        let best = self
            .monitors
            .iter()
            .map(|m| (m.rect.intersection_area(rect), m))
            .filter(|(area, _)| *area > 0)
            .max_by_key(|(area, _)| *area);
        if let Some((_, m)) = best {
            return m.id;
        }

        self.primary().map(|m| m.id).unwrap_or_else(MonitorId::fallback)
    }
}

/// Shared, read-mostly monitor topology.
///
/// Readers take an `Arc` of the current snapshot; a refresh swaps the whole
/// snapshot, so nobody observes a half-updated topology.
#[derive(Debug, Default)]
pub struct MonitorTopology {
    current: RwLock<Arc<TopologySnapshot>>,
}

impl MonitorTopology {
    pub fn new(monitors: Vec<MonitorInfo>) -> Self {
        Self {
            current: RwLock::new(Arc::new(TopologySnapshot::new(monitors))),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, monitors: Vec<MonitorInfo>) -> Arc<TopologySnapshot> {
        let next = Arc::new(TopologySnapshot::new(monitors));
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&next);
        next
    }

    /// Re-enumerate monitors.
    ///
    /// Fails soft: on an enumeration error, or an empty result, the last good snapshot
    /// is kept and returned.
    pub fn refresh(&self, window_system: &dyn WindowSystem) -> Arc<TopologySnapshot> {
        match window_system.enumerate_monitors() {
            Ok(monitors) if !monitors.is_empty() => {
                let previous = self.snapshot();
                let next = self.replace(monitors);
                if *previous != *next {
                    info!("Monitor topology changed: {} monitor(s)", next.len());
                    for m in next.monitors() {
                        debug!(
                            "  Monitor {}{} \"{}\"",
                            m.id,
                            if m.is_primary { " [PRIMARY]" } else { "" },
                            m.device_name
                        );
                    }
                }
                next
            }
            Ok(_) => {
                error!(
                    "{}; keeping last known topology",
                    crate::PinError::TopologyEnumerationFailure("no monitors reported".into())
                );
                self.snapshot()
            }
            Err(e) => {
                error!(
                    "{}; keeping last known topology",
                    crate::PinError::TopologyEnumerationFailure(e.to_string())
                );
                self.snapshot()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWindowSystem;

    fn dual() -> Vec<MonitorInfo> {
        vec![
            MonitorInfo::new(
                Rect::new(1920, 0, 1280, 1024),
                Rect::new(1920, 0, 1280, 984),
                false,
                "DISPLAY2",
            ),
            MonitorInfo::new(
                Rect::new(0, 0, 1920, 1080),
                Rect::new(0, 0, 1920, 1040),
                true,
                "DISPLAY1",
            ),
        ]
    }

    #[test]
    fn test_snapshot_orders_left_to_right() {
        let snap = TopologySnapshot::new(dual());
        assert_eq!(snap.monitors()[0].device_name, "DISPLAY1");
        assert_eq!(snap.monitors()[1].device_name, "DISPLAY2");
        assert_eq!(snap.primary().map(|m| m.device_name.as_str()), Some("DISPLAY1"));
    }

    #[test]
    fn test_resolve_by_center_then_overlap_then_primary() {
        let snap = TopologySnapshot::new(dual());
        let secondary = MonitorId::from_rect(&Rect::new(1920, 0, 1280, 1024));
        let primary = MonitorId::from_rect(&Rect::new(0, 0, 1920, 1080));

        assert_eq!(snap.resolve(&Rect::new(2000, 100, 800, 600)), secondary);
        // Center at (1900, 400) is on the primary even though it spans both.
        assert_eq!(snap.resolve(&Rect::new(1500, 100, 800, 600)), primary);
        // Center below both monitors; largest overlap is the secondary.
        assert_eq!(snap.resolve(&Rect::new(2000, 900, 800, 600)), secondary);
        // Entirely off-screen.
        assert_eq!(snap.resolve(&Rect::new(-5000, -5000, 100, 100)), primary);
    }

    #[test]
    fn test_resolve_empty_topology_uses_fallback() {
        let snap = TopologySnapshot::default();
        let id = snap.resolve(&Rect::new(10, 10, 10, 10));
        assert_eq!(id.width, FALLBACK_MONITOR_WIDTH);
        assert_eq!(id.height, FALLBACK_MONITOR_HEIGHT);
    }

    #[test]
    fn test_refresh_replaces_snapshot() {
        let ws = MockWindowSystem::new();
        ws.set_monitors(dual());
        let topology = MonitorTopology::default();

        let held = topology.snapshot();
        assert!(held.is_empty());

        let refreshed = topology.refresh(&ws);
        assert_eq!(refreshed.len(), 2);
        // Readers holding the old snapshot keep a consistent view.
        assert!(held.is_empty());
        assert_eq!(topology.snapshot().len(), 2);
    }

    #[test]
    fn test_refresh_failure_keeps_last_good() {
        let ws = MockWindowSystem::new();
        ws.set_monitors(dual());
        let topology = MonitorTopology::default();
        topology.refresh(&ws);

        ws.fail_monitor_enumeration(true);
        let after = topology.refresh(&ws);
        assert_eq!(after.len(), 2);

        ws.fail_monitor_enumeration(false);
        ws.set_monitors(Vec::new());
        assert_eq!(topology.refresh(&ws).len(), 2);
    }

    #[test]
    fn test_ids_rederived_after_reconfiguration() {
        let ws = MockWindowSystem::new();
        ws.set_monitors(dual());
        let topology = MonitorTopology::default();
        let before = topology.refresh(&ws);
        let old_secondary = before.monitors()[1].id;

        // Secondary display moved to the left of the primary.
        ws.set_monitors(vec![
            MonitorInfo::new(
                Rect::new(0, 0, 1920, 1080),
                Rect::new(0, 0, 1920, 1040),
                true,
                "DISPLAY1",
            ),
            MonitorInfo::new(
                Rect::new(-1280, 0, 1280, 1024),
                Rect::new(-1280, 0, 1280, 984),
                false,
                "DISPLAY2",
            ),
        ]);
        let after = topology.refresh(&ws);
        assert!(!after.contains(old_secondary));
        assert_eq!(after.monitors()[0].device_name, "DISPLAY2");
    }
}
