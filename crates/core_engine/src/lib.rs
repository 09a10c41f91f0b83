//! deskpin Core Engine
//!
//! Platform-agnostic desktop-switch detection and window re-pinning.
//!
//! A virtual-desktop switch swaps every window on the primary monitor. Windows on
//! secondary monitors are dragged along by the OS as well, which is exactly what
//! pinning undoes. The engine is built from:
//! - [`topology`]: copy-on-refresh snapshot of the connected monitors
//! - [`fingerprint`]: exact-set key over the visible windows, standing in for a
//!   desktop identifier the OS does not expose
//! - [`detector`]: the hotkey-to-confirmation state machine
//! - [`registry`]: the pinned windows and their baseline geometry
//! - [`restore`]: re-applying baselines once a switch is confirmed
//!
//! All OS access goes through the [`WindowSystem`] trait.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod detector;
pub mod fingerprint;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod registry;
pub mod restore;
pub mod topology;

pub use detector::{
    DesktopSwitchDetector, DetectionConfig, DetectorState, PollOutcome, SignalDisposition,
};
pub use fingerprint::{DesktopFingerprint, FingerprintScope};
pub use registry::{PersistedPin, PinnedWindow, PinnedWindowRegistry, ResolveReport};
pub use restore::{PruneReason, RestorationEngine, RestorationResult, RestoreReport};
pub use topology::{MonitorId, MonitorInfo, MonitorTopology, TopologySnapshot};

/// Opaque identifier for a top-level window.
/// On Windows, this is the HWND cast to u64.
pub type WindowHandle = u64;

/// A rectangle in screen coordinates (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Check if this rectangle intersects with another.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Area of the overlap with another rectangle, 0 when disjoint.
    pub fn intersection_area(&self, other: &Rect) -> i64 {
        if !self.intersects(other) {
            return 0;
        }
        let w = i64::from(self.right().min(other.right()) - self.x.max(other.x));
        let h = i64::from(self.bottom().min(other.bottom()) - self.y.max(other.y));
        w * h
    }

    /// Check whether a point lies inside (right/bottom edges exclusive).
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Get the right edge x-coordinate.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Get the bottom edge y-coordinate.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// Show state of a top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
}

/// Geometry of a window as read from, or applied to, the window system.
///
/// For minimized and maximized windows `rect` is the restored (normal) position,
/// so applying a geometry is a single placement call regardless of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub rect: Rect,
    pub show_state: ShowState,
    /// Visible on the current desktop (not hidden, not cloaked).
    pub visible: bool,
}

impl WindowGeometry {
    pub fn new(rect: Rect, show_state: ShowState) -> Self {
        Self {
            rect,
            show_state,
            visible: true,
        }
    }
}

/// An immutable read of one window's geometry and owning monitor.
///
/// Snapshots are superseded by fresh captures, never edited in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub handle: WindowHandle,
    pub geometry: WindowGeometry,
    pub monitor: MonitorId,
}

impl WindowSnapshot {
    pub fn rect(&self) -> Rect {
        self.geometry.rect
    }

    pub fn show_state(&self) -> ShowState {
        self.geometry.show_state
    }
}

/// A window visible on the current desktop, as used for fingerprinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleWindow {
    pub handle: WindowHandle,
    pub rect: Rect,
}

/// Descriptive information about a top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    pub class_name: String,
    pub process_id: u32,
    pub rect: Rect,
    pub show_state: ShowState,
}

/// Direction token delivered by the hotkey source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchDirection {
    Previous,
    Next,
}

impl fmt::Display for SwitchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchDirection::Previous => write!(f, "previous"),
            SwitchDirection::Next => write!(f, "next"),
        }
    }
}

/// Errors reported by a [`WindowSystem`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WindowSystemError {
    #[error("Window {0:#x} not found")]
    NotFound(WindowHandle),

    #[error("Window system call failed: {0}")]
    ApiFailure(String),

    #[error("Window system unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced by the pinning engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PinError {
    #[error("Window system call failed for window {handle:#x}: {message}")]
    ApiFailure {
        handle: WindowHandle,
        message: String,
    },

    #[error("Window {0:#x} no longer exists")]
    StaleHandle(WindowHandle),

    #[error("Monitor {monitor} of window {handle:#x} is no longer connected")]
    MonitorVanished {
        handle: WindowHandle,
        monitor: MonitorId,
    },

    #[error("No desktop switch observed within {0:?}")]
    DetectionTimeout(Duration),

    #[error("Failed to enumerate monitors: {0}")]
    TopologyEnumerationFailure(String),

    #[error("Window system unavailable: {0}")]
    WindowSystemUnavailable(String),

    #[error("Window {0:#x} is already pinned")]
    AlreadyPinned(WindowHandle),

    #[error("Window {0:#x} is not pinned")]
    NotPinned(WindowHandle),
}

impl PinError {
    /// Classify a window-system error raised while operating on `handle`.
    pub fn from_window_system(handle: WindowHandle, err: WindowSystemError) -> Self {
        match err {
            WindowSystemError::NotFound(_) => PinError::StaleHandle(handle),
            WindowSystemError::ApiFailure(message) => PinError::ApiFailure { handle, message },
            WindowSystemError::Unavailable(reason) => PinError::WindowSystemUnavailable(reason),
        }
    }

    /// Whether this error should abort a whole batch rather than one window.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PinError::WindowSystemUnavailable(_))
    }
}

/// Access to the host window system.
///
/// Implementations must tolerate handles that went stale at any moment and report
/// them as [`WindowSystemError::NotFound`].
pub trait WindowSystem: Send + Sync {
    /// Top-level windows currently visible on the active desktop.
    ///
    /// Excludes minimized and cloaked windows, tool and owned windows, message-only
    /// windows, and windows belonging to the calling process.
    fn enumerate_visible_windows(&self) -> Result<Vec<VisibleWindow>, WindowSystemError>;

    /// Windows a user may choose to pin, including minimized ones and ones cloaked
    /// on another virtual desktop. Hidden windows are excluded.
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, WindowSystemError>;

    /// Read the current geometry of a window.
    fn window_geometry(&self, handle: WindowHandle) -> Result<WindowGeometry, WindowSystemError>;

    /// Read title, class and owning process of a window.
    fn window_info(&self, handle: WindowHandle) -> Result<WindowInfo, WindowSystemError>;

    /// Apply position, size and show state in a single call.
    fn apply_geometry(
        &self,
        handle: WindowHandle,
        geometry: &WindowGeometry,
    ) -> Result<(), WindowSystemError>;

    /// Connected monitors.
    fn enumerate_monitors(&self) -> Result<Vec<MonitorInfo>, WindowSystemError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersection_area() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        assert_eq!(a.intersection_area(&b), 2500);

        let c = Rect::new(100, 0, 50, 50);
        assert!(!a.intersects(&c));
        assert_eq!(a.intersection_area(&c), 0);
    }

    #[test]
    fn test_rect_contains_point_edges() {
        let r = Rect::new(1920, 0, 1280, 1024);
        assert!(r.contains_point(1920, 0));
        assert!(!r.contains_point(3200, 0));
        assert!(r.contains_point(3199, 1023));
        assert_eq!(r.center(), (2560, 512));
    }

    #[test]
    fn test_pin_error_classification() {
        let stale = PinError::from_window_system(7, WindowSystemError::NotFound(7));
        assert_eq!(stale, PinError::StaleHandle(7));
        assert!(!stale.is_fatal());

        let fatal =
            PinError::from_window_system(7, WindowSystemError::Unavailable("gone".to_string()));
        assert!(fatal.is_fatal());

        let api = PinError::from_window_system(7, WindowSystemError::ApiFailure("x".into()));
        assert!(matches!(api, PinError::ApiFailure { handle: 7, .. }));
    }

    #[test]
    fn test_show_state_serialization() {
        let json = serde_json::to_string(&ShowState::Maximized).unwrap();
        assert_eq!(json, "\"maximized\"");
        let dir: SwitchDirection = serde_json::from_str("\"previous\"").unwrap();
        assert_eq!(dir, SwitchDirection::Previous);
    }
}
