//! In-memory [`WindowSystem`] for tests.
//!
//! Enabled inside this crate's tests and, for downstream crates, through the
//! `mock` feature.

use crate::{
    MonitorInfo, Rect, ShowState, VisibleWindow, WindowGeometry, WindowHandle, WindowInfo,
    WindowSystem, WindowSystemError,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type ScheduledAction = Box<dyn FnOnce(&MockWindowSystem) + Send>;

#[derive(Debug, Clone)]
struct MockWindow {
    title: String,
    class_name: String,
    process_id: u32,
    geometry: WindowGeometry,
    /// False once the window is hidden outright rather than cloaked by a switch.
    shown: bool,
}

#[derive(Default)]
struct MockState {
    windows: BTreeMap<WindowHandle, MockWindow>,
    monitors: Vec<MonitorInfo>,
    fail_monitors: bool,
    unavailable: bool,
    failing_apply: Vec<WindowHandle>,
    failing_info: Vec<WindowHandle>,
    apply_calls: Vec<WindowHandle>,
    visible_enumerations: usize,
    scheduled: Vec<(usize, ScheduledAction)>,
}

/// Scriptable in-memory window system.
#[derive(Default)]
pub struct MockWindowSystem {
    state: Mutex<MockState>,
}

impl MockWindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_monitors(&self, monitors: Vec<MonitorInfo>) {
        self.lock().monitors = monitors;
    }

    pub fn fail_monitor_enumeration(&self, fail: bool) {
        self.lock().fail_monitors = fail;
    }

    /// Make every call report [`WindowSystemError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Add a visible, normal window.
    pub fn add_window(&self, handle: WindowHandle, title: &str, class_name: &str, rect: Rect) {
        self.lock().windows.insert(
            handle,
            MockWindow {
                title: title.to_string(),
                class_name: class_name.to_string(),
                process_id: 1000 + handle as u32,
                geometry: WindowGeometry::new(rect, ShowState::Normal),
                shown: true,
            },
        );
    }

    /// Close a window; its handle goes stale.
    pub fn remove_window(&self, handle: WindowHandle) {
        self.lock().windows.remove(&handle);
    }

    pub fn move_window(&self, handle: WindowHandle, rect: Rect) {
        if let Some(w) = self.lock().windows.get_mut(&handle) {
            w.geometry.rect = rect;
        }
    }

    pub fn set_show_state(&self, handle: WindowHandle, show_state: ShowState) {
        if let Some(w) = self.lock().windows.get_mut(&handle) {
            w.geometry.show_state = show_state;
        }
    }

    pub fn set_minimized(&self, handle: WindowHandle, minimized: bool) {
        let state = if minimized {
            ShowState::Minimized
        } else {
            ShowState::Normal
        };
        self.set_show_state(handle, state);
    }

    /// Show or hide a window on the current desktop (as a desktop switch does).
    pub fn set_visible(&self, handle: WindowHandle, visible: bool) {
        if let Some(w) = self.lock().windows.get_mut(&handle) {
            w.geometry.visible = visible;
        }
    }

    /// Hide a window outright. Unlike a window on another desktop, it is no longer
    /// a pin candidate.
    pub fn hide_window(&self, handle: WindowHandle) {
        if let Some(w) = self.lock().windows.get_mut(&handle) {
            w.shown = false;
            w.geometry.visible = false;
        }
    }

    /// Make `window_info` for `handle` fail with an API error.
    pub fn fail_info(&self, handle: WindowHandle) {
        self.lock().failing_info.push(handle);
    }

    pub fn fail_apply(&self, handle: WindowHandle) {
        self.lock().failing_apply.push(handle);
    }

    /// Current geometry, bypassing error injection.
    pub fn geometry(&self, handle: WindowHandle) -> Option<WindowGeometry> {
        self.lock().windows.get(&handle).map(|w| w.geometry)
    }

    /// Handles passed to successful `apply_geometry` calls, in order.
    pub fn applied(&self) -> Vec<WindowHandle> {
        self.lock().apply_calls.clone()
    }

    /// Number of `enumerate_visible_windows` calls so far.
    pub fn visible_enumerations(&self) -> usize {
        self.lock().visible_enumerations
    }

    /// Run `action` just before the `after`-th visible-window enumeration
    /// (1-based) returns, so its effect is observed by that enumeration.
    pub fn schedule(&self, after: usize, action: impl FnOnce(&MockWindowSystem) + Send + 'static) {
        self.lock().scheduled.push((after, Box::new(action)));
    }

    /// Simulate a virtual-desktop switch: `hide` disappear, `show` appear.
    pub fn switch_desktop(&self, hide: &[WindowHandle], show: &[WindowHandle]) {
        for h in hide {
            self.set_visible(*h, false);
        }
        for h in show {
            self.set_visible(*h, true);
        }
    }

    fn check_available(&self) -> Result<(), WindowSystemError> {
        if self.lock().unavailable {
            return Err(WindowSystemError::Unavailable("mock window system offline".into()));
        }
        Ok(())
    }
}

impl WindowSystem for MockWindowSystem {
    fn enumerate_visible_windows(&self) -> Result<Vec<VisibleWindow>, WindowSystemError> {
        self.check_available()?;

        let due: Vec<ScheduledAction> = {
            let mut state = self.lock();
            state.visible_enumerations += 1;
            let count = state.visible_enumerations;
            let (due, pending): (Vec<_>, Vec<_>) =
                state.scheduled.drain(..).partition(|(after, _)| *after <= count);
            state.scheduled = pending;
            due.into_iter().map(|(_, action)| action).collect()
        };
        for action in due {
            action(self);
        }

        Ok(self
            .lock()
            .windows
            .iter()
            .filter(|(_, w)| {
                w.shown && w.geometry.visible && w.geometry.show_state != ShowState::Minimized
            })
            .map(|(&handle, w)| VisibleWindow {
                handle,
                rect: w.geometry.rect,
            })
            .collect())
    }

    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, WindowSystemError> {
        self.check_available()?;
        Ok(self
            .lock()
            .windows
            .iter()
            .filter(|(_, w)| w.shown)
            .map(|(&handle, w)| WindowInfo {
                handle,
                title: w.title.clone(),
                class_name: w.class_name.clone(),
                process_id: w.process_id,
                rect: w.geometry.rect,
                show_state: w.geometry.show_state,
            })
            .collect())
    }

    fn window_geometry(&self, handle: WindowHandle) -> Result<WindowGeometry, WindowSystemError> {
        self.check_available()?;
        self.lock()
            .windows
            .get(&handle)
            .map(|w| w.geometry)
            .ok_or(WindowSystemError::NotFound(handle))
    }

    fn window_info(&self, handle: WindowHandle) -> Result<WindowInfo, WindowSystemError> {
        self.check_available()?;
        let state = self.lock();
        if state.failing_info.contains(&handle) {
            return Err(WindowSystemError::ApiFailure(format!(
                "GetWindowTextW failed for {handle:#x}"
            )));
        }
        let info = state.windows.get(&handle).map(|w| WindowInfo {
            handle,
            title: w.title.clone(),
            class_name: w.class_name.clone(),
            process_id: w.process_id,
            rect: w.geometry.rect,
            show_state: w.geometry.show_state,
        });
        info.ok_or(WindowSystemError::NotFound(handle))
    }

    fn apply_geometry(
        &self,
        handle: WindowHandle,
        geometry: &WindowGeometry,
    ) -> Result<(), WindowSystemError> {
        self.check_available()?;
        let mut state = self.lock();
        if state.failing_apply.contains(&handle) {
            return Err(WindowSystemError::ApiFailure(format!(
                "SetWindowPlacement rejected {handle:#x}"
            )));
        }
        let window = state
            .windows
            .get_mut(&handle)
            .ok_or(WindowSystemError::NotFound(handle))?;
        window.geometry = *geometry;
        window.shown = geometry.visible;
        state.apply_calls.push(handle);
        Ok(())
    }

    fn enumerate_monitors(&self) -> Result<Vec<MonitorInfo>, WindowSystemError> {
        self.check_available()?;
        let state = self.lock();
        if state.fail_monitors {
            return Err(WindowSystemError::ApiFailure("EnumDisplayMonitors failed".into()));
        }
        Ok(state.monitors.clone())
    }
}
