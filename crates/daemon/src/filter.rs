//! Window system decorator applying the configured ignore rules.
//!
//! Ignored windows never show up as pin candidates and never count towards the
//! desktop fingerprint. Geometry and monitor calls pass straight through.

use crate::config::CompiledRule;
use deskpin_core_engine::{
    MonitorInfo, VisibleWindow, WindowGeometry, WindowHandle, WindowInfo, WindowSystem,
    WindowSystemError,
};
use std::sync::Arc;

/// A [`WindowSystem`] that hides windows matching any ignore rule.
pub struct FilteredWindowSystem {
    inner: Arc<dyn WindowSystem>,
    rules: Vec<CompiledRule>,
}

impl FilteredWindowSystem {
    pub fn new(inner: Arc<dyn WindowSystem>, rules: Vec<CompiledRule>) -> Self {
        Self { inner, rules }
    }

    /// Whether a window matches one of the ignore rules.
    pub fn is_ignored(&self, info: &WindowInfo) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.matches(&info.class_name, &info.title))
    }
}

impl WindowSystem for FilteredWindowSystem {
    fn enumerate_visible_windows(&self) -> Result<Vec<VisibleWindow>, WindowSystemError> {
        let windows = self.inner.enumerate_visible_windows()?;
        if self.rules.is_empty() {
            return Ok(windows);
        }
        // A window that closed between the two calls is left out. One whose title
        // or class could not be read cannot be matched against a rule, so it stays.
        Ok(windows
            .into_iter()
            .filter(|w| match self.inner.window_info(w.handle) {
                Ok(info) => !self.is_ignored(&info),
                Err(WindowSystemError::NotFound(_)) => false,
                Err(_) => true,
            })
            .collect())
    }

    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, WindowSystemError> {
        let mut windows = self.inner.enumerate_windows()?;
        windows.retain(|info| !self.is_ignored(info));
        Ok(windows)
    }

    fn window_geometry(&self, handle: WindowHandle) -> Result<WindowGeometry, WindowSystemError> {
        self.inner.window_geometry(handle)
    }

    fn window_info(&self, handle: WindowHandle) -> Result<WindowInfo, WindowSystemError> {
        self.inner.window_info(handle)
    }

    fn apply_geometry(
        &self,
        handle: WindowHandle,
        geometry: &WindowGeometry,
    ) -> Result<(), WindowSystemError> {
        self.inner.apply_geometry(handle, geometry)
    }

    fn enumerate_monitors(&self) -> Result<Vec<MonitorInfo>, WindowSystemError> {
        self.inner.enumerate_monitors()
    }
}
