//! deskpin Platform Win32
//!
//! Windows-specific window access using Win32 APIs.
//!
//! This crate handles:
//! - Window enumeration and filtering (visible, cloaked, tool and owned windows)
//! - Reading and applying window placement in a single call
//! - Monitor enumeration
//! - A listener thread with a low-level keyboard hook for the virtual-desktop
//!   hotkeys and a hidden window for display-change notifications

use deskpin_core_engine::{WindowHandle, WindowSystemError};
use thiserror::Error;

mod hotkey;
#[cfg(windows)]
mod listener;
#[cfg(windows)]
mod window_system;

pub use hotkey::HotkeyTracker;
#[cfg(windows)]
pub use listener::PlatformListener;
#[cfg(windows)]
pub use window_system::{set_dpi_awareness, Win32WindowSystem};

/// Errors that can occur during Win32 operations.
#[derive(Debug, Error)]
pub enum Win32Error {
    #[error("Failed to enumerate windows: {0}")]
    EnumerationFailed(String),

    #[error("Failed to set window placement: {0}")]
    SetPlacementFailed(String),

    #[error("Failed to install keyboard hook: {0}")]
    HookInstallFailed(String),

    #[error("Failed to create listener window: {0}")]
    WindowCreationFailed(String),

    #[error("Window not found: {0:#x}")]
    WindowNotFound(WindowHandle),
}

impl From<Win32Error> for WindowSystemError {
    fn from(err: Win32Error) -> Self {
        match err {
            Win32Error::WindowNotFound(handle) => WindowSystemError::NotFound(handle),
            other => WindowSystemError::ApiFailure(other.to_string()),
        }
    }
}

/// Events delivered by the platform listener thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The virtual-desktop switch hotkey (Win+Ctrl+Left/Right) was pressed.
    Hotkey(deskpin_core_engine::SwitchDirection),
    /// Display configuration changed (WM_DISPLAYCHANGE).
    DisplayChanged,
}

/// Window classes that never take part in pinning or fingerprinting.
pub(crate) const IGNORED_CLASSES: &[&str] = &["Progman", "WorkerW", "Shell_TrayWnd", "Shell_SecondaryTrayWnd"];

/// Window titles that never take part in pinning or fingerprinting.
pub(crate) const IGNORED_TITLES: &[&str] = &["Program Manager", "Windows Input Experience"];

/// Whether a window is part of the shell rather than a user application.
pub fn is_shell_window(class_name: &str, title: &str) -> bool {
    IGNORED_CLASSES.contains(&class_name) || IGNORED_TITLES.contains(&title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_windows_are_ignored() {
        assert!(is_shell_window("Progman", "Program Manager"));
        assert!(is_shell_window("Shell_TrayWnd", ""));
        assert!(is_shell_window("SomeClass", "Windows Input Experience"));
        assert!(!is_shell_window("Notepad", "Untitled - Notepad"));
    }

    #[test]
    fn test_error_display() {
        let err = Win32Error::WindowNotFound(0x1a2b);
        assert_eq!(err.to_string(), "Window not found: 0x1a2b");
    }

    #[test]
    fn test_error_conversion() {
        let not_found: WindowSystemError = Win32Error::WindowNotFound(7).into();
        assert_eq!(not_found, WindowSystemError::NotFound(7));

        let failed: WindowSystemError =
            Win32Error::SetPlacementFailed("access denied".to_string()).into();
        assert!(matches!(failed, WindowSystemError::ApiFailure(msg) if msg.contains("access denied")));
    }
}
