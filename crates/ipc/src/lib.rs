//! deskpin IPC Protocol
//!
//! Shared types for daemon-CLI communication over Windows named pipes.
//! One line of JSON per request and one line per response.

use serde::{Deserialize, Serialize};

/// Named pipe path for IPC communication.
pub const PIPE_NAME: &str = r"\\.\pipe\deskpin";

/// Maximum size in bytes of a single request line.
pub const MAX_IPC_MESSAGE_SIZE: usize = 64 * 1024;

/// Direction of a virtual-desktop switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpcDirection {
    Previous,
    Next,
}

/// Commands that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Pin a window at its current position.
    Pin { window_id: u64 },
    /// Unpin a window.
    Unpin { window_id: u64 },
    /// Make a pinned window's current position its new baseline.
    RefreshSnapshot { window_id: u64 },

    /// List pinned windows.
    ListPinned,
    /// List windows that can be pinned.
    ListWindows,
    /// List connected monitors.
    ListMonitors,

    /// Restore pinned windows now, without waiting for a switch.
    Restore,
    /// Inject a switch signal, as if the hotkey had been pressed.
    Switch { direction: IpcDirection },

    /// Query daemon status.
    QueryStatus,
    /// Reload configuration from file.
    Reload,
    /// Stop the daemon.
    Stop,
}

/// A rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A pinned window as reported to the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedWindowInfo {
    pub window_id: u64,
    pub title: String,
    pub class_name: String,
    /// Baseline rectangle.
    pub rect: IpcRect,
    /// Baseline show state (`normal`, `minimized`, `maximized`).
    pub show_state: String,
    /// Monitor the baseline belongs to (e.g. `1920x1080@1920,0`).
    pub monitor: String,
}

/// A window that can be pinned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub window_id: u64,
    pub title: String,
    pub class_name: String,
    pub process_id: u32,
    pub rect: IpcRect,
    pub pinned: bool,
}

/// A connected monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub id: String,
    pub device_name: String,
    pub rect: IpcRect,
    pub work_area: IpcRect,
    pub is_primary: bool,
}

/// Counts from one restoration cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub count_restored: usize,
    pub count_pruned: usize,
}

/// Responses from the daemon to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Command executed successfully.
    Ok,
    /// Command failed with an error.
    Error {
        /// Error message describing what went wrong.
        message: String,
    },
    /// Pinned windows.
    PinnedWindows { windows: Vec<PinnedWindowInfo> },
    /// Pin candidates.
    Windows { windows: Vec<WindowSummary> },
    /// Connected monitors.
    Monitors { monitors: Vec<MonitorSummary> },
    /// Result of an on-demand restoration.
    Restored {
        count_restored: usize,
        count_pruned: usize,
        /// Windows pruned because their monitor disappeared.
        vanished: Vec<u64>,
    },
    /// Daemon status.
    Status {
        enabled: bool,
        pinned: usize,
        monitors: usize,
        /// Detector state (`idle`, `confirming`, `cooldown`, ...).
        detector: String,
        /// Counts from the most recent restoration cycle.
        last_result: Option<RestoreSummary>,
        uptime_secs: u64,
    },
}

impl IpcResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let cmd = IpcCommand::Pin { window_id: 0x1234 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"type":"pin","window_id":4660}"#);

        let cmd2: IpcCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, cmd2);
    }

    #[test]
    fn test_switch_command_serialization() {
        let cmd = IpcCommand::Switch {
            direction: IpcDirection::Previous,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"switch\""));
        assert!(json.contains("\"direction\":\"previous\""));
    }

    #[test]
    fn test_unit_commands_roundtrip() {
        for cmd in [
            IpcCommand::ListPinned,
            IpcCommand::ListWindows,
            IpcCommand::ListMonitors,
            IpcCommand::Restore,
            IpcCommand::QueryStatus,
            IpcCommand::Reload,
            IpcCommand::Stop,
        ] {
            let json = serde_json::to_string(&cmd).expect("Failed to serialize command");
            let roundtrip: IpcCommand =
                serde_json::from_str(&json).expect("Failed to deserialize command");
            assert_eq!(cmd, roundtrip, "Roundtrip failed for {:?}", cmd);
        }
    }

    #[test]
    fn test_restored_response_serialization() {
        let resp = IpcResponse::Restored {
            count_restored: 2,
            count_pruned: 1,
            vanished: vec![77],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"restored\""));
        assert!(json.contains("\"count_restored\":2"));
        assert!(json.contains("\"count_pruned\":1"));

        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_status_response_without_last_result() {
        let resp = IpcResponse::Status {
            enabled: true,
            pinned: 3,
            monitors: 2,
            detector: "idle".to_string(),
            last_result: None,
            uptime_secs: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"last_result\":null"));
        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_error_response() {
        let resp = IpcResponse::error("Window 0x10 is already pinned");
        if let IpcResponse::Error { message } = resp {
            assert_eq!(message, "Window 0x10 is already pinned");
        } else {
            panic!("Expected Error response");
        }
    }

    #[test]
    fn test_invalid_json_handling() {
        let result: Result<IpcCommand, _> = serde_json::from_str("not valid json");
        assert!(result.is_err());

        let result: Result<IpcCommand, _> = serde_json::from_str("{\"type\": \"unknown_command\"}");
        assert!(result.is_err());

        let result: Result<IpcCommand, _> = serde_json::from_str("{\"type\": \"pin\"}");
        assert!(result.is_err(), "pin without window_id must be rejected");

        let result: Result<IpcResponse, _> = serde_json::from_str("{\"status\": \"invalid\"}");
        assert!(result.is_err());
    }

    #[test]
    fn test_pipe_name_format() {
        assert!(PIPE_NAME.starts_with(r"\\.\pipe\"));
        assert_eq!(PIPE_NAME, r"\\.\pipe\deskpin");
    }
}
