//! Integration tests for the deskpin daemon IPC protocol.
//!
//! These tests pin down the wire format shared by the daemon and the CLI
//! without requiring a running daemon or Win32 windows.

use deskpin_ipc::{
    IpcCommand, IpcDirection, IpcRect, IpcResponse, MonitorSummary, PinnedWindowInfo, RestoreSummary,
    MAX_IPC_MESSAGE_SIZE,
};

// ============================================================================
// Command wire format
// ============================================================================

#[test]
fn test_window_commands_carry_decimal_ids() {
    let json = serde_json::to_string(&IpcCommand::Unpin { window_id: 0x000A_0B0C }).expect("serialize");
    assert_eq!(json, r#"{"type":"unpin","window_id":658188}"#);

    let json = serde_json::to_string(&IpcCommand::RefreshSnapshot { window_id: 7 }).expect("serialize");
    assert_eq!(json, r#"{"type":"refresh_snapshot","window_id":7}"#);
}

#[test]
fn test_switch_command_direction() {
    let cmd: IpcCommand = serde_json::from_str(r#"{"type":"switch","direction":"previous"}"#).expect("parse");
    assert_eq!(
        cmd,
        IpcCommand::Switch {
            direction: IpcDirection::Previous
        }
    );

    let result: Result<IpcCommand, _> = serde_json::from_str(r#"{"type":"switch","direction":"up"}"#);
    assert!(result.is_err(), "Unknown direction should be rejected");
}

#[test]
fn test_unit_commands_need_only_type() {
    for (json, expected) in [
        (r#"{"type":"list_pinned"}"#, IpcCommand::ListPinned),
        (r#"{"type":"list_windows"}"#, IpcCommand::ListWindows),
        (r#"{"type":"list_monitors"}"#, IpcCommand::ListMonitors),
        (r#"{"type":"restore"}"#, IpcCommand::Restore),
        (r#"{"type":"query_status"}"#, IpcCommand::QueryStatus),
        (r#"{"type":"reload"}"#, IpcCommand::Reload),
        (r#"{"type":"stop"}"#, IpcCommand::Stop),
    ] {
        let parsed: IpcCommand = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed, expected, "for {}", json);
    }
}

#[test]
fn test_pin_without_window_id_is_rejected() {
    let result: Result<IpcCommand, _> = serde_json::from_str(r#"{"type":"pin"}"#);
    assert!(result.is_err());
}

// ============================================================================
// Protocol framing
// ============================================================================

/// Messages are single lines; the newline terminates the request.
#[test]
fn test_messages_are_single_line() {
    let resp = IpcResponse::error("line one\nline two");
    let json = serde_json::to_string(&resp).expect("serialize");
    assert!(!json.contains('\n'), "Embedded newlines must be escaped");

    let framed = format!("{}\n", json);
    let parsed: IpcResponse = serde_json::from_str(framed.trim()).expect("parse trimmed");
    assert_eq!(parsed, resp);
}

#[test]
fn test_typical_request_fits_message_limit() {
    let json = serde_json::to_string(&IpcCommand::Pin { window_id: u64::MAX }).expect("serialize");
    assert!(json.len() < MAX_IPC_MESSAGE_SIZE);
}

// ============================================================================
// Responses
// ============================================================================

#[test]
fn test_error_response_special_chars() {
    let error_msg = "Window 0x1234 is not pinned: \"Notepad\" <untitled> & more";
    let json = serde_json::to_string(&IpcResponse::error(error_msg)).expect("serialize");
    let parsed: IpcResponse = serde_json::from_str(&json).expect("deserialize");

    match parsed {
        IpcResponse::Error { message } => assert_eq!(message, error_msg),
        _ => panic!("Expected Error response"),
    }
}

#[test]
fn test_restored_response_lists_vanished_windows() {
    let json = r#"{"status":"restored","count_restored":2,"count_pruned":1,"vanished":[4660]}"#;
    let parsed: IpcResponse = serde_json::from_str(json).expect("parse");
    assert_eq!(
        parsed,
        IpcResponse::Restored {
            count_restored: 2,
            count_pruned: 1,
            vanished: vec![0x1234],
        }
    );
}

#[test]
fn test_status_without_previous_cycle() {
    let resp = IpcResponse::Status {
        enabled: true,
        pinned: 0,
        monitors: 1,
        detector: "idle".to_string(),
        last_result: None,
        uptime_secs: 5,
    };
    let json = serde_json::to_string(&resp).expect("serialize");
    assert!(json.contains(r#""last_result":null"#));

    let parsed: IpcResponse = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(parsed, resp);
}

#[test]
fn test_status_with_previous_cycle() {
    let json = r#"{"status":"status","enabled":false,"pinned":3,"monitors":2,"detector":"cooldown",
        "last_result":{"count_restored":3,"count_pruned":0},"uptime_secs":120}"#;
    let parsed: IpcResponse = serde_json::from_str(json).expect("parse");

    match parsed {
        IpcResponse::Status {
            enabled,
            pinned,
            last_result,
            ..
        } => {
            assert!(!enabled);
            assert_eq!(pinned, 3);
            assert_eq!(
                last_result,
                Some(RestoreSummary {
                    count_restored: 3,
                    count_pruned: 0
                })
            );
        }
        _ => panic!("Expected Status"),
    }
}

#[test]
fn test_pinned_window_list() {
    let resp = IpcResponse::PinnedWindows {
        windows: vec![PinnedWindowInfo {
            window_id: 100,
            title: "Notes".to_string(),
            class_name: "Notepad".to_string(),
            rect: IpcRect {
                x: -1920,
                y: 0,
                width: 800,
                height: 600,
            },
            show_state: "normal".to_string(),
            monitor: "1920x1080@-1920,0".to_string(),
        }],
    };

    let json = serde_json::to_string(&resp).expect("serialize");
    assert!(json.starts_with(r#"{"status":"pinned_windows""#));
    let parsed: IpcResponse = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(parsed, resp);
}

#[test]
fn test_monitor_list_keeps_primary_flag() {
    let full = IpcRect {
        x: 0,
        y: 0,
        width: 2560,
        height: 1440,
    };
    let resp = IpcResponse::Monitors {
        monitors: vec![MonitorSummary {
            id: "2560x1440@0,0".to_string(),
            device_name: r"\\.\DISPLAY1".to_string(),
            rect: full,
            work_area: IpcRect { height: 1400, ..full },
            is_primary: true,
        }],
    };

    let json = serde_json::to_string(&resp).expect("serialize");
    let parsed: IpcResponse = serde_json::from_str(&json).expect("deserialize");
    match parsed {
        IpcResponse::Monitors { monitors } => {
            assert_eq!(monitors.len(), 1);
            assert!(monitors[0].is_primary);
            assert_eq!(monitors[0].device_name, r"\\.\DISPLAY1");
            assert_eq!(monitors[0].work_area.height, 1400);
        }
        _ => panic!("Expected Monitors"),
    }
}

#[test]
fn test_unknown_status_is_rejected() {
    let result: Result<IpcResponse, _> = serde_json::from_str(r#"{"status":"workspace_state"}"#);
    assert!(result.is_err());
}
