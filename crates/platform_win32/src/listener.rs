//! Background listener for hotkeys and display changes.
//!
//! # Architecture
//!
//! A dedicated thread owns a hidden top-level window (which receives the
//! `WM_DISPLAYCHANGE` broadcast) and a `WH_KEYBOARD_LL` hook, and runs the message
//! loop both need. The hook only observes keys and never swallows them, so the
//! OS still performs the desktop switch itself.
//!
//! The hook callback runs on the system's input path. It updates the modifier
//! tracker and does a non-blocking channel send, nothing more.

use crate::hotkey::HotkeyTracker;
use crate::{PlatformEvent, Win32Error};
use std::ffi::c_void;
use std::sync::mpsc;
use std::sync::Mutex;
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::KeyboardAndMouse::KBDLLHOOKSTRUCT;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
    GetMessageW, PostMessageW, RegisterClassW, SetWindowsHookExW, UnhookWindowsHookEx, MSG,
    WH_KEYBOARD_LL, WINDOW_EX_STYLE, WM_DISPLAYCHANGE, WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN,
    WM_SYSKEYUP, WM_USER, WNDCLASSW, WS_OVERLAPPED,
};

/// Custom message to quit the listener thread.
const WM_QUIT_LISTENER: u32 = WM_USER + 201;

/// State shared with the hook and window procedures.
///
/// Win32 callbacks carry no user pointer for low-level hooks, hence the static.
static LISTENER_STATE: Mutex<Option<ListenerState>> = Mutex::new(None);

struct ListenerState {
    tracker: HotkeyTracker,
    sender: mpsc::Sender<PlatformEvent>,
}

/// Running listener thread. Dropping it removes the hook and joins the thread.
pub struct PlatformListener {
    hwnd: HWND,
    thread: Option<std::thread::JoinHandle<()>>,
}

// The HWND is only used to post the quit message, which is thread-safe.
unsafe impl Send for PlatformListener {}

impl PlatformListener {
    /// Start the listener thread; events are delivered on `sender`.
    pub fn start(sender: mpsc::Sender<PlatformEvent>) -> Result<Self, Win32Error> {
        {
            let mut state = LISTENER_STATE.lock().unwrap_or_else(|e| e.into_inner());
            if state.is_some() {
                return Err(Win32Error::HookInstallFailed(
                    "listener already running".to_string(),
                ));
            }
            *state = Some(ListenerState {
                tracker: HotkeyTracker::new(),
                sender,
            });
        }

        let (init_tx, init_rx) = mpsc::channel::<Result<isize, Win32Error>>();

        let spawned = std::thread::Builder::new()
            .name("platform-listener".to_string())
            .spawn(move || unsafe { run_listener(init_tx) });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                clear_state();
                return Err(Win32Error::HookInstallFailed(format!(
                    "Failed to spawn listener thread: {e}"
                )));
            }
        };

        let init = init_rx
            .recv()
            .map_err(|_| Win32Error::HookInstallFailed("Listener thread init failed".to_string()))
            .and_then(|r| r);
        let hwnd_raw = match init {
            Ok(raw) => raw,
            Err(e) => {
                let _ = thread.join();
                clear_state();
                return Err(e);
            }
        };

        tracing::debug!("Platform listener started");

        Ok(Self {
            hwnd: HWND(hwnd_raw as *mut c_void),
            thread: Some(thread),
        })
    }
}

impl Drop for PlatformListener {
    fn drop(&mut self) {
        unsafe {
            let _ = PostMessageW(Some(self.hwnd), WM_QUIT_LISTENER, WPARAM(0), LPARAM(0));
        }

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        clear_state();

        tracing::debug!("Platform listener stopped");
    }
}

fn clear_state() {
    let mut state = LISTENER_STATE.lock().unwrap_or_else(|e| e.into_inner());
    *state = None;
}

fn send_event(event: PlatformEvent) {
    if let Ok(state) = LISTENER_STATE.lock() {
        if let Some(state) = state.as_ref() {
            let _ = state.sender.send(event);
        }
    }
}

unsafe fn run_listener(init_tx: mpsc::Sender<Result<isize, Win32Error>>) {
    let hinstance: Option<HINSTANCE> = GetModuleHandleW(None).ok().map(HINSTANCE::from);

    let class_name: Vec<u16> = "DeskpinListenerClass\0".encode_utf16().collect();
    let wc = WNDCLASSW {
        lpfnWndProc: Some(listener_window_proc),
        hInstance: hinstance.unwrap_or_default(),
        lpszClassName: windows::core::PCWSTR(class_name.as_ptr()),
        ..Default::default()
    };
    RegisterClassW(&wc);

    let hwnd = match CreateWindowExW(
        WINDOW_EX_STYLE(0),
        windows::core::PCWSTR(class_name.as_ptr()),
        None,
        WS_OVERLAPPED,
        0,
        0,
        0,
        0,
        None,
        None,
        hinstance,
        None,
    ) {
        Ok(hwnd) => hwnd,
        Err(e) => {
            let _ = init_tx.send(Err(Win32Error::WindowCreationFailed(e.to_string())));
            return;
        }
    };

    let hook = match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), hinstance, 0) {
        Ok(hook) => hook,
        Err(e) => {
            let _ = DestroyWindow(hwnd);
            let _ = init_tx.send(Err(Win32Error::HookInstallFailed(e.to_string())));
            return;
        }
    };

    let _ = init_tx.send(Ok(hwnd.0 as isize));

    let mut msg = MSG::default();
    loop {
        let result = GetMessageW(&mut msg, None, 0, 0);
        if !result.as_bool() {
            break;
        }
        if msg.message == WM_QUIT_LISTENER {
            break;
        }
        let _ = DispatchMessageW(&msg);
    }

    if let Err(e) = UnhookWindowsHookEx(hook) {
        tracing::warn!("Failed to remove keyboard hook: {}", e);
    }
    let _ = DestroyWindow(hwnd);
}

/// Low-level keyboard hook. Observes only; always passes the key on.
unsafe extern "system" fn keyboard_hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 {
        let _ = std::panic::catch_unwind(|| {
            let kbd = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
            let pressed = match wparam.0 as u32 {
                WM_KEYDOWN | WM_SYSKEYDOWN => Some(true),
                WM_KEYUP | WM_SYSKEYUP => Some(false),
                _ => None,
            };
            if let Some(pressed) = pressed {
                on_key(kbd.vkCode, pressed);
            }
        });
    }
    CallNextHookEx(None, code, wparam, lparam)
}

fn on_key(vk_code: u32, pressed: bool) {
    let Ok(mut state) = LISTENER_STATE.lock() else {
        return;
    };
    if let Some(state) = state.as_mut() {
        if let Some(direction) = state.tracker.on_key(vk_code, pressed) {
            let _ = state.sender.send(PlatformEvent::Hotkey(direction));
        }
    }
}

/// Window procedure for the hidden listener window.
///
/// Wrapped with catch_unwind to prevent panics from crossing the FFI boundary.
unsafe extern "system" fn listener_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_DISPLAYCHANGE {
        if std::panic::catch_unwind(|| send_event(PlatformEvent::DisplayChanged)).is_err() {
            tracing::error!("Panic while forwarding display change");
        }
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}
