//! System tray icon management for the deskpin daemon.
//!
//! Provides a system tray icon with a context menu:
//! - Enabled toggle
//! - Restore Now
//! - Refresh Monitors
//! - Reload Config / Open Config
//! - Exit
//!
//! The icon lives on its own thread, which runs the message loop the icon's hidden
//! window needs. Status updates are stored in a shared slot and the thread is
//! woken with a thread message to apply them.

use std::sync::{mpsc, Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use tray_icon::{
    menu::{CheckMenuItem, Menu, MenuEvent, MenuItem, PredefinedMenuItem},
    TrayIcon, TrayIconBuilder,
};
use windows::Win32::Foundation::{LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetMessageW, PostThreadMessageW, TranslateMessage, MSG, WM_APP, WM_QUIT,
};

/// Thread message telling the tray thread to apply the pending status.
const WM_TRAY_UPDATE: u32 = WM_APP + 1;

/// Menu item IDs for tray context menu.
mod menu_ids {
    pub const TOGGLE_ENABLED: &str = "toggle_enabled";
    pub const RESTORE_NOW: &str = "restore_now";
    pub const REFRESH_MONITORS: &str = "refresh_monitors";
    pub const RELOAD: &str = "reload";
    pub const OPEN_CONFIG: &str = "open_config";
    pub const EXIT: &str = "exit";
}

/// Events emitted by the tray icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayEvent {
    /// User clicked the "Enabled" item.
    ToggleEnabled,
    /// User clicked "Restore Now".
    RestoreNow,
    /// User clicked "Refresh Monitors".
    RefreshMonitors,
    /// User clicked "Reload Config".
    Reload,
    /// User clicked "Open Config".
    OpenConfig,
    /// User clicked "Exit".
    Exit,
}

impl TrayEvent {
    fn from_menu_id(id: &str) -> Option<Self> {
        match id {
            menu_ids::TOGGLE_ENABLED => Some(TrayEvent::ToggleEnabled),
            menu_ids::RESTORE_NOW => Some(TrayEvent::RestoreNow),
            menu_ids::REFRESH_MONITORS => Some(TrayEvent::RefreshMonitors),
            menu_ids::RELOAD => Some(TrayEvent::Reload),
            menu_ids::OPEN_CONFIG => Some(TrayEvent::OpenConfig),
            menu_ids::EXIT => Some(TrayEvent::Exit),
            _ => None,
        }
    }
}

/// What the tray shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayStatus {
    pub enabled: bool,
    pub tooltip: String,
}

/// Manages the system tray icon and context menu.
pub struct TrayManager {
    thread_id: u32,
    pending: Arc<Mutex<Option<TrayStatus>>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TrayManager {
    /// Create the tray icon on a dedicated thread.
    ///
    /// `on_event` is called from the menu event thread for every click; returning
    /// `false` stops that thread.
    pub fn new(
        initial: TrayStatus,
        on_event: impl Fn(TrayEvent) -> bool + Send + 'static,
    ) -> Result<Self, TrayError> {
        let pending = Arc::new(Mutex::new(None));
        let (init_tx, init_rx) = mpsc::channel::<Result<u32, TrayError>>();

        let thread_pending = Arc::clone(&pending);
        let thread = std::thread::Builder::new()
            .name("tray".to_string())
            .spawn(move || run_tray(initial, thread_pending, init_tx))
            .map_err(|e| TrayError::Build(format!("Failed to spawn tray thread: {e}")))?;

        let thread_id = match init_rx.recv() {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(TrayError::Build("Tray thread exited during setup".to_string()));
            }
        };

        // Spawn thread to handle menu events and forward them
        std::thread::Builder::new()
            .name("tray-menu".to_string())
            .spawn(move || {
                let menu_channel = MenuEvent::receiver();
                while let Ok(event) = menu_channel.recv() {
                    let Some(tray_event) = TrayEvent::from_menu_id(event.id.0.as_str()) else {
                        debug!("Unknown menu item clicked: {}", event.id.0);
                        continue;
                    };
                    if !on_event(tray_event) {
                        break;
                    }
                }
            })
            .map_err(|e| TrayError::Build(format!("Failed to spawn tray menu thread: {e}")))?;

        Ok(Self {
            thread_id,
            pending,
            thread: Some(thread),
        })
    }

    /// Update the checkbox and tooltip.
    pub fn update(&self, status: TrayStatus) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *pending = Some(status);
        }
        if let Err(e) = unsafe { PostThreadMessageW(self.thread_id, WM_TRAY_UPDATE, WPARAM(0), LPARAM(0)) } {
            warn!("Failed to wake tray thread: {}", e);
        }
    }
}

impl Drop for TrayManager {
    fn drop(&mut self) {
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct TrayWidgets {
    tray: TrayIcon,
    enabled: CheckMenuItem,
}

fn build_tray(initial: &TrayStatus) -> Result<TrayWidgets, TrayError> {
    let menu = Menu::new();

    let title = MenuItem::new("deskpin", false, None);
    menu.append(&title).map_err(|e| TrayError::Menu(e.to_string()))?;
    menu.append(&PredefinedMenuItem::separator())
        .map_err(|e| TrayError::Menu(e.to_string()))?;

    let enabled = CheckMenuItem::with_id(menu_ids::TOGGLE_ENABLED, "Enabled", true, initial.enabled, None);
    menu.append(&enabled).map_err(|e| TrayError::Menu(e.to_string()))?;

    let restore = MenuItem::with_id(menu_ids::RESTORE_NOW, "Restore Now", true, None);
    menu.append(&restore).map_err(|e| TrayError::Menu(e.to_string()))?;

    let refresh = MenuItem::with_id(menu_ids::REFRESH_MONITORS, "Refresh Monitors", true, None);
    menu.append(&refresh).map_err(|e| TrayError::Menu(e.to_string()))?;

    menu.append(&PredefinedMenuItem::separator())
        .map_err(|e| TrayError::Menu(e.to_string()))?;

    let reload = MenuItem::with_id(menu_ids::RELOAD, "Reload Config", true, None);
    menu.append(&reload).map_err(|e| TrayError::Menu(e.to_string()))?;

    let open_config = MenuItem::with_id(menu_ids::OPEN_CONFIG, "Open Config", true, None);
    menu.append(&open_config).map_err(|e| TrayError::Menu(e.to_string()))?;

    menu.append(&PredefinedMenuItem::separator())
        .map_err(|e| TrayError::Menu(e.to_string()))?;

    let exit = MenuItem::with_id(menu_ids::EXIT, "Exit", true, None);
    menu.append(&exit).map_err(|e| TrayError::Menu(e.to_string()))?;

    let tray = TrayIconBuilder::new()
        .with_menu(Box::new(menu))
        .with_tooltip(&initial.tooltip)
        .with_icon(create_default_icon()?)
        .build()
        .map_err(|e| TrayError::Build(e.to_string()))?;

    Ok(TrayWidgets { tray, enabled })
}

fn run_tray(
    initial: TrayStatus,
    pending: Arc<Mutex<Option<TrayStatus>>>,
    init_tx: mpsc::Sender<Result<u32, TrayError>>,
) {
    let widgets = match build_tray(&initial) {
        Ok(widgets) => widgets,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    // Creating the icon's window gave this thread a message queue.
    let _ = init_tx.send(Ok(unsafe { GetCurrentThreadId() }));
    info!("System tray icon created");

    let mut msg = MSG::default();
    loop {
        let result = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        if !result.as_bool() {
            break;
        }
        if msg.message == WM_TRAY_UPDATE && msg.hwnd.is_invalid() {
            let status = pending.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(status) = status {
                apply_status(&widgets, &status);
            }
            continue;
        }
        unsafe {
            let _ = TranslateMessage(&msg);
            let _ = DispatchMessageW(&msg);
        }
    }

    debug!("Tray thread exiting");
}

fn apply_status(widgets: &TrayWidgets, status: &TrayStatus) {
    widgets.enabled.set_checked(status.enabled);
    if let Err(e) = widgets.tray.set_tooltip(Some(&status.tooltip)) {
        warn!("Failed to update tray tooltip: {}", e);
    }
}

/// Create a default icon for the tray.
///
/// Draws a push pin: a round red head over a grey needle.
fn create_default_icon() -> Result<tray_icon::Icon, TrayError> {
    const SIZE: usize = 32;
    let mut rgba = vec![0u8; SIZE * SIZE * 4];

    let head = (220u8, 53u8, 69u8);
    let needle = (120u8, 120u8, 120u8);
    let (cx, cy, radius) = (16.0f32, 11.0f32, 9.0f32);

    for y in 0..SIZE {
        for x in 0..SIZE {
            let idx = (y * SIZE + x) * 4;
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let dist = (dx * dx + dy * dy).sqrt();

            let pixel = if dist < radius {
                Some((head, 255u8))
            } else if dist < radius + 1.5 {
                // Anti-aliased edge
                let alpha = ((radius + 1.5 - dist) / 1.5 * 255.0) as u8;
                Some((head, alpha))
            } else if (15..=16).contains(&x) && y >= 20 && y < SIZE - 1 {
                Some((needle, 255u8))
            } else {
                None
            };

            if let Some(((r, g, b), a)) = pixel {
                rgba[idx] = r;
                rgba[idx + 1] = g;
                rgba[idx + 2] = b;
                rgba[idx + 3] = a;
            }
        }
    }

    tray_icon::Icon::from_rgba(rgba, SIZE as u32, SIZE as u32)
        .map_err(|e| TrayError::Icon(e.to_string()))
}

/// Errors that can occur during tray operations.
#[derive(Debug, Error)]
pub enum TrayError {
    #[error("Failed to create menu: {0}")]
    Menu(String),

    #[error("Failed to build tray icon: {0}")]
    Build(String),

    #[error("Failed to create icon: {0}")]
    Icon(String),
}
