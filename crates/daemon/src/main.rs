//! deskpin Daemon
//!
//! Keeps pinned windows where they were when the user switches virtual desktops.
//!
//! Responsibilities:
//! - Listen for the Win+Ctrl+Left/Right hotkeys and display changes
//! - Run the detection worker that confirms a switch and restores pinned windows
//! - Persist pinned windows across restarts
//! - Handle IPC commands from the CLI
//! - System tray icon and menu

#![cfg_attr(not(windows), allow(dead_code))]

mod config;
mod filter;
mod ipc_server;
mod pins;
mod state;
#[cfg(windows)]
mod tray;
mod worker;

use deskpin_core_engine::SwitchDirection;
use deskpin_ipc::{IpcCommand, IpcResponse};
use tokio::sync::oneshot;
use worker::CycleReport;

/// Events that the daemon event loop processes.
enum DaemonEvent {
    /// An IPC command from a CLI client.
    IpcCommand {
        cmd: IpcCommand,
        responder: oneshot::Sender<IpcResponse>,
    },
    /// The virtual-desktop switch hotkey was pressed.
    Hotkey(SwitchDirection),
    /// Display configuration changed.
    DisplayChanged,
    /// The detection worker finished a cycle.
    CycleFinished(CycleReport),
    /// A tray menu event.
    #[cfg(windows)]
    Tray(tray::TrayEvent),
    /// Shutdown signal.
    Shutdown,
}

#[cfg(windows)]
mod daemon {
    use super::*;
    use crate::config::Config;
    use crate::pins::PinStore;
    use crate::state::{await_restore, AppState, Reply};
    use crate::tray::{TrayEvent, TrayManager, TrayStatus};
    use anyhow::Result;
    use deskpin_ipc::PIPE_NAME;
    use deskpin_platform_win32::{set_dpi_awareness, PlatformEvent, PlatformListener, Win32WindowSystem};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tracing::{debug, error, info, warn};
    use tracing_subscriber::EnvFilter;

    /// Spawn a named forwarding thread that receives events from a std::sync::mpsc channel
    /// and forwards them to a tokio mpsc sender. Returns the JoinHandle for graceful shutdown.
    fn spawn_forwarding_thread<T: Send + 'static>(
        name: &str,
        receiver: std::sync::mpsc::Receiver<T>,
        sender: mpsc::Sender<DaemonEvent>,
        map_fn: impl Fn(T) -> DaemonEvent + Send + 'static,
    ) -> Result<std::thread::JoinHandle<()>> {
        let thread_name = name.to_string();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    if sender.blocking_send(map_fn(event)).is_err() {
                        break; // Channel closed, daemon shutting down
                    }
                }
            })
            .map_err(|e| anyhow::anyhow!("Failed to spawn {} thread: {}", thread_name, e))
    }

    fn init_logging(config: &Config) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.behavior.log_level.to_lowercase()));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
    }

    fn tray_status(state: &AppState) -> TrayStatus {
        TrayStatus {
            enabled: state.enabled(),
            tooltip: state.status_line(),
        }
    }

    fn open_config() {
        let Some(path) = config::preferred_config_path() else {
            warn!("No config location available");
            return;
        };
        if let Err(e) = Config::write_default_if_missing(&path) {
            warn!("{:#}", e);
            return;
        }
        if let Err(e) = std::process::Command::new("cmd")
            .args(["/c", "start", "", &path.to_string_lossy()])
            .spawn()
        {
            warn!("Failed to open {}: {}", path.display(), e);
        }
    }

    fn reply_later(reply: crate::worker::RestoreReply, responder: oneshot::Sender<IpcResponse>) {
        tokio::spawn(async move {
            let response = await_restore(reply).await;
            if responder.send(response).is_err() {
                debug!("Client disconnected before receiving IPC response");
            }
        });
    }

    pub async fn run() -> Result<()> {
        // Set DPI awareness before any window/GDI operations
        if !set_dpi_awareness() {
            eprintln!("[deskpin] Warning: Failed to set DPI awareness (may already be set)");
        }

        // Load configuration first (needed for log level)
        let config = Config::load().unwrap_or_else(|e| {
            // Can't use tracing yet, fall back to eprintln
            eprintln!("Failed to load configuration: {:#}. Using defaults.", e);
            Config::default()
        });
        init_logging(&config)?;

        info!("deskpin daemon starting...");
        info!("Version: {}", env!("CARGO_PKG_VERSION"));

        if ipc_server::check_already_running() {
            error!("Another deskpin daemon is already running (pipe {} is active)", PIPE_NAME);
            return Ok(());
        }

        let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(100);

        // Worker reports are forwarded into the event loop.
        let (report_tx, mut report_rx) = mpsc::channel::<CycleReport>(16);
        {
            let cycle_tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(report) = report_rx.recv().await {
                    if cycle_tx.send(DaemonEvent::CycleFinished(report)).await.is_err() {
                        break;
                    }
                }
            });
        }

        let pin_store = PinStore::default_location();
        if pin_store.is_none() {
            warn!("No data directory available; pins will not be saved");
        }
        let mut state = AppState::new(config, Arc::new(Win32WindowSystem::new()), pin_store, report_tx);
        state.load_pins();

        let mut thread_handles: Vec<std::thread::JoinHandle<()>> = Vec::new();

        // Hotkey hook and display-change window
        let (platform_tx, platform_rx) = std::sync::mpsc::channel::<PlatformEvent>();
        let listener = match PlatformListener::start(platform_tx) {
            Ok(listener) => {
                match spawn_forwarding_thread("platform-fwd", platform_rx, event_tx.clone(), |event| match event {
                    PlatformEvent::Hotkey(direction) => DaemonEvent::Hotkey(direction),
                    PlatformEvent::DisplayChanged => DaemonEvent::DisplayChanged,
                }) {
                    Ok(handle) => thread_handles.push(handle),
                    Err(e) => warn!("{}", e),
                }
                info!("Keyboard hook installed");
                Some(listener)
            }
            Err(e) => {
                error!("Failed to start platform listener: {}. Switches will not be detected.", e);
                None
            }
        };

        let tray = {
            let tray_tx = event_tx.clone();
            match TrayManager::new(tray_status(&state), move |event| {
                tray_tx.blocking_send(DaemonEvent::Tray(event)).is_ok()
            }) {
                Ok(manager) => Some(manager),
                Err(e) => {
                    warn!("Failed to create system tray icon: {}. Tray disabled.", e);
                    None
                }
            }
        };

        let ipc_tx = event_tx.clone();
        tokio::spawn(async move {
            ipc_server::run_ipc_server(ipc_tx).await;
        });
        info!("IPC server listening on {}", PIPE_NAME);

        // Install Ctrl+C handler so terminal kill triggers graceful shutdown
        {
            let shutdown_tx = event_tx.clone();
            tokio::spawn(async move {
                if let Ok(()) = tokio::signal::ctrl_c().await {
                    info!("Ctrl+C received, initiating shutdown...");
                    let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
                }
            });
        }

        info!("Ready. Use deskpin-cli to pin windows.");

        // Main event loop
        while let Some(event) = event_rx.recv().await {
            match event {
                DaemonEvent::IpcCommand { cmd, responder } => match state.handle_command(cmd).await {
                    Reply::Now(response) => {
                        if responder.send(response).is_err() {
                            debug!("Client disconnected before receiving IPC response");
                        }
                    }
                    Reply::Later(reply) => reply_later(reply, responder),
                },
                DaemonEvent::Hotkey(direction) => {
                    debug!("Switch hotkey: {}", direction);
                    state.on_hotkey(direction);
                }
                DaemonEvent::DisplayChanged => state.on_display_change(),
                DaemonEvent::CycleFinished(report) => state.on_cycle_finished(&report),
                DaemonEvent::Tray(tray_event) => match tray_event {
                    TrayEvent::ToggleEnabled => {
                        let enabled = !state.enabled();
                        state.set_enabled(enabled);
                    }
                    TrayEvent::RestoreNow => {
                        info!("Tray: Restore requested");
                        match state.handle_command(IpcCommand::Restore).await {
                            Reply::Later(reply) => {
                                tokio::spawn(async move {
                                    if let IpcResponse::Error { message } = await_restore(reply).await {
                                        warn!("Restore failed: {}", message);
                                    }
                                });
                            }
                            Reply::Now(IpcResponse::Error { message }) => warn!("Restore failed: {}", message),
                            Reply::Now(_) => {}
                        }
                    }
                    TrayEvent::RefreshMonitors => {
                        info!("Tray: Refresh monitors requested");
                        state.on_display_change();
                    }
                    TrayEvent::Reload => {
                        info!("Tray: Reload config requested");
                        if let Err(e) = state.reload().await {
                            warn!("Reload failed: {:#}", e);
                        }
                    }
                    TrayEvent::OpenConfig => {
                        info!("Tray: Open config requested");
                        open_config();
                    }
                    TrayEvent::Exit => {
                        info!("Tray: Exit requested");
                        let _ = event_tx.send(DaemonEvent::Shutdown).await;
                    }
                },
                DaemonEvent::Shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            if let Some(ref tray) = tray {
                tray.update(tray_status(&state));
            }
        }

        state.shutdown().await;

        // Dropping the listener removes the hook and closes the platform channel,
        // which ends the forwarding thread.
        drop(listener);
        drop(tray);
        info!("Waiting for forwarding threads to exit...");
        for handle in thread_handles {
            let _ = handle.join();
        }

        info!("deskpin daemon shutting down.");
        Ok(())
    }
}

#[cfg(windows)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    daemon::run().await
}

#[cfg(not(windows))]
fn main() {
    eprintln!("deskpin only runs on Windows.");
    std::process::exit(1);
}
