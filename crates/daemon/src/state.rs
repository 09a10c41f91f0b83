//! Daemon state and command handling.
//!
//! `AppState` owns the pin registry, the monitor topology and the detection worker.
//! The event loop feeds it IPC commands, hotkeys, display changes and worker
//! reports; it never touches Win32 directly.

use crate::config::Config;
use crate::filter::FilteredWindowSystem;
use crate::pins::PinStore;
use crate::worker::{self, CycleOutcome, CycleReport, RestoreReply, WorkerContext, WorkerHandle};
use anyhow::Result;
use deskpin_core_engine::{
    DetectorState, MonitorInfo, MonitorTopology, PinError, PinnedWindow, PinnedWindowRegistry,
    Rect, RestorationResult, RestoreReport, ShowState, SwitchDirection, TopologySnapshot, WindowHandle,
    WindowSystem,
};
use deskpin_ipc::{
    IpcCommand, IpcDirection, IpcRect, IpcResponse, MonitorSummary, PinnedWindowInfo,
    RestoreSummary, WindowSummary,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How the event loop should answer a command.
pub enum Reply {
    /// Answer immediately.
    Now(IpcResponse),
    /// Answer once the worker has finished a manual restoration.
    Later(RestoreReply),
}

pub struct AppState {
    config: Config,
    /// Unfiltered window system; the filter is rebuilt from it on reload.
    raw_window_system: Arc<dyn WindowSystem>,
    window_system: Arc<FilteredWindowSystem>,
    registry: Arc<PinnedWindowRegistry>,
    topology: Arc<MonitorTopology>,
    pin_store: Option<PinStore>,
    worker: Option<WorkerHandle>,
    reports: mpsc::Sender<CycleReport>,
    enabled: bool,
    last_result: Option<RestorationResult>,
    /// Windows pruned by the last cycle because their monitor went away.
    last_vanished: usize,
    start_time: Instant,
}

impl AppState {
    /// Build the state and start the detection worker. Must run inside a tokio runtime.
    pub fn new(
        mut config: Config,
        window_system: Arc<dyn WindowSystem>,
        pin_store: Option<PinStore>,
        reports: mpsc::Sender<CycleReport>,
    ) -> Self {
        for w in config.validate() {
            warn!("Config: {}", w);
        }

        let topology = Arc::new(MonitorTopology::default());
        let snapshot = topology.refresh(window_system.as_ref());
        info!("Detected {} monitor(s)", snapshot.len());
        for m in snapshot.monitors() {
            info!(
                "  Monitor {} (work area {}){} \"{}\"",
                m.id,
                m.work_area,
                if m.is_primary { " [PRIMARY]" } else { "" },
                m.device_name
            );
        }

        let filtered = Arc::new(FilteredWindowSystem::new(
            Arc::clone(&window_system),
            config.compiled_rules(),
        ));

        let mut state = Self {
            enabled: config.behavior.enabled,
            config,
            raw_window_system: window_system,
            window_system: filtered,
            registry: Arc::new(PinnedWindowRegistry::new()),
            topology,
            pin_store,
            worker: None,
            reports,
            last_result: None,
            last_vanished: 0,
            start_time: Instant::now(),
        };
        state.start_worker();
        state
    }

    fn start_worker(&mut self) {
        let ctx = WorkerContext {
            window_system: self.window_system.clone(),
            registry: Arc::clone(&self.registry),
            topology: Arc::clone(&self.topology),
            detection: self.config.detection.detection_config(),
            scope: self.config.detection.scope,
        };
        self.worker = Some(worker::spawn_worker(ctx, self.reports.clone()));
    }

    /// Match the saved pins to live windows and rewrite the file without the
    /// ones that could not be matched.
    pub fn load_pins(&self) {
        let Some(store) = &self.pin_store else {
            return;
        };
        let saved = match store.load() {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Failed to load saved pins: {:#}", e);
                return;
            }
        };
        if saved.is_empty() {
            return;
        }

        let snapshot = self.topology.snapshot();
        match self
            .registry
            .resolve_identities(self.window_system.as_ref(), &snapshot, &saved)
        {
            Ok(report) => {
                info!(
                    "Restored {} pin(s) from {}, dropped {}",
                    report.resolved.len(),
                    store.path().display(),
                    report.dropped.len()
                );
                if !report.dropped.is_empty() {
                    self.persist();
                }
            }
            Err(e) => error!("Failed to resolve saved pins: {}", e),
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.pin_store {
            if let Err(e) = store.save(&self.registry.identities()) {
                warn!("Failed to save pins: {:#}", e);
            }
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        info!("Pinning {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Forward a switch hotkey to the worker. Returns whether it was queued.
    pub fn on_hotkey(&self, direction: SwitchDirection) -> bool {
        if !self.enabled {
            debug!("Ignoring {} hotkey: pinning disabled", direction);
            return false;
        }
        match &self.worker {
            Some(worker) => worker.signal(direction).is_ok(),
            None => false,
        }
    }

    /// Re-read the monitor layout after a display change.
    ///
    /// Pins on a monitor that went away are pruned by the next restoration.
    pub fn on_display_change(&self) {
        let before = self.topology.snapshot();
        let after = self.topology.refresh(self.raw_window_system.as_ref());
        info!("Display configuration changed: {} -> {} monitor(s)", before.len(), after.len());

        let orphaned = self
            .registry
            .list()
            .iter()
            .filter(|p| !after.contains(p.snapshot.monitor))
            .count();
        if orphaned > 0 {
            warn!("{} pinned window(s) are on a monitor that is no longer connected", orphaned);
        }
    }

    /// Record the outcome of a worker cycle.
    pub fn on_cycle_finished(&mut self, report: &CycleReport) {
        match &report.outcome {
            CycleOutcome::Restored(restored) => {
                info!(
                    "{} handled in {:?}: {} restored, {} pruned",
                    report.trigger,
                    report.elapsed,
                    restored.count_restored(),
                    restored.count_pruned()
                );
                self.last_vanished = restored.vanished().count();
                if self.last_vanished > 0 {
                    warn!(
                        "{} pinned window(s) were unpinned because their monitor disconnected",
                        self.last_vanished
                    );
                }
                if restored.count_pruned() > 0 {
                    self.persist();
                }
                self.last_result = Some(restored.result());
            }
            CycleOutcome::NoSwitch => {
                debug!("{}: no desktop switch observed", report.trigger);
            }
            CycleOutcome::Aborted(reason) => {
                warn!("{} aborted: {}", report.trigger, reason);
            }
            CycleOutcome::Failed(e) => {
                error!("{} failed: {}", report.trigger, e);
            }
        }
    }

    /// One-line summary for the tray tooltip.
    pub fn status_line(&self) -> String {
        let mut line = format!("deskpin: {} pinned", self.registry.len());
        if !self.enabled {
            line.push_str(" (disabled)");
        }
        if let Some(result) = self.last_result {
            line.push_str(&format!(
                "\nLast restore: {} restored, {} pruned",
                result.count_restored, result.count_pruned
            ));
        }
        if self.last_vanished > 0 {
            line.push_str(&format!("\n{} unpinned: monitor disconnected", self.last_vanished));
        }
        line
    }

    pub async fn handle_command(&mut self, cmd: IpcCommand) -> Reply {
        let response = match cmd {
            IpcCommand::Pin { window_id } => self.pin(window_id),
            IpcCommand::Unpin { window_id } => self.unpin(window_id),
            IpcCommand::RefreshSnapshot { window_id } => self.refresh_snapshot(window_id),
            IpcCommand::ListPinned => IpcResponse::PinnedWindows {
                windows: self.list_pinned(),
            },
            IpcCommand::ListWindows => self.list_windows(),
            IpcCommand::ListMonitors => IpcResponse::Monitors {
                monitors: self.current_monitor_list(),
            },
            IpcCommand::Restore => {
                return match self.worker.as_ref().map(WorkerHandle::restore_now) {
                    Some(Ok(reply)) => Reply::Later(reply),
                    Some(Err(e)) => Reply::Now(IpcResponse::error(e.to_string())),
                    None => Reply::Now(IpcResponse::error("Detection worker is not running")),
                };
            }
            IpcCommand::Switch { direction } => {
                let direction = match direction {
                    IpcDirection::Previous => SwitchDirection::Previous,
                    IpcDirection::Next => SwitchDirection::Next,
                };
                if !self.enabled {
                    IpcResponse::error("Pinning is disabled")
                } else if self.on_hotkey(direction) {
                    IpcResponse::Ok
                } else {
                    IpcResponse::error("Detection worker is busy")
                }
            }
            IpcCommand::QueryStatus => self.status(),
            IpcCommand::Reload => match self.reload().await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::error(format!("Failed to reload config: {:#}", e)),
            },
            IpcCommand::Stop => {
                info!("Stop command received");
                IpcResponse::Ok
            }
        };
        Reply::Now(response)
    }

    fn pin(&self, window_id: WindowHandle) -> IpcResponse {
        if let Ok(info) = self.window_system.window_info(window_id) {
            if self.window_system.is_ignored(&info) {
                return IpcResponse::error(format!(
                    "Window {:#x} matches an ignore rule and cannot be pinned",
                    window_id
                ));
            }
        }

        let snapshot = self.known_topology();
        match self
            .registry
            .add(self.window_system.as_ref(), &snapshot, window_id)
        {
            Ok(_) => {
                self.persist();
                IpcResponse::Ok
            }
            Err(e) => IpcResponse::error(e.to_string()),
        }
    }

    fn unpin(&self, window_id: WindowHandle) -> IpcResponse {
        if self.registry.remove(window_id) {
            self.persist();
        } else {
            debug!("Unpin of {:#x}: not pinned", window_id);
        }
        IpcResponse::Ok
    }

    fn refresh_snapshot(&self, window_id: WindowHandle) -> IpcResponse {
        let snapshot = self.known_topology();
        match self
            .registry
            .refresh_snapshot(self.window_system.as_ref(), &snapshot, window_id)
        {
            Ok(_) => {
                self.persist();
                IpcResponse::Ok
            }
            Err(e) => {
                if matches!(e, PinError::StaleHandle(_)) {
                    self.persist();
                }
                IpcResponse::error(e.to_string())
            }
        }
    }

    /// Current topology, re-enumerated first if no monitor is known yet.
    fn known_topology(&self) -> Arc<TopologySnapshot> {
        let snapshot = self.topology.snapshot();
        if !snapshot.is_empty() {
            return snapshot;
        }
        self.topology.refresh(self.raw_window_system.as_ref())
    }

    /// Pinned windows, ordered by handle.
    pub fn list_pinned(&self) -> Vec<PinnedWindowInfo> {
        self.registry.list().iter().map(pinned_info).collect()
    }

    fn list_windows(&self) -> IpcResponse {
        match self.window_system.enumerate_windows() {
            Ok(windows) => IpcResponse::Windows {
                windows: windows
                    .into_iter()
                    .map(|w| WindowSummary {
                        window_id: w.handle,
                        pinned: self.registry.contains(w.handle),
                        title: w.title,
                        class_name: w.class_name,
                        process_id: w.process_id,
                        rect: ipc_rect(w.rect),
                    })
                    .collect(),
            },
            Err(e) => IpcResponse::error(format!("Failed to enumerate windows: {}", e)),
        }
    }

    /// Connected monitors, ordered left to right.
    pub fn current_monitor_list(&self) -> Vec<MonitorSummary> {
        self.topology
            .snapshot()
            .monitors()
            .iter()
            .map(monitor_summary)
            .collect()
    }

    fn status(&self) -> IpcResponse {
        let detector = self
            .worker
            .as_ref()
            .map(WorkerHandle::detector_state)
            .unwrap_or(DetectorState::Idle);
        IpcResponse::Status {
            enabled: self.enabled,
            pinned: self.registry.len(),
            monitors: self.topology.snapshot().len(),
            detector: detector_label(detector).to_string(),
            last_result: self.last_result.map(|r| RestoreSummary {
                count_restored: r.count_restored,
                count_pruned: r.count_pruned,
            }),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Re-read the config file and restart the worker with the new settings.
    pub async fn reload(&mut self) -> Result<()> {
        let config = Config::load()?;
        self.apply_config(config).await;
        Ok(())
    }

    /// Apply a new configuration. Pins are kept.
    pub async fn apply_config(&mut self, mut config: Config) {
        for w in config.validate() {
            warn!("Config: {}", w);
        }
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }

        self.window_system = Arc::new(FilteredWindowSystem::new(
            Arc::clone(&self.raw_window_system),
            config.compiled_rules(),
        ));
        self.enabled = config.behavior.enabled;
        self.config = config;
        self.start_worker();

        info!(
            "Configuration applied: poll={}ms, timeout={}ms, cooldown={}ms, {} ignore rule(s)",
            self.config.detection.poll_interval_ms,
            self.config.detection.timeout_ms,
            self.config.detection.cooldown_ms,
            self.config.ignore_rules.len()
        );
    }

    /// Stop the worker and save the pins.
    pub async fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        self.persist();
    }
}

/// Wait for a manual restoration and turn it into a response.
pub async fn await_restore(reply: RestoreReply) -> IpcResponse {
    match reply.await {
        Ok(result) => restored_response(result),
        Err(_) => IpcResponse::error("Detection worker stopped before restoring"),
    }
}

fn restored_response(result: Result<RestoreReport, PinError>) -> IpcResponse {
    match result {
        Ok(report) => IpcResponse::Restored {
            count_restored: report.count_restored(),
            count_pruned: report.count_pruned(),
            vanished: report.vanished().collect(),
        },
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

fn ipc_rect(rect: Rect) -> IpcRect {
    IpcRect {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
    }
}

fn show_state_label(show_state: ShowState) -> &'static str {
    match show_state {
        ShowState::Normal => "normal",
        ShowState::Minimized => "minimized",
        ShowState::Maximized => "maximized",
    }
}

fn detector_label(state: DetectorState) -> &'static str {
    match state {
        DetectorState::Idle => "idle",
        DetectorState::Armed => "armed",
        DetectorState::Confirming => "confirming",
        DetectorState::Confirmed => "confirmed",
        DetectorState::TimedOut => "timed_out",
        DetectorState::Cooldown => "cooldown",
    }
}

fn pinned_info(pin: &PinnedWindow) -> PinnedWindowInfo {
    PinnedWindowInfo {
        window_id: pin.handle,
        title: pin.title.clone(),
        class_name: pin.class_name.clone(),
        rect: ipc_rect(pin.snapshot.rect()),
        show_state: show_state_label(pin.snapshot.show_state()).to_string(),
        monitor: pin.snapshot.monitor.to_string(),
    }
}

fn monitor_summary(monitor: &MonitorInfo) -> MonitorSummary {
    MonitorSummary {
        id: monitor.id.to_string(),
        device_name: monitor.device_name.clone(),
        rect: ipc_rect(monitor.rect),
        work_area: ipc_rect(monitor.work_area),
        is_primary: monitor.is_primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreRule;
    use crate::worker::CycleTrigger;
    use deskpin_core_engine::mock::MockWindowSystem;
    use std::time::Duration;

    const CHAT: u64 = 0x100;
    const EDITOR: u64 = 0x200;
    const OVERLAY: u64 = 0x300;

    fn monitors() -> Vec<MonitorInfo> {
        vec![
            MonitorInfo::new(Rect::new(0, 0, 1920, 1080), Rect::new(0, 0, 1920, 1040), true, "DISPLAY1"),
            MonitorInfo::new(
                Rect::new(1920, 0, 1920, 1080),
                Rect::new(1920, 0, 1920, 1040),
                false,
                "DISPLAY2",
            ),
        ]
    }

    fn mock() -> Arc<MockWindowSystem> {
        let ws = Arc::new(MockWindowSystem::new());
        ws.set_monitors(monitors());
        ws.add_window(CHAT, "Chat", "ChatClass", Rect::new(2020, 100, 800, 600));
        ws.add_window(EDITOR, "Editor", "EditorClass", Rect::new(100, 100, 1200, 900));
        ws.add_window(OVERLAY, "Overlay", "OverlayClass", Rect::new(0, 0, 300, 100));
        ws
    }

    fn config() -> Config {
        Config {
            ignore_rules: vec![IgnoreRule {
                match_class: Some("^OverlayClass$".to_string()),
                match_title: None,
            }],
            ..Config::default()
        }
    }

    fn state_with(ws: Arc<MockWindowSystem>, store: Option<PinStore>) -> (AppState, mpsc::Receiver<CycleReport>) {
        let (tx, rx) = mpsc::channel(8);
        (AppState::new(config(), ws, store, tx), rx)
    }

    async fn command(state: &mut AppState, cmd: IpcCommand) -> IpcResponse {
        match state.handle_command(cmd).await {
            Reply::Now(response) => response,
            Reply::Later(reply) => await_restore(reply).await,
        }
    }

    fn temp_store(name: &str) -> PinStore {
        let dir = std::env::temp_dir().join(format!("deskpin-state-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        PinStore::new(dir.join("pinned-windows.json"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_list_unpin() {
        let (mut state, _rx) = state_with(mock(), None);

        assert_eq!(command(&mut state, IpcCommand::Pin { window_id: CHAT }).await, IpcResponse::Ok);
        let IpcResponse::PinnedWindows { windows } = command(&mut state, IpcCommand::ListPinned).await else {
            panic!("Expected PinnedWindows response");
        };
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].window_id, CHAT);
        assert_eq!(windows[0].title, "Chat");
        assert_eq!(windows[0].monitor, "1920x1080@1920,0");
        assert_eq!(windows[0].show_state, "normal");

        assert_eq!(command(&mut state, IpcCommand::Unpin { window_id: CHAT }).await, IpcResponse::Ok);
        assert!(state.list_pinned().is_empty());
        // Unpinning again is not an error.
        assert_eq!(command(&mut state, IpcCommand::Unpin { window_id: CHAT }).await, IpcResponse::Ok);

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_errors() {
        let (mut state, _rx) = state_with(mock(), None);
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;

        let again = command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;
        assert!(matches!(again, IpcResponse::Error { message } if message.contains("already pinned")));

        let missing = command(&mut state, IpcCommand::Pin { window_id: 0xdead }).await;
        assert!(matches!(missing, IpcResponse::Error { message } if message.contains("no longer exists")));

        let ignored = command(&mut state, IpcCommand::Pin { window_id: OVERLAY }).await;
        assert!(matches!(ignored, IpcResponse::Error { message } if message.contains("ignore rule")));

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_windows_marks_pinned_and_hides_ignored() {
        let (mut state, _rx) = state_with(mock(), None);
        command(&mut state, IpcCommand::Pin { window_id: EDITOR }).await;

        let IpcResponse::Windows { windows } = command(&mut state, IpcCommand::ListWindows).await else {
            panic!("Expected Windows response");
        };
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().any(|w| w.window_id == EDITOR && w.pinned));
        assert!(windows.iter().any(|w| w.window_id == CHAT && !w.pinned));
        assert!(windows.iter().all(|w| w.window_id != OVERLAY));

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_monitors() {
        let (state, _rx) = state_with(mock(), None);
        let monitors = state.current_monitor_list();
        assert_eq!(monitors.len(), 2);
        assert!(monitors[0].is_primary);
        assert_eq!(monitors[1].id, "1920x1080@1920,0");
        assert_eq!(monitors[1].device_name, "DISPLAY2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_snapshot_updates_baseline() {
        let ws = mock();
        let (mut state, _rx) = state_with(ws.clone(), None);
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;

        ws.move_window(CHAT, Rect::new(2400, 300, 800, 600));
        let response = command(&mut state, IpcCommand::RefreshSnapshot { window_id: CHAT }).await;
        assert_eq!(response, IpcResponse::Ok);
        assert_eq!(state.list_pinned()[0].rect, IpcRect { x: 2400, y: 300, width: 800, height: 600 });

        let not_pinned = command(&mut state, IpcCommand::RefreshSnapshot { window_id: EDITOR }).await;
        assert!(matches!(not_pinned, IpcResponse::Error { .. }));

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_command_replies_with_counts() {
        let ws = mock();
        let (mut state, mut rx) = state_with(ws.clone(), None);
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;
        command(&mut state, IpcCommand::Pin { window_id: EDITOR }).await;
        ws.move_window(CHAT, Rect::new(0, 0, 800, 600));
        ws.remove_window(EDITOR);

        let response = command(&mut state, IpcCommand::Restore).await;
        assert_eq!(
            response,
            IpcResponse::Restored {
                count_restored: 1,
                count_pruned: 1,
                vanished: vec![],
            }
        );

        let report = rx.recv().await.unwrap();
        assert_eq!(report.trigger, CycleTrigger::Manual);
        state.on_cycle_finished(&report);
        assert_eq!(
            state.last_result,
            Some(RestorationResult {
                count_restored: 1,
                count_pruned: 1
            })
        );
        assert!(state.status_line().contains("1 restored, 1 pruned"));

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_state() {
        let (mut state, _rx) = state_with(mock(), None);
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;

        let IpcResponse::Status {
            enabled,
            pinned,
            monitors,
            detector,
            last_result,
            ..
        } = command(&mut state, IpcCommand::QueryStatus).await
        else {
            panic!("Expected Status response");
        };
        assert!(enabled);
        assert_eq!(pinned, 1);
        assert_eq!(monitors, 2);
        assert_eq!(detector, "idle");
        assert_eq!(last_result, None);

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_ignores_hotkeys() {
        let ws = mock();
        let (mut state, mut rx) = state_with(ws.clone(), None);
        state.set_enabled(false);

        assert!(!state.on_hotkey(SwitchDirection::Next));
        let response = command(
            &mut state,
            IpcCommand::Switch {
                direction: IpcDirection::Next,
            },
        )
        .await;
        assert!(matches!(response, IpcResponse::Error { .. }));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(ws.visible_enumerations(), 0);
        assert!(state.status_line().contains("(disabled)"));

        state.set_enabled(true);
        assert!(state.on_hotkey(SwitchDirection::Next));

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_command_runs_cycle() {
        let (mut state, mut rx) = state_with(mock(), None);
        let response = command(
            &mut state,
            IpcCommand::Switch {
                direction: IpcDirection::Previous,
            },
        )
        .await;
        assert_eq!(response, IpcResponse::Ok);

        let report = rx.recv().await.unwrap();
        assert_eq!(report.trigger, CycleTrigger::Hotkey(SwitchDirection::Previous));
        assert_eq!(report.outcome, CycleOutcome::NoSwitch);

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pins_survive_restart() {
        let store = temp_store("restart");
        let ws = mock();

        let (mut state, _rx) = state_with(ws.clone(), Some(store.clone()));
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;
        command(&mut state, IpcCommand::Pin { window_id: EDITOR }).await;
        state.shutdown().await;
        assert_eq!(store.load().unwrap().len(), 2);

        // The editor was closed while the daemon was down.
        ws.remove_window(EDITOR);
        let (mut restarted, _rx) = state_with(ws, Some(store.clone()));
        restarted.load_pins();
        let pinned = restarted.list_pinned();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].window_id, CHAT);
        assert_eq!(store.load().unwrap().len(), 1);

        restarted.shutdown().await;
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_pin_on_other_desktop() {
        let store = temp_store("other-desktop");
        let ws = mock();

        let (mut state, _rx) = state_with(ws.clone(), Some(store.clone()));
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;
        state.shutdown().await;

        // The daemon restarts while the user is on a desktop where the chat window is cloaked.
        ws.set_visible(CHAT, false);
        let (mut restarted, _rx) = state_with(ws, Some(store.clone()));
        restarted.load_pins();
        assert_eq!(restarted.list_pinned().len(), 1);
        assert_eq!(store.load().unwrap().len(), 1);

        restarted.shutdown().await;
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_waits_for_monitor_enumeration() {
        let ws = mock();
        ws.fail_monitor_enumeration(true);
        let (mut state, _rx) = state_with(ws.clone(), None);
        assert!(state.current_monitor_list().is_empty());

        let response = command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;
        assert!(matches!(response, IpcResponse::Error { message } if message.contains("enumerate monitors")));
        assert!(state.list_pinned().is_empty());

        // Enumeration recovers; the pin retries it and records the real monitor.
        ws.fail_monitor_enumeration(false);
        assert_eq!(command(&mut state, IpcCommand::Pin { window_id: CHAT }).await, IpcResponse::Ok);
        assert_eq!(state.list_pinned()[0].monitor, "1920x1080@1920,0");

        let response = command(&mut state, IpcCommand::Restore).await;
        assert!(matches!(response, IpcResponse::Restored { count_pruned: 0, .. }));
        assert_eq!(state.list_pinned().len(), 1);

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_change_refreshes_topology() {
        let ws = mock();
        let (mut state, _rx) = state_with(ws.clone(), None);
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;

        ws.set_monitors(vec![monitors().remove(0)]);
        state.on_display_change();
        assert_eq!(state.current_monitor_list().len(), 1);

        let response = command(&mut state, IpcCommand::Restore).await;
        assert_eq!(
            response,
            IpcResponse::Restored {
                count_restored: 0,
                count_pruned: 1,
                vanished: vec![CHAT],
            }
        );

        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_config_restarts_worker() {
        let (mut state, _rx) = state_with(mock(), None);
        command(&mut state, IpcCommand::Pin { window_id: CHAT }).await;

        let mut config = Config::default();
        config.detection.timeout_ms = 500;
        config.behavior.enabled = false;
        state.apply_config(config).await;

        assert!(!state.enabled());
        assert_eq!(state.config.detection.timeout_ms, 500);
        // Pins are kept across a reload, and the overlay is no longer ignored.
        assert_eq!(state.list_pinned().len(), 1);
        assert_eq!(command(&mut state, IpcCommand::Pin { window_id: OVERLAY }).await, IpcResponse::Ok);

        state.shutdown().await;
    }
}
