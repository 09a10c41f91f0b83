//! Restoration of pinned windows after a confirmed desktop switch.

use crate::registry::PinnedWindowRegistry;
use crate::topology::{MonitorId, TopologySnapshot};
use crate::{PinError, WindowHandle, WindowSystem, WindowSystemError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Why an entry was removed from the registry during restoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PruneReason {
    /// The window no longer exists.
    StaleHandle,
    /// The monitor the window was pinned on is no longer connected.
    MonitorVanished { monitor: MonitorId },
}

/// Counts reported to the UI after each restoration cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationResult {
    pub count_restored: usize,
    pub count_pruned: usize,
}

/// Per-window outcome of one restoration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<WindowHandle>,
    pub unchanged: Vec<WindowHandle>,
    pub pruned: Vec<(WindowHandle, PruneReason)>,
    pub failed: Vec<(WindowHandle, String)>,
}

impl RestoreReport {
    pub fn count_restored(&self) -> usize {
        self.restored.len()
    }

    pub fn count_pruned(&self) -> usize {
        self.pruned.len()
    }

    /// Handles pruned because their monitor disappeared.
    pub fn vanished(&self) -> impl Iterator<Item = WindowHandle> + '_ {
        self.pruned
            .iter()
            .filter(|(_, reason)| matches!(reason, PruneReason::MonitorVanished { .. }))
            .map(|(handle, _)| *handle)
    }

    pub fn result(&self) -> RestorationResult {
        RestorationResult {
            count_restored: self.count_restored(),
            count_pruned: self.count_pruned(),
        }
    }
}

/// Re-applies baseline geometry to pinned windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestorationEngine;

impl RestorationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Restore every pinned window to its baseline.
    ///
    /// Stale handles and windows whose monitor vanished are pruned. A failure on one
    /// window is logged and the batch continues; only an unreachable window system
    /// aborts the pass (after committing the prunes found so far).
    /// Window-system calls are made without holding the registry lock.
    pub fn restore(
        &self,
        registry: &PinnedWindowRegistry,
        topology: &TopologySnapshot,
        window_system: &dyn WindowSystem,
    ) -> Result<RestoreReport, PinError> {
        let mut report = RestoreReport::default();

        for entry in registry.list() {
            let handle = entry.handle;
            let saved = entry.snapshot;

            let current = match window_system.window_geometry(handle) {
                Ok(geometry) => geometry,
                Err(WindowSystemError::NotFound(_)) => {
                    info!("{}; pruning", PinError::StaleHandle(handle));
                    report.pruned.push((handle, PruneReason::StaleHandle));
                    continue;
                }
                Err(WindowSystemError::Unavailable(reason)) => {
                    return Err(self.abort(registry, &report, reason));
                }
                Err(e) => {
                    warn!("Failed to read window {:#x}: {}", handle, e);
                    report.failed.push((handle, e.to_string()));
                    continue;
                }
            };

            // An empty topology means enumeration never succeeded, not that every
            // monitor went away.
            if !topology.is_empty() && !topology.contains(saved.monitor) {
                warn!(
                    "{}; pruning",
                    PinError::MonitorVanished {
                        handle,
                        monitor: saved.monitor,
                    }
                );
                report.pruned.push((
                    handle,
                    PruneReason::MonitorVanished {
                        monitor: saved.monitor,
                    },
                ));
                continue;
            }

            if current == saved.geometry {
                report.unchanged.push(handle);
                continue;
            }

            let now_on = topology.resolve(&current.rect);
            debug!(
                "Window {:#x} drifted to {} on {} (visible: {}); restoring {} on {}",
                handle,
                current.rect,
                now_on,
                current.visible,
                saved.rect(),
                saved.monitor
            );

            match window_system.apply_geometry(handle, &saved.geometry) {
                Ok(()) => report.restored.push(handle),
                Err(WindowSystemError::NotFound(_)) => {
                    info!("{}; pruning", PinError::StaleHandle(handle));
                    report.pruned.push((handle, PruneReason::StaleHandle));
                }
                Err(WindowSystemError::Unavailable(reason)) => {
                    return Err(self.abort(registry, &report, reason));
                }
                Err(WindowSystemError::ApiFailure(message)) => {
                    warn!("{}", PinError::ApiFailure { handle, message: message.clone() });
                    report.failed.push((handle, message));
                }
            }
        }

        self.commit_prunes(registry, &report);
        info!(
            "Restoration pass: {} restored, {} unchanged, {} pruned, {} failed",
            report.restored.len(),
            report.unchanged.len(),
            report.pruned.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn commit_prunes(&self, registry: &PinnedWindowRegistry, report: &RestoreReport) {
        let handles: Vec<WindowHandle> = report.pruned.iter().map(|(h, _)| *h).collect();
        if !handles.is_empty() {
            registry.prune(&handles);
        }
    }

    fn abort(&self, registry: &PinnedWindowRegistry, report: &RestoreReport, reason: String) -> PinError {
        self.commit_prunes(registry, report);
        let err = PinError::WindowSystemUnavailable(reason);
        error!("Restoration aborted: {}", err);
        err
    }
}
