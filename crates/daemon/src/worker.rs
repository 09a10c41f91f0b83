//! Detection worker.
//!
//! A single tokio task owns the [`DesktopSwitchDetector`]. Requests arrive on a
//! bounded queue and are handled strictly in order: a direction signal runs one
//! detection cycle (baseline, polls, restoration), a manual restore runs the
//! restoration engine directly. Since only this task restores, two restorations
//! never overlap.
//!
//! Signals that arrive while a cycle or cooldown is active are coalesced.

use crate::config::DetectionScope;
use deskpin_core_engine::{
    DesktopFingerprint, DesktopSwitchDetector, DetectionConfig, DetectorState, FingerprintScope,
    MonitorTopology, PinError, PinnedWindowRegistry, PollOutcome, RestorationEngine,
    RestorationResult, RestoreReport, SignalDisposition, SwitchDirection, TopologySnapshot,
    WindowSystem,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the request queue.
pub const REQUEST_QUEUE_CAPACITY: usize = 16;

/// Reply channel for a manual restoration.
pub type RestoreReply = oneshot::Receiver<Result<RestoreReport, PinError>>;

enum WorkerRequest {
    Signal(SwitchDirection),
    RestoreNow(oneshot::Sender<Result<RestoreReport, PinError>>),
}

/// Why a request was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("Detection worker is busy")]
    QueueFull,
    #[error("Detection worker is not running")]
    Stopped,
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    Hotkey(SwitchDirection),
    Manual,
}

impl std::fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleTrigger::Hotkey(direction) => write!(f, "{} switch", direction),
            CycleTrigger::Manual => write!(f, "manual restore"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Restoration ran.
    Restored(RestoreReport),
    /// No desktop switch was observed before the deadline.
    NoSwitch,
    /// The baseline fingerprint could not be captured.
    Aborted(String),
    /// Restoration hit a fatal window-system error.
    Failed(PinError),
}

/// Summary of one finished cycle, sent to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub trigger: CycleTrigger,
    pub outcome: CycleOutcome,
    pub elapsed: Duration,
}

impl CycleReport {
    /// Counts for the UI, when restoration ran.
    pub fn result(&self) -> Option<RestorationResult> {
        match &self.outcome {
            CycleOutcome::Restored(report) => Some(report.result()),
            _ => None,
        }
    }
}

/// Everything a worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub window_system: Arc<dyn WindowSystem>,
    pub registry: Arc<PinnedWindowRegistry>,
    pub topology: Arc<MonitorTopology>,
    pub detection: DetectionConfig,
    pub scope: DetectionScope,
}

/// Handle to a running worker.
pub struct WorkerHandle {
    requests: mpsc::Sender<WorkerRequest>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<DetectorState>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queue a direction signal without waiting.
    pub fn signal(&self, direction: SwitchDirection) -> Result<(), WorkerError> {
        self.try_send(WorkerRequest::Signal(direction)).inspect_err(|e| {
            debug!("Dropped {} signal: {}", direction, e);
        })
    }

    /// Queue a manual restoration; the reply arrives once it has run.
    pub fn restore_now(&self) -> Result<RestoreReply, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.try_send(WorkerRequest::RestoreNow(tx))?;
        Ok(rx)
    }

    fn try_send(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.requests.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WorkerError::Stopped,
        })
    }

    /// Last state published by the detector.
    pub fn detector_state(&self) -> DetectorState {
        *self.state.borrow()
    }

    /// Stop the worker, cancelling any cycle in progress. Queued requests are dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Detection worker panicked: {}", e);
        }
    }
}

/// Spawn the worker on the current tokio runtime.
pub fn spawn_worker(ctx: WorkerContext, reports: mpsc::Sender<CycleReport>) -> WorkerHandle {
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(DetectorState::Idle);

    let worker = Worker {
        detector: DesktopSwitchDetector::new(ctx.detection),
        engine: RestorationEngine::new(),
        ctx,
        state_tx,
        reports,
    };
    let task = tokio::spawn(worker.run(request_rx, shutdown_rx));

    WorkerHandle {
        requests: request_tx,
        shutdown: shutdown_tx,
        state: state_rx,
        task,
    }
}

/// Monotonic time that follows tokio's clock, so paused-time tests stay consistent.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn fingerprint_scope(scope: DetectionScope, topology: &TopologySnapshot) -> FingerprintScope {
    match scope {
        DetectionScope::AllMonitors => FingerprintScope::AllMonitors,
        DetectionScope::PrimaryMonitor => topology
            .primary()
            .map(|m| FingerprintScope::Monitor(m.id))
            .unwrap_or_default(),
    }
}

struct Worker {
    ctx: WorkerContext,
    detector: DesktopSwitchDetector,
    engine: RestorationEngine,
    state_tx: watch::Sender<DetectorState>,
    reports: mpsc::Sender<CycleReport>,
}

impl Worker {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<WorkerRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(
            "Detection worker started (poll {:?}, timeout {:?}, cooldown {:?})",
            self.ctx.detection.poll_interval, self.ctx.detection.timeout, self.ctx.detection.cooldown
        );

        loop {
            let cooldown = self.detector.cooldown_remaining(now());
            let request = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(cooldown.unwrap_or_default()), if cooldown.is_some() => {
                    self.detector.tick(now());
                    self.publish();
                    continue;
                }
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let report = match request {
                WorkerRequest::Signal(direction) => {
                    if self.detector.on_signal(direction, now()) == SignalDisposition::Coalesced {
                        continue;
                    }
                    match self.detect(direction, &mut shutdown).await {
                        Some(report) => report,
                        None => break,
                    }
                }
                WorkerRequest::RestoreNow(reply) => self.restore_now(reply),
            };

            if self.reports.send(report).await.is_err() {
                debug!("Report receiver closed");
                break;
            }
        }

        debug!("Detection worker stopped");
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.detector.state());
    }

    /// Run one detection cycle. Returns `None` when cancelled by shutdown.
    async fn detect(
        &mut self,
        direction: SwitchDirection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<CycleReport> {
        let started = now();
        let trigger = CycleTrigger::Hotkey(direction);
        let window_system = Arc::clone(&self.ctx.window_system);
        let topology = self.ctx.topology.snapshot();
        let scope = fingerprint_scope(self.ctx.scope, &topology);

        let baseline = match DesktopFingerprint::capture(window_system.as_ref(), &topology, scope) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!("Failed to capture baseline fingerprint: {}", e);
                return Some(report(trigger, CycleOutcome::Aborted(e.to_string()), started));
            }
        };

        self.detector.arm(direction, baseline, started);
        self.detector.begin_confirming();
        self.publish();

        let polled = loop {
            let delay = self.detector.next_poll_delay(now());
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    self.detector.abort(now());
                    self.publish();
                    debug!("Detection cycle cancelled by shutdown");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = match DesktopFingerprint::capture(window_system.as_ref(), &topology, scope) {
                Ok(current) => self.detector.poll(&current, now()),
                Err(e) => {
                    debug!("Fingerprint poll failed: {}", e);
                    self.detector.poll_failed(now())
                }
            };
            if outcome != PollOutcome::Pending {
                break outcome;
            }
        };
        self.publish();

        let outcome = if polled == PollOutcome::Confirmed {
            let snapshot = self.ctx.topology.snapshot();
            match self
                .engine
                .restore(&self.ctx.registry, &snapshot, window_system.as_ref())
            {
                Ok(restored) => CycleOutcome::Restored(restored),
                Err(e) => CycleOutcome::Failed(e),
            }
        } else {
            debug!(
                "{}; nothing to restore",
                PinError::DetectionTimeout(self.detector.config().timeout)
            );
            CycleOutcome::NoSwitch
        };

        self.detector.finish(now());
        self.publish();
        Some(report(trigger, outcome, started))
    }

    fn restore_now(&mut self, reply: oneshot::Sender<Result<RestoreReport, PinError>>) -> CycleReport {
        let started = now();
        let snapshot = self.ctx.topology.snapshot();
        let result = self
            .engine
            .restore(&self.ctx.registry, &snapshot, self.ctx.window_system.as_ref());

        let outcome = match &result {
            Ok(restored) => CycleOutcome::Restored(restored.clone()),
            Err(e) => CycleOutcome::Failed(e.clone()),
        };
        if reply.send(result).is_err() {
            debug!("Manual restore requester went away");
        }
        report(CycleTrigger::Manual, outcome, started)
    }
}

fn report(trigger: CycleTrigger, outcome: CycleOutcome, started: Instant) -> CycleReport {
    CycleReport {
        trigger,
        outcome,
        elapsed: now().saturating_duration_since(started),
    }
}
