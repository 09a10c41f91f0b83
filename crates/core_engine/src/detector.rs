//! Desktop switch detection state machine.
//!
//! ```text
//! Idle -> Armed -> Confirming -> Confirmed -> Cooldown -> Idle
//!                            \-> TimedOut  -/
//! ```
//!
//! The machine does no I/O and never sleeps. The caller captures fingerprints,
//! waits between polls, and passes a monotonic `now` into every transition.

use crate::fingerprint::DesktopFingerprint;
use crate::SwitchDirection;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    /// Waiting for a direction signal.
    Idle,
    /// Baseline captured, polling not yet started.
    Armed,
    /// Polling for a fingerprint change.
    Confirming,
    /// Fingerprint changed before the deadline.
    Confirmed,
    /// Deadline reached without a change.
    TimedOut,
    /// Quiet period after a cycle.
    Cooldown,
}

impl DetectorState {
    /// A cycle is in progress (anything but `Idle` and `Cooldown`).
    pub fn is_busy(&self) -> bool {
        !matches!(self, DetectorState::Idle | DetectorState::Cooldown)
    }
}

/// Timing parameters for detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionConfig {
    /// Interval between fingerprint polls.
    pub poll_interval: Duration,
    /// How long to wait for the fingerprint to change.
    pub timeout: Duration,
    /// Quiet period after every cycle.
    pub cooldown: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(30),
            timeout: Duration::from_millis(300),
            cooldown: Duration::from_millis(1500),
        }
    }
}

/// What to do with an incoming direction signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    /// Start a cycle: capture a baseline and call [`DesktopSwitchDetector::arm`].
    Arm,
    /// A cycle or cooldown is active; the signal is folded into it.
    Coalesced,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No change yet; poll again after [`DesktopSwitchDetector::next_poll_delay`].
    Pending,
    Confirmed,
    TimedOut,
}

/// The hotkey-to-confirmation state machine.
#[derive(Debug, Clone)]
pub struct DesktopSwitchDetector {
    config: DetectionConfig,
    state: DetectorState,
    direction: Option<SwitchDirection>,
    baseline: Option<DesktopFingerprint>,
    deadline: Option<Instant>,
    cooldown_until: Option<Instant>,
    coalesced: u64,
}

impl DesktopSwitchDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            state: DetectorState::Idle,
            direction: None,
            baseline: None,
            deadline: None,
            cooldown_until: None,
            coalesced: 0,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Direction of the cycle in progress.
    pub fn direction(&self) -> Option<SwitchDirection> {
        self.direction
    }

    /// Total number of signals folded into an active cycle or cooldown.
    pub fn coalesced_signals(&self) -> u64 {
        self.coalesced
    }

    /// Classify a direction signal. Expires a finished cooldown first.
    pub fn on_signal(&mut self, direction: SwitchDirection, now: Instant) -> SignalDisposition {
        self.tick(now);
        if self.state == DetectorState::Idle {
            return SignalDisposition::Arm;
        }
        self.coalesced += 1;
        debug!(
            "Coalesced {} signal while detector is {:?}",
            direction, self.state
        );
        SignalDisposition::Coalesced
    }

    /// `Idle -> Armed` with the baseline fingerprint A.
    pub fn arm(&mut self, direction: SwitchDirection, baseline: DesktopFingerprint, now: Instant) -> bool {
        self.tick(now);
        if self.state != DetectorState::Idle {
            return false;
        }
        debug!(
            "Armed for {} switch: baseline {} window(s), digest {:016x}",
            direction,
            baseline.len(),
            baseline.digest()
        );
        self.direction = Some(direction);
        self.baseline = Some(baseline);
        self.deadline = Some(now + self.config.timeout);
        self.state = DetectorState::Armed;
        true
    }

    /// `Armed -> Confirming`.
    pub fn begin_confirming(&mut self) -> bool {
        if self.state != DetectorState::Armed {
            return false;
        }
        self.state = DetectorState::Confirming;
        true
    }

    /// Compare a freshly captured fingerprint B against the baseline.
    ///
    /// A change wins over an elapsed deadline: a switch observed on the last poll
    /// still counts.
    pub fn poll(&mut self, current: &DesktopFingerprint, now: Instant) -> PollOutcome {
        if self.state != DetectorState::Confirming {
            return self.poll_outcome();
        }

        if self.baseline.as_ref() != Some(current) {
            debug!(
                "Switch confirmed: {} window(s) visible, digest {:016x}",
                current.len(),
                current.digest()
            );
            self.state = DetectorState::Confirmed;
            return PollOutcome::Confirmed;
        }

        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.state = DetectorState::TimedOut;
            return PollOutcome::TimedOut;
        }

        PollOutcome::Pending
    }

    /// Record a poll whose capture failed. It counts as "no change".
    pub fn poll_failed(&mut self, now: Instant) -> PollOutcome {
        if self.state != DetectorState::Confirming {
            return self.poll_outcome();
        }
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.state = DetectorState::TimedOut;
            return PollOutcome::TimedOut;
        }
        PollOutcome::Pending
    }

    fn poll_outcome(&self) -> PollOutcome {
        match self.state {
            DetectorState::Confirmed => PollOutcome::Confirmed,
            DetectorState::TimedOut => PollOutcome::TimedOut,
            _ => PollOutcome::Pending,
        }
    }

    /// Time to wait before the next poll, never past the deadline.
    pub fn next_poll_delay(&self, now: Instant) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .config
                .poll_interval
                .min(deadline.saturating_duration_since(now)),
            None => self.config.poll_interval,
        }
    }

    /// `Confirmed | TimedOut -> Cooldown`.
    pub fn finish(&mut self, now: Instant) -> bool {
        if !matches!(self.state, DetectorState::Confirmed | DetectorState::TimedOut) {
            return false;
        }
        self.state = DetectorState::Cooldown;
        self.cooldown_until = Some(now + self.config.cooldown);
        self.baseline = None;
        self.deadline = None;
        true
    }

    /// Abandon an armed or confirming cycle (baseline capture failed, shutdown).
    ///
    /// The cooldown still applies so that a failing window system is not hammered.
    pub fn abort(&mut self, now: Instant) {
        if matches!(self.state, DetectorState::Armed | DetectorState::Confirming) {
            self.state = DetectorState::TimedOut;
            self.finish(now);
        }
    }

    /// `Cooldown -> Idle` once the cooldown has elapsed.
    pub fn tick(&mut self, now: Instant) -> DetectorState {
        if self.state == DetectorState::Cooldown
            && self.cooldown_until.is_some_and(|until| now >= until)
        {
            self.state = DetectorState::Idle;
            self.cooldown_until = None;
            self.direction = None;
        }
        self.state
    }

    /// Time left in the current cooldown.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.cooldown_until) {
            (DetectorState::Cooldown, Some(until)) => Some(until.saturating_duration_since(now)),
            _ => None,
        }
    }
}

impl Default for DesktopSwitchDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}
