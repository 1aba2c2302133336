//! Idle-probe bookkeeping behind the `Hanging` status.
//!
//! Pure state: the remote reader feeds it clock readings and probe results
//! and acts on what it returns.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Idle time on a healthy channel before probing.
    pub probe_interval: Duration,
    /// Probe cadence once the session is hanging.
    pub retry_interval: Duration,
    /// Hanging for this long gives up on the session.
    pub fail_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    Wait,
    Probe,
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessChange {
    Hanging,
    Recovered,
}

#[derive(Debug)]
pub struct LivenessMonitor {
    config: LivenessConfig,
    last_activity: Instant,
    last_probe: Option<Instant>,
    hanging_since: Option<Instant>,
}

impl LivenessMonitor {
    pub fn new(config: LivenessConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            last_probe: None,
            hanging_since: None,
        }
    }

    pub fn is_hanging(&self) -> bool {
        self.hanging_since.is_some()
    }

    /// Data arrived from the server.
    pub fn record_activity(&mut self, now: Instant) -> Option<LivenessChange> {
        self.last_activity = now;
        self.last_probe = None;
        self.hanging_since
            .take()
            .map(|_| LivenessChange::Recovered)
    }

    /// Decide what to do after a read came back empty.
    pub fn poll(&self, now: Instant) -> LivenessAction {
        if let Some(since) = self.hanging_since {
            if now.saturating_duration_since(since) >= self.config.fail_after {
                return LivenessAction::GiveUp;
            }
        }

        let cadence = if self.is_hanging() {
            self.config.retry_interval
        } else {
            self.config.probe_interval
        };
        let reference = self.last_probe.unwrap_or(self.last_activity).max(self.last_activity);
        if now.saturating_duration_since(reference) >= cadence {
            LivenessAction::Probe
        } else {
            LivenessAction::Wait
        }
    }

    pub fn record_probe(&mut self, answered: bool, now: Instant) -> Option<LivenessChange> {
        self.last_probe = Some(now);
        match (answered, self.hanging_since) {
            (true, Some(_)) => {
                self.hanging_since = None;
                Some(LivenessChange::Recovered)
            }
            (false, None) => {
                self.hanging_since = Some(now);
                Some(LivenessChange::Hanging)
            }
            _ => None,
        }
    }
}
