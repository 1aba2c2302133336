//! Bounded teardown of every session.

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::{SessionId, SessionRegistry};

/// Outcome of a shutdown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions whose readers finished before the deadline.
    pub closed: Vec<SessionId>,
    /// Sessions still draining when the deadline passed.
    pub abandoned: Vec<SessionId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// Closes all sessions concurrently under one global deadline.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownCoordinator {
    deadline: Duration,
}

impl ShutdownCoordinator {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn from_settings(config: &settings::Config) -> Self {
        Self::new(config.shutdown_deadline())
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Close every session and wait for them, at most until the deadline.
    ///
    /// A session that does not finish in time is abandoned with a warning;
    /// one slow session never delays the others past the deadline.
    pub async fn run(&self, registry: &SessionRegistry) -> ShutdownReport {
        let ids = registry.session_ids();
        let deadline = Instant::now() + self.deadline;
        tracing::info!(
            "Shutting down {} sessions (deadline {:?})",
            ids.len(),
            self.deadline
        );

        let mut pending: JoinSet<(SessionId, bool)> = JoinSet::new();
        for id in ids.iter().cloned() {
            let registry = registry.clone();
            pending.spawn(async move {
                let closer = registry.clone();
                let close_id = id.clone();
                let closed = tokio::task::spawn_blocking(move || closer.close(&close_id)).await;
                match closed {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(session_id = %id, "Close failed: {}", e),
                    Err(e) => tracing::warn!(session_id = %id, "Close task failed: {}", e),
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                let finished = registry.wait_for_close(&id, remaining).await.is_ok();
                (id, finished)
            });
        }

        let mut report = ShutdownReport::default();
        loop {
            match tokio::time::timeout_at(deadline, pending.join_next()).await {
                Ok(Some(Ok((id, true)))) => report.closed.push(id),
                Ok(Some(Ok((id, false)))) => report.abandoned.push(id),
                Ok(Some(Err(e))) => tracing::warn!("Shutdown task failed: {}", e),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        // Whatever has not reported by now missed the deadline.
        pending.abort_all();
        for id in ids {
            if !report.closed.contains(&id) && !report.abandoned.contains(&id) {
                report.abandoned.push(id);
            }
        }
        for id in &report.abandoned {
            tracing::warn!(session_id = %id, "Session did not close before the shutdown deadline");
        }

        registry.cleanup_messages();
        tracing::info!(
            closed = report.closed.len(),
            abandoned = report.abandoned.len(),
            "Shutdown complete"
        );
        report
    }
}
