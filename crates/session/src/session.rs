//! Session orchestration for termhub.
//!
//! Owns every interactive session (local PTY shells and SSH channels),
//! drives their connection state machine, streams their output to an
//! [`EventSink`], and drains them on shutdown.

mod connection;
pub mod driver;
mod entry;
pub mod error;
pub mod events;
pub mod liveness;
pub mod local;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod remote;
mod sampler;
pub mod shutdown;
pub mod status;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use serde::{Deserialize, Serialize};
use settings::constants;
use std::path::PathBuf;
use std::time::Duration;

pub use driver::{
    AuthMethod, HostKeyCheck, LocalControl, LocalDriver, LocalProcess, LocalSpawnRequest,
    RemoteChannel, RemoteControl, RemoteDriver, RemoteTarget, RemoteTransport, TermSize,
};
pub use error::{hint_for, normalize_error_message, SessionError};
pub use events::{ChannelSink, EventSink, SessionEvent};
pub use local::PtyDriver;
pub use messages::MessageKind;
pub use metrics::{MetricHistory, MetricSeries, MetricsRecorder};
pub use registry::{LocalSessionRequest, RemoteSessionRequest, SessionInfo, SessionRegistry};
pub use remote::Ssh2Driver;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use status::ConnectionStatus;

/// Opaque session identity, caller-supplied or a generated UUID.
pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Local,
    Remote,
}

/// Runtime tuning for a [`SessionRegistry`], usually derived from the
/// user's `config.toml`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub term: String,
    pub default_shell: Option<String>,
    pub default_working_directory: Option<PathBuf>,
    pub animation_tick: Duration,
    pub connect_timeout: Duration,
    /// Idle time on a connected remote channel before probing it.
    pub keepalive_interval: Duration,
    /// Probe cadence while a session is hanging.
    pub hang_threshold: Duration,
    /// Hanging longer than this fails the session.
    pub hang_fail_after: Duration,
    pub default_update_rate_ms: u64,
    /// Sample local shell processes into the metrics recorder.
    pub sample_local_processes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: constants::sessions::DEFAULT_MAX_SESSIONS,
            term: constants::sessions::TERM.to_string(),
            default_shell: None,
            default_working_directory: None,
            animation_tick: constants::timing::ANIMATION_TICK,
            connect_timeout: constants::timing::CONNECT_TIMEOUT,
            keepalive_interval: constants::timing::KEEPALIVE_INTERVAL,
            hang_threshold: constants::timing::HANG_THRESHOLD,
            hang_fail_after: constants::timing::HANG_FAIL_AFTER,
            default_update_rate_ms: constants::metrics::DEFAULT_UPDATE_RATE_MS,
            sample_local_processes: false,
        }
    }
}

impl From<&settings::Config> for SessionConfig {
    fn from(config: &settings::Config) -> Self {
        Self {
            max_sessions: config.max_sessions,
            term: config.term.clone(),
            default_shell: config.default_shell.clone(),
            default_working_directory: config
                .default_working_directory
                .as_deref()
                .map(expand_home),
            animation_tick: config.animation_tick(),
            connect_timeout: config.ssh.connect_timeout(),
            keepalive_interval: config.ssh.keepalive_interval(),
            hang_threshold: config.ssh.hang_threshold(),
            hang_fail_after: config.ssh.hang_fail_after(),
            default_update_rate_ms: config.metrics.default_update_rate_ms,
            sample_local_processes: config.metrics.enabled,
        }
    }
}

/// Get the user's default shell, falling back to `/bin/sh`.
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}
