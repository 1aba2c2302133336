//! Centralized configuration constants for termhub.
//!
//! Compile-time defaults and hard limits, organized by the component that
//! consumes them.

/// Session admission and I/O.
pub mod sessions {
    /// Default cap on simultaneously active sessions.
    pub const DEFAULT_MAX_SESSIONS: usize = 64;
    /// Hard ceiling a config file can raise the cap to.
    pub const MAX_SESSIONS_CEILING: usize = 1024;
    /// Bytes read per output chunk.
    pub const READ_CHUNK_SIZE: usize = 4096;
    /// TERM value exported to local shells and requested for remote PTYs.
    pub const TERM: &str = "xterm-256color";
    /// Initial terminal geometry when the caller gives none.
    pub const DEFAULT_COLS: u16 = 80;
    pub const DEFAULT_ROWS: u16 = 24;
}

/// Timing configuration.
pub mod timing {
    use std::time::Duration;

    /// Global deadline for draining every session on shutdown.
    pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
    /// Tick of the "connecting" ellipsis animation.
    pub const ANIMATION_TICK: Duration = Duration::from_millis(500);
    /// TCP connect + handshake budget for remote sessions.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    /// Idle time on a connected channel before a liveness probe is sent.
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
    /// How long a probe may go unanswered before the session is hanging.
    pub const HANG_THRESHOLD: Duration = Duration::from_secs(10);
    /// How long a session may stay hanging before it is failed.
    pub const HANG_FAIL_AFTER: Duration = Duration::from_secs(60);
    /// Blocking read timeout on a remote channel.
    pub const REMOTE_READ_POLL: Duration = Duration::from_millis(100);
}

/// Metrics recorder configuration.
pub mod metrics {
    /// Samples kept per metric per session.
    pub const HISTORY_CAPACITY: usize = 120;
    /// Lower bound for a session's sampling interval.
    pub const MIN_UPDATE_RATE_MS: u64 = 100;
    /// Upper bound for a session's sampling interval.
    pub const MAX_UPDATE_RATE_MS: u64 = 60_000;
    /// Sampling interval used until a caller sets one.
    pub const DEFAULT_UPDATE_RATE_MS: u64 = 1_000;
}

/// Settings file validation limits.
pub mod settings {
    /// Maximum settings file size in bytes (64 KB).
    /// Settings files should be tiny; anything larger is suspicious.
    pub const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Maximum length for string fields (shell path, host names).
    pub const MAX_STRING_LENGTH: usize = 256;
}
