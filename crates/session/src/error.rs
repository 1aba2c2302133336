//! Session error taxonomy and user-facing failure text.

use once_cell::sync::Lazy;
use regex::Regex;
use settings::constants::metrics::{MAX_UPDATE_RATE_MS, MIN_UPDATE_RATE_MS};
use thiserror::Error;

use crate::SessionId;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The local process could not be started.
    #[error("failed to spawn {shell}: {message}")]
    Spawn { shell: String, message: String },
    /// Read or write failure after the session was established.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("host key verification failed: {0}")]
    HostKey(String),
    /// Timeout, unreachable host, or refused connection.
    #[error("{0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("session limit reached ({max} active sessions)")]
    LimitExceeded { max: usize },
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session id already in use: {0}")]
    DuplicateId(SessionId),
    #[error("no host key decision is pending for session {0}")]
    NoPendingHostKey(SessionId),
    #[error(
        "update rate {0}ms is outside the allowed range ({}..={}ms)",
        MIN_UPDATE_RATE_MS,
        MAX_UPDATE_RATE_MS
    )]
    InvalidUpdateRate(u64),
    #[error("timed out waiting for session {0} to close")]
    Timeout(SessionId),
}

impl SessionError {
    /// The normalized single-line message shown to the user.
    pub fn user_message(&self) -> String {
        normalize_error_message(&self.to_string())
    }
}

/// Wrapping prefixes that add nothing for the user, checked repeatedly.
const REDUNDANT_PREFIXES: &[&str] = &[
    "ssh: ",
    "ssh error: ",
    "failed to connect: ",
    "connection error: ",
    "error: ",
];

/// libssh2 renders errors as `[Session(-18)] message`.
static LIBSSH2_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:Session|SFTP)\(-?\d+\)\]\s*").expect("valid regex"));

/// Strip redundant wrapping prefixes and transport error codes, collapse
/// the message to one line.
pub fn normalize_error_message(raw: &str) -> String {
    let without_codes = LIBSSH2_CODE.replace_all(raw, "");
    let mut message = without_codes
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    loop {
        let lower = message.to_ascii_lowercase();
        let Some(prefix) = REDUNDANT_PREFIXES.iter().find(|p| lower.starts_with(*p)) else {
            break;
        };
        message = message[prefix.len()..].trim_start().to_string();
    }

    if message.is_empty() {
        return "unknown error".to_string();
    }
    message
}

const AUTH_HINT: &str =
    "Check your username and credentials. Key files must not be readable by others (chmod 600).";
const REFUSED_HINT: &str =
    "The server refused the connection. Check that sshd is running, the port is correct, and no firewall is blocking it.";
const UNREACHABLE_HINT: &str =
    "The host could not be reached. Check your network connection, VPN, and the host name.";
const HOST_KEY_HINT: &str =
    "The server's host key is not trusted. If the key changed legitimately, remove the old entry from ~/.ssh/known_hosts.";
const GENERIC_HINT: &str = "Check the connection settings and try again.";

/// Ordered classification table; the first matching row wins.
const HINTS: &[(&[&str], &str)] = &[
    (
        &[
            "authentication",
            "unable to authenticate",
            "permission denied",
            "auth fail",
            "publickey",
        ],
        AUTH_HINT,
    ),
    (&["connection refused"], REFUSED_HINT),
    (
        &[
            "timed out",
            "timeout",
            "no route to host",
            "network is unreachable",
            "host unreachable",
            "name or service not known",
            "failed to lookup",
            "could not resolve",
        ],
        UNREACHABLE_HINT,
    ),
    (&["host key", "hostkey", "known_hosts"], HOST_KEY_HINT),
];

/// Pick the remediation hint for a normalized error message.
pub fn hint_for(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    HINTS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, hint)| *hint)
        .unwrap_or(GENERIC_HINT)
}
