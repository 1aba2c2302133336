//! Connection state machine shared by local and remote sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a session.
///
/// ```text
/// Idle -> Connecting -> Connected | Failed | HostKeyPrompt
/// HostKeyPrompt -> Connecting | Failed
/// Connected -> Hanging -> Connected | Failed
/// Idle -> Connected                      (local sessions)
/// any non-terminal -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    #[serde(rename = "hostkeyprompt")]
    HostKeyPrompt,
    Hanging,
    Failed,
    Closed,
}

impl ConnectionStatus {
    /// `Closed` and `Failed` end a session instance; retrying needs a new one.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether the remote channel is open for resize and probes.
    pub fn is_established(self) -> bool {
        matches!(self, Self::Connected | Self::Hanging)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::*;
        match (self, next) {
            (from, Closed) => !from.is_terminal(),
            (Idle, Connecting | Connected) => true,
            (Connecting, Connected | Failed | HostKeyPrompt) => true,
            (HostKeyPrompt, Connecting | Failed) => true,
            (Connected, Hanging | Failed) => true,
            (Hanging, Connected | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::HostKeyPrompt => "hostkeyprompt",
            Self::Hanging => "hanging",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
