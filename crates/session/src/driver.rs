//! Capability seams between the registry and the OS/network layer.
//!
//! The registry only ever talks to these traits; [`crate::PtyDriver`] and
//! [`crate::Ssh2Driver`] are the production implementations and the
//! `test_support` module provides scripted fakes.

use serde::{Deserialize, Serialize};
use settings::constants::sessions::{DEFAULT_COLS, DEFAULT_ROWS};
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use crate::SessionError;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// Everything needed to start a local shell.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSpawnRequest {
    pub shell: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub size: TermSize,
    pub term: String,
}

/// A running local process: its output stream and its control half.
pub struct LocalProcess {
    pub reader: Box<dyn Read + Send>,
    pub control: Box<dyn LocalControl>,
}

impl fmt::Debug for LocalProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProcess")
            .field("pid", &self.control.process_id())
            .finish_non_exhaustive()
    }
}

pub trait LocalControl: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn resize(&mut self, size: TermSize) -> io::Result<()>;
    /// Terminate the process. The reader observes EOF afterwards.
    fn kill(&mut self) -> io::Result<()>;
    fn process_id(&self) -> Option<u32>;
}

#[cfg_attr(test, mockall::automock)]
pub trait LocalDriver: Send + Sync {
    fn spawn(&self, request: &LocalSpawnRequest) -> Result<LocalProcess, SessionError>;
}

/// A credential source to try, in order.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Agent,
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    /// The SSH method name offered for this credential.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Password(_) => "password",
            Self::KeyFile { .. } => "publickey",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => f.write_str("Agent"),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: Vec<AuthMethod>,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            auth: Vec::new(),
        }
    }

    pub fn with_auth(mut self, method: AuthMethod) -> Self {
        self.auth.push(method);
        self
    }

    /// `user@host:port`, as shown in progress messages.
    pub fn display_addr(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    /// Host name as written to known_hosts: bare for port 22, `[host]:port` otherwise.
    pub fn known_hosts_name(&self) -> String {
        if self.port == 22 {
            self.host.clone()
        } else {
            format!("[{}]:{}", self.host, self.port)
        }
    }
}

/// Outcome of checking the server's identity against the trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyCheck {
    Trusted,
    Unknown { fingerprint: String },
    Changed { fingerprint: String },
}

pub trait RemoteDriver: Send + Sync {
    /// Open the network connection. No protocol traffic yet.
    fn dial(
        &self,
        target: &RemoteTarget,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteTransport>, SessionError>;
}

/// One dialed connection, driven step by step by the connection flow.
pub trait RemoteTransport: Send {
    fn handshake(&mut self) -> Result<(), SessionError>;
    fn verify_host_key(&mut self) -> Result<HostKeyCheck, SessionError>;
    /// Persist the presented key to the trust store.
    fn trust_host_key(&mut self) -> Result<(), SessionError>;
    fn authenticate(&mut self, target: &RemoteTarget) -> Result<(), SessionError>;
    fn open_channel(&mut self, size: TermSize, term: &str) -> Result<RemoteChannel, SessionError>;
}

/// An interactive shell channel: its output stream and its control half.
pub struct RemoteChannel {
    pub reader: Box<dyn Read + Send>,
    pub control: Box<dyn RemoteControl>,
}

pub trait RemoteControl: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn resize(&mut self, size: TermSize) -> io::Result<()>;
    /// Liveness probe; fails when the server does not answer in time.
    fn probe(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_size_never_zero() {
        assert_eq!(TermSize::new(0, 0), TermSize { cols: 1, rows: 1 });
        assert_eq!(TermSize::default(), TermSize { cols: 80, rows: 24 });
    }

    #[test]
    fn known_hosts_name_brackets_custom_ports() {
        let target = RemoteTarget::new("example.com", 22, "alice");
        assert_eq!(target.known_hosts_name(), "example.com");
        let target = RemoteTarget::new("example.com", 2222, "alice");
        assert_eq!(target.known_hosts_name(), "[example.com]:2222");
        assert_eq!(target.display_addr(), "alice@example.com:2222");
    }

    #[test]
    fn auth_debug_redacts_secrets() {
        let debug = format!(
            "{:?}",
            vec![
                AuthMethod::Password("hunter2".into()),
                AuthMethod::KeyFile {
                    path: "/k".into(),
                    passphrase: Some("secret".into()),
                },
            ]
        );
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("secret"));
    }
}
