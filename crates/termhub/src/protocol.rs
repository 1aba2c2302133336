//! JSON-lines wire format spoken on stdin/stdout.
//!
//! Each inbound line is one [`Request`]; each outbound line is one
//! [`Outbound`] reply or event.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use session::{ConnectionStatus, SessionEvent, SessionId};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    CreateLocalSession {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        tab_id: Option<String>,
        /// Named profile; otherwise resolved from the working directory.
        #[serde(default)]
        profile: Option<String>,
        #[serde(default)]
        shell: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        working_dir: Option<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    #[serde(rename_all = "camelCase")]
    CreateRemoteSession {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        tab_id: Option<String>,
        /// A `[[hosts]]` name or a host name.
        host: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        identity_file: Option<String>,
        #[serde(default)]
        passphrase: Option<String>,
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    #[serde(rename_all = "camelCase")]
    Write { session_id: SessionId, data: String },
    #[serde(rename_all = "camelCase")]
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    #[serde(rename_all = "camelCase")]
    Close { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    AcceptHostKey { session_id: SessionId, accept: bool },
    #[serde(rename_all = "camelCase")]
    SetUpdateRate { session_id: SessionId, rate_ms: u64 },
    #[serde(rename_all = "camelCase")]
    GetMetricHistory { session_id: SessionId, metric: String },
    #[serde(rename_all = "camelCase")]
    RecordStats {
        session_id: SessionId,
        stats: BTreeMap<String, String>,
    },
    ListSessions,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    Reply {
        request_id: Option<u64>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Output { session_id: SessionId, data: String },
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        tab_id: String,
        session_id: SessionId,
        status: ConnectionStatus,
        error_message: Option<String>,
    },
}

impl Outbound {
    pub fn ok(request_id: Option<u64>, result: Value) -> Self {
        Self::Reply {
            request_id,
            ok: true,
            result: (!result.is_null()).then_some(result),
            error: None,
        }
    }

    pub fn error(request_id: Option<u64>, error: impl Into<String>) -> Self {
        Self::Reply {
            request_id,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Decodes session output to text, holding back a split trailing UTF-8
/// sequence until the next chunk of the same session arrives.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: FxHashMap<SessionId, Vec<u8>>,
}

impl Utf8Carry {
    pub fn decode(&mut self, session_id: &str, data: &[u8]) -> String {
        let mut bytes = self.pending.remove(session_id).unwrap_or_default();
        bytes.extend_from_slice(data);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.pending.insert(session_id.to_string(), tail.to_vec());
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Drop anything held back for a finished session.
    pub fn forget(&mut self, session_id: &str) {
        self.pending.remove(session_id);
    }

    #[cfg(test)]
    fn pending_sessions(&self) -> usize {
        self.pending.len()
    }

    /// Translate a session event to its wire form.
    pub fn translate(&mut self, event: SessionEvent) -> Outbound {
        match event {
            SessionEvent::Output { session_id, data } => {
                let data = self.decode(&session_id, &data);
                Outbound::Output { session_id, data }
            }
            SessionEvent::StatusChanged {
                tab_id,
                session_id,
                status,
                error_message,
            } => {
                if status.is_terminal() {
                    self.forget(&session_id);
                }
                Outbound::StatusChanged {
                    tab_id,
                    session_id,
                    status,
                    error_message,
                }
            }
        }
    }
}
