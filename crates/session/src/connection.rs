//! Remote connection flow and channel reader, run on a dedicated thread.
//!
//! Connecting -> (HostKeyPrompt -> Connecting)? -> Connected <-> Hanging,
//! with Failed reachable from every pre-terminal step and Closed only
//! through the registry.

use settings::constants::sessions::READ_CHUNK_SIZE;
use std::io::{self, Read};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::driver::{HostKeyCheck, RemoteDriver, RemoteTarget, RemoteTransport};
use crate::entry::{Control, SessionEntry};
use crate::liveness::{LivenessAction, LivenessChange, LivenessConfig, LivenessMonitor};
use crate::messages::MessagePump;
use crate::registry::RegistryInner;
use crate::{hint_for, ConnectionStatus, MessageKind, SessionConfig, SessionError};

/// The session was closed while connecting; unwind without reporting.
struct Aborted;

type Established = (Box<dyn Read + Send>, Box<dyn RemoteTransport>);

pub(crate) struct RemoteSessionTask {
    pub entry: Arc<SessionEntry>,
    pub pump: Arc<MessagePump>,
    pub driver: Arc<dyn RemoteDriver>,
    pub target: RemoteTarget,
    pub config: Arc<SessionConfig>,
    pub registry: Weak<RegistryInner>,
}

impl RemoteSessionTask {
    pub fn run(self) {
        match self.establish() {
            // The transport must outlive the reader; it owns the socket.
            Ok(Ok((reader, _transport))) => self.read_loop(reader),
            Ok(Err(Aborted)) => {
                tracing::debug!(session_id = %self.entry.id, "Connect aborted by close");
            }
            Err(e) => self.fail(e),
        }

        self.entry.mark_reader_done();
        if let Some(registry) = self.registry.upgrade() {
            registry.reader_finished(&self.entry);
        }
        self.entry.notify_done();
        tracing::debug!(session_id = %self.entry.id, "Remote reader finished");
    }

    fn message(&self, text: &str, kind: MessageKind) {
        self.pump.emit_message(&self.entry, text, kind);
    }

    fn transition(&self, status: ConnectionStatus) -> bool {
        self.pump
            .update_connection_status(&self.entry, status, None)
    }

    fn establish(&self) -> Result<Result<Established, Aborted>, SessionError> {
        let entry = &self.entry;
        let methods = if self.target.auth.is_empty() {
            "agent".to_string()
        } else {
            self.target
                .auth
                .iter()
                .map(|m| m.label())
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.message(&format!("Authentication methods: {methods}"), MessageKind::Info);
        self.message(
            &format!("Connecting to {}", self.target.display_addr()),
            MessageKind::Progress,
        );
        self.pump.start_animation(entry, "Connecting");

        let mut transport = self
            .driver
            .dial(&self.target, self.config.connect_timeout)?;
        if entry.is_closing() {
            return Ok(Err(Aborted));
        }
        transport.handshake()?;

        match transport.verify_host_key()? {
            HostKeyCheck::Trusted => {}
            HostKeyCheck::Unknown { fingerprint } => {
                let warning = format!(
                    "The authenticity of host '{}' can't be established. Key fingerprint is {fingerprint}.",
                    self.target.known_hosts_name()
                );
                if !self.confirm_host_key(&warning)? {
                    return Ok(Err(Aborted));
                }
                transport.trust_host_key()?;
            }
            HostKeyCheck::Changed { fingerprint } => {
                let warning = format!(
                    "WARNING: the host key for '{}' has changed! New key fingerprint is {fingerprint}.",
                    self.target.known_hosts_name()
                );
                if !self.confirm_host_key(&warning)? {
                    return Ok(Err(Aborted));
                }
                transport.trust_host_key()?;
            }
        }
        if entry.is_closing() {
            return Ok(Err(Aborted));
        }

        transport.authenticate(&self.target)?;
        self.pump.stop_animation(entry);
        self.message("Connection established", MessageKind::Success);
        self.message("Creating session...", MessageKind::Info);
        if !self.transition(ConnectionStatus::Connected) {
            return Ok(Err(Aborted));
        }

        let size = entry.size();
        let channel = transport.open_channel(size, &self.config.term)?;
        let mut control = channel.control;
        {
            let mut slot = entry.control.lock();
            if entry.is_closing() {
                drop(slot);
                if let Err(e) = control.close() {
                    tracing::debug!("Close after abort: {}", e);
                }
                return Ok(Err(Aborted));
            }
            let current = entry.size();
            if current != size {
                if let Err(e) = control.resize(current) {
                    tracing::warn!(session_id = %entry.id, "Resize after connect failed: {}", e);
                }
            }
            *slot = Some(Control::Remote(control));
        }
        self.message("Session ready", MessageKind::Success);
        // Reset the terminal before the remote shell draws.
        self.pump.emit_output(entry, b"\x1bc".to_vec());

        Ok(Ok((channel.reader, transport)))
    }

    /// Prompt for a host key decision and block until it arrives.
    ///
    /// Returns false when the session was closed while waiting.
    fn confirm_host_key(&self, warning: &str) -> Result<bool, SessionError> {
        let entry = &self.entry;
        self.pump.stop_animation(entry);
        if !self.transition(ConnectionStatus::HostKeyPrompt) {
            return Ok(false);
        }
        self.pump.set_host_key_prompt(entry, true);

        let (tx, rx) = oneshot::channel();
        entry.side.lock().pending_decision = Some(tx);
        // A close that ran before the sender was stored never saw it.
        if entry.is_closing() {
            entry.side.lock().pending_decision.take();
            return Ok(false);
        }

        self.message(warning, MessageKind::Warning);
        self.message(
            "Accept this host key to continue connecting, or close the session to abort.",
            MessageKind::Warning,
        );

        let decision = rx.blocking_recv();
        self.pump.set_host_key_prompt(entry, false);
        match decision {
            Ok(true) => {
                tracing::info!(session_id = %entry.id, "Host key accepted");
                if !self.transition(ConnectionStatus::Connecting) {
                    return Ok(false);
                }
                self.pump.start_animation(entry, "Connecting");
                Ok(true)
            }
            Ok(false) => Err(SessionError::HostKey(format!(
                "host key for {} rejected",
                self.target.known_hosts_name()
            ))),
            Err(_) => Ok(false),
        }
    }

    fn read_loop(&self, mut reader: Box<dyn Read + Send>) {
        let entry = &self.entry;
        let mut monitor = LivenessMonitor::new(
            LivenessConfig {
                probe_interval: self.config.keepalive_interval,
                retry_interval: self.config.hang_threshold,
                fail_after: self.config.hang_fail_after,
            },
            Instant::now(),
        );
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            if entry.is_closing() {
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => {
                    if !entry.is_closing() {
                        self.message("Connection closed", MessageKind::Info);
                        self.transition(ConnectionStatus::Closed);
                    }
                    break;
                }
                Ok(n) => {
                    entry.touch();
                    if monitor.record_activity(Instant::now()) == Some(LivenessChange::Recovered) {
                        self.recovered();
                    }
                    self.pump.emit_output(entry, buf[..n].to_vec());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    match monitor.poll(Instant::now()) {
                        LivenessAction::Wait => {}
                        LivenessAction::Probe => {
                            let answered = entry.probe();
                            match monitor.record_probe(answered, Instant::now()) {
                                Some(LivenessChange::Hanging) => {
                                    if self.transition(ConnectionStatus::Hanging) {
                                        self.message(
                                            "Server is not responding, waiting...",
                                            MessageKind::Warning,
                                        );
                                    }
                                }
                                Some(LivenessChange::Recovered) => self.recovered(),
                                None => {}
                            }
                        }
                        LivenessAction::GiveUp => {
                            self.fail(SessionError::Network(
                                "connection lost: server stopped responding".into(),
                            ));
                            break;
                        }
                    }
                }
                Err(e) => {
                    if !entry.is_closing() {
                        self.fail(SessionError::Io(e));
                    }
                    break;
                }
            }
        }
    }

    fn recovered(&self) {
        if self.transition(ConnectionStatus::Connected) {
            self.message("Connection restored", MessageKind::Success);
        }
    }

    /// Report a failure on the terminal and move to `Failed`.
    fn fail(&self, error: SessionError) {
        let entry = &self.entry;
        if entry.is_closing() {
            return;
        }
        self.pump.stop_animation(entry);
        self.pump.set_host_key_prompt(entry, false);

        let message = error.user_message();
        tracing::warn!(session_id = %entry.id, "Remote session failed: {}", message);
        if !self
            .pump
            .update_connection_status(entry, ConnectionStatus::Failed, Some(message.clone()))
        {
            return;
        }
        self.message(&message, MessageKind::Error);
        self.message(hint_for(&message), MessageKind::Info);
        self.message("Press Enter to retry", MessageKind::Info);
    }
}
