//! Routes protocol requests to the session registry and session events
//! back out.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use session::{
    expand_home, AuthMethod, LocalSessionRequest, RemoteSessionRequest, RemoteTarget,
    SessionEvent, SessionRegistry, ShutdownCoordinator, ShutdownReport, TermSize,
};
use std::io::Write;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::protocol::{Command, Outbound, Request, Utf8Carry};

/// What the read loop should do after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown { request_id: Option<u64> },
}

/// Connection details for a remote session as given by the client.
#[derive(Debug, Clone, Default)]
pub struct RemoteArgs {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub identity_file: Option<String>,
    pub passphrase: Option<String>,
}

/// Resolve the client supplied remote arguments against the configured `[[hosts]]`.
///
/// Explicit fields win over the host entry; the user falls back to
/// `ssh.default-user` and then `$USER`.
pub fn resolve_target(config: &settings::Config, args: RemoteArgs) -> Result<RemoteTarget> {
    let entry = config.host(&args.host);
    let hostname = entry
        .map(|h| h.hostname.clone())
        .unwrap_or_else(|| args.host.trim().to_string());
    if hostname.is_empty() {
        bail!("host must not be empty");
    }
    let port = args.port.or(entry.map(|h| h.port)).unwrap_or(22);
    let user = args
        .user
        .or_else(|| entry.and_then(|h| h.user.clone()))
        .or_else(|| config.ssh.default_user.clone())
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
        .with_context(|| format!("no user given for {hostname} and $USER is not set"))?;

    let mut target = RemoteTarget::new(hostname, port, user);
    if entry.map_or(true, |h| h.use_agent) {
        target = target.with_auth(AuthMethod::Agent);
    }
    if let Some(path) = args
        .identity_file
        .or_else(|| entry.and_then(|h| h.identity_file.clone()))
    {
        target = target.with_auth(AuthMethod::KeyFile {
            path: expand_home(&path),
            passphrase: args.passphrase,
        });
    }
    if let Some(password) = args.password {
        target = target.with_auth(AuthMethod::Password(password));
    }
    Ok(target)
}

fn term_size(cols: Option<u16>, rows: Option<u16>) -> TermSize {
    let default = TermSize::default();
    TermSize::new(cols.unwrap_or(default.cols), rows.unwrap_or(default.rows))
}

fn report_json(report: &ShutdownReport) -> Value {
    json!({ "closed": report.closed, "abandoned": report.abandoned })
}

pub struct Bridge<W: Write> {
    registry: SessionRegistry,
    config: settings::Config,
    carry: Utf8Carry,
    out: W,
}

impl<W: Write> Bridge<W> {
    pub fn new(registry: SessionRegistry, config: settings::Config, out: W) -> Self {
        Self {
            registry,
            config,
            carry: Utf8Carry::default(),
            out,
        }
    }

    fn send(&mut self, message: &Outbound) -> Result<()> {
        serde_json::to_writer(&mut self.out, message).context("Failed to encode message")?;
        self.out.write_all(b"\n").context("Failed to write to stdout")?;
        self.out.flush().context("Failed to flush stdout")
    }

    pub fn forward_event(&mut self, event: SessionEvent) -> Result<()> {
        let message = self.carry.translate(event);
        self.send(&message)
    }

    /// Handle one input line. Malformed requests get an error reply.
    pub fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Invalid request: {}", e);
                self.send(&Outbound::error(None, format!("invalid request: {e}")))?;
                return Ok(Flow::Continue);
            }
        };
        let request_id = request.request_id;
        if request.command == Command::Shutdown {
            return Ok(Flow::Shutdown { request_id });
        }

        let reply = match self.dispatch(request.command) {
            Ok(result) => Outbound::ok(request_id, result),
            Err(e) => {
                tracing::debug!(?request_id, "Request failed: {:#}", e);
                Outbound::error(request_id, format!("{e:#}"))
            }
        };
        self.send(&reply)?;
        Ok(Flow::Continue)
    }

    fn dispatch(&self, command: Command) -> Result<Value> {
        let registry = &self.registry;
        match command {
            Command::CreateLocalSession {
                session_id,
                tab_id,
                profile,
                shell,
                args,
                working_dir,
                env,
                cols,
                rows,
            } => {
                let defaults = match profile {
                    Some(name) => {
                        let profile = self
                            .config
                            .profiles
                            .iter()
                            .find(|p| p.name == name)
                            .with_context(|| format!("unknown profile: {name}"))?;
                        self.config.merged_config_for_profile(profile)
                    }
                    None => self.config.local_defaults(working_dir.as_deref()),
                };
                let mut merged_env = defaults.env;
                merged_env.extend(env);

                let id = registry.create_local(LocalSessionRequest {
                    id: session_id,
                    tab_id,
                    shell: shell.or(defaults.shell),
                    args,
                    working_dir: working_dir
                        .or(defaults.working_directory)
                        .map(|dir| expand_home(&dir)),
                    env: merged_env.into_iter().collect(),
                    size: term_size(cols, rows),
                })?;
                Ok(json!({ "sessionId": id }))
            }
            Command::CreateRemoteSession {
                session_id,
                tab_id,
                host,
                port,
                user,
                password,
                identity_file,
                passphrase,
                cols,
                rows,
            } => {
                let target = resolve_target(
                    &self.config,
                    RemoteArgs {
                        host,
                        port,
                        user,
                        password,
                        identity_file,
                        passphrase,
                    },
                )?;
                let id = registry.create_remote(RemoteSessionRequest {
                    id: session_id,
                    tab_id,
                    size: term_size(cols, rows),
                    ..RemoteSessionRequest::new(target)
                })?;
                Ok(json!({ "sessionId": id }))
            }
            Command::Write { session_id, data } => {
                registry.write(&session_id, data.as_bytes())?;
                Ok(Value::Null)
            }
            Command::Resize {
                session_id,
                cols,
                rows,
            } => {
                registry.resize(&session_id, cols, rows)?;
                Ok(Value::Null)
            }
            Command::Close { session_id } => {
                registry.close(&session_id)?;
                Ok(Value::Null)
            }
            Command::AcceptHostKey { session_id, accept } => {
                registry.accept_host_key(&session_id, accept)?;
                Ok(Value::Null)
            }
            Command::SetUpdateRate {
                session_id,
                rate_ms,
            } => {
                registry.set_update_rate(&session_id, rate_ms)?;
                Ok(Value::Null)
            }
            Command::GetMetricHistory { session_id, metric } => {
                let series = registry.metric_history(&session_id, &metric);
                serde_json::to_value(series).context("Failed to encode metric history")
            }
            Command::RecordStats { session_id, stats } => {
                let recorded = registry.record_stats(
                    &session_id,
                    stats.iter().map(|(name, raw)| (name.as_str(), raw.as_str())),
                )?;
                Ok(json!({ "recorded": recorded }))
            }
            Command::ListSessions => {
                serde_json::to_value(registry.list()).context("Failed to encode session list")
            }
            Command::Shutdown => bail!("shutdown is handled by the read loop"),
        }
    }

    /// Close every session, flush the events they produced and answer the
    /// shutdown request, if there was one.
    pub async fn shutdown(
        &mut self,
        coordinator: ShutdownCoordinator,
        events: &mut UnboundedReceiver<SessionEvent>,
        request_id: Option<u64>,
    ) -> Result<ShutdownReport> {
        let report = coordinator.run(&self.registry).await;
        if report.is_clean() {
            tracing::info!("All {} sessions closed", report.closed.len());
        } else {
            tracing::warn!(
                "Shutdown abandoned {} of {} sessions",
                report.abandoned.len(),
                report.closed.len() + report.abandoned.len()
            );
        }

        while let Ok(event) = events.try_recv() {
            self.forward_event(event)?;
        }
        if request_id.is_some() {
            self.send(&Outbound::ok(request_id, report_json(&report)))?;
        }
        Ok(report)
    }
}
