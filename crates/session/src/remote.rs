//! SSH transport on libssh2.

use settings::constants::timing::{HANG_THRESHOLD, REMOTE_READ_POLL};
use ssh2::{Channel, CheckResult, ErrorCode, HashType, KnownHostFileKind, Session};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::driver::{
    AuthMethod, HostKeyCheck, RemoteChannel, RemoteControl, RemoteDriver, RemoteTarget,
    RemoteTransport, TermSize,
};
use crate::{expand_home, SessionError};

/// libssh2's LIBSSH2_ERROR_TIMEOUT.
const LIBSSH2_TIMEOUT: i32 = -9;
/// LIBSSH2_ERROR_CHANNEL_FAILURE and LIBSSH2_ERROR_CHANNEL_REQUEST_DENIED:
/// the server replied, just not with success.
const LIBSSH2_CHANNEL_FAILURE: i32 = -21;
const LIBSSH2_REQUEST_DENIED: i32 = -22;

/// Environment request used as a liveness check. It asks for a reply, so
/// the call only returns once the server has answered.
const LIVENESS_ENV: (&str, &str) = ("TERMHUB_LIVENESS", "1");

#[derive(Debug, Clone)]
pub struct Ssh2Options {
    /// OpenSSH-format trust store.
    pub known_hosts: PathBuf,
    /// Read timeout on an open channel; paces liveness checks.
    pub read_poll: Duration,
    /// How long the liveness request may wait for the server to reply.
    pub probe_timeout: Duration,
}

impl Default for Ssh2Options {
    fn default() -> Self {
        Self {
            known_hosts: termhub_paths::known_hosts_file().clone(),
            read_poll: REMOTE_READ_POLL,
            probe_timeout: HANG_THRESHOLD,
        }
    }
}

impl Ssh2Options {
    pub fn from_settings(ssh: &settings::SshSettings) -> Self {
        let mut options = Self {
            probe_timeout: ssh.hang_threshold(),
            ..Self::default()
        };
        if let Some(path) = &ssh.known_hosts {
            options.known_hosts = expand_home(&path.to_string_lossy());
        }
        options
    }
}

/// Map the outcome of a want-reply request to "did the server answer".
fn liveness_reply(result: Result<(), ssh2::Error>) -> io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => match e.code() {
            ErrorCode::Session(LIBSSH2_CHANNEL_FAILURE | LIBSSH2_REQUEST_DENIED) => Ok(()),
            ErrorCode::Session(LIBSSH2_TIMEOUT) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "server did not answer the liveness request",
            )),
            _ => Err(io::Error::from(e)),
        },
    }
}

fn duration_ms(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

fn protocol_error(context: &str, e: ssh2::Error) -> SessionError {
    if e.code() == ErrorCode::Session(LIBSSH2_TIMEOUT) {
        return SessionError::Network(format!("{context}: connection timed out"));
    }
    SessionError::Protocol(format!("{context}: {e}"))
}

fn connect_error(target: &RemoteTarget, e: &io::Error) -> SessionError {
    let addr = format!("{}:{}", target.host, target.port);
    let message = match e.kind() {
        io::ErrorKind::ConnectionRefused => format!("connection refused by {addr}"),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            format!("connection to {addr} timed out")
        }
        _ => format!("could not connect to {addr}: {e}"),
    };
    SessionError::Network(message)
}

/// `SHA256:` followed by the colon-separated hex digest.
fn format_fingerprint(digest: &[u8]) -> String {
    let hex = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":");
    format!("SHA256:{hex}")
}

/// Opens SSH sessions with blocking libssh2 calls.
#[derive(Debug, Clone, Default)]
pub struct Ssh2Driver {
    options: Ssh2Options,
}

impl Ssh2Driver {
    pub fn new(options: Ssh2Options) -> Self {
        Self { options }
    }
}

impl RemoteDriver for Ssh2Driver {
    fn dial(
        &self,
        target: &RemoteTarget,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteTransport>, SessionError> {
        let addrs: Vec<SocketAddr> = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| {
                SessionError::Network(format!("could not resolve {}: {e}", target.host))
            })?
            .collect();

        let mut last_error = None;
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        let stream = match (stream, last_error) {
            (Some(stream), _) => stream,
            (None, Some(e)) => return Err(connect_error(target, &e)),
            (None, None) => {
                return Err(SessionError::Network(format!(
                    "could not resolve {}: no addresses",
                    target.host
                )))
            }
        };
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;

        let mut session =
            Session::new().map_err(|e| protocol_error("failed to create session", e))?;
        session.set_tcp_stream(stream);
        session.set_timeout(duration_ms(timeout));

        tracing::debug!("Dialed {}", target.display_addr());
        Ok(Box::new(Ssh2Transport {
            session,
            options: self.options.clone(),
            host: target.host.clone(),
            port: target.port,
            known_hosts_name: target.known_hosts_name(),
        }))
    }
}

struct Ssh2Transport {
    session: Session,
    options: Ssh2Options,
    host: String,
    port: u16,
    known_hosts_name: String,
}

impl Ssh2Transport {
    fn load_known_hosts(&self) -> Result<ssh2::KnownHosts, SessionError> {
        let mut known = self
            .session
            .known_hosts()
            .map_err(|e| protocol_error("failed to open known hosts", e))?;
        let path = &self.options.known_hosts;
        if path.exists() {
            if let Err(e) = known.read_file(path, KnownHostFileKind::OpenSSH) {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
            }
        }
        Ok(known)
    }
}

impl RemoteTransport for Ssh2Transport {
    fn handshake(&mut self) -> Result<(), SessionError> {
        self.session
            .handshake()
            .map_err(|e| protocol_error("handshake failed", e))
    }

    fn verify_host_key(&mut self) -> Result<HostKeyCheck, SessionError> {
        let known = self.load_known_hosts()?;
        let (key, _) = self
            .session
            .host_key()
            .ok_or_else(|| SessionError::HostKey("server presented no host key".into()))?;
        let fingerprint = self
            .session
            .host_key_hash(HashType::Sha256)
            .map(format_fingerprint)
            .unwrap_or_else(|| "SHA256:unavailable".into());

        match known.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(HostKeyCheck::Trusted),
            CheckResult::NotFound => Ok(HostKeyCheck::Unknown { fingerprint }),
            CheckResult::Mismatch => Ok(HostKeyCheck::Changed { fingerprint }),
            CheckResult::Failure => Err(SessionError::HostKey(format!(
                "could not check {} against known_hosts",
                self.known_hosts_name
            ))),
        }
    }

    fn trust_host_key(&mut self) -> Result<(), SessionError> {
        let mut known = self.load_known_hosts()?;
        let (key, key_type) = self
            .session
            .host_key()
            .map(|(key, key_type)| (key.to_vec(), key_type))
            .ok_or_else(|| SessionError::HostKey("server presented no host key".into()))?;

        let path = &self.options.known_hosts;
        let write_error =
            |e: String| SessionError::HostKey(format!("could not update {}: {e}", path.display()));

        known
            .add(&self.known_hosts_name, &key, "added by termhub", key_type.into())
            .map_err(|e| write_error(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        known
            .write_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| write_error(e.to_string()))?;

        tracing::info!("Added {} to {}", self.known_hosts_name, path.display());
        Ok(())
    }

    fn authenticate(&mut self, target: &RemoteTarget) -> Result<(), SessionError> {
        let default_methods = [AuthMethod::Agent];
        let methods = if target.auth.is_empty() {
            &default_methods[..]
        } else {
            &target.auth[..]
        };

        let mut last_error = None;
        for method in methods {
            let result = match method {
                AuthMethod::Agent => self.session.userauth_agent(&target.user),
                AuthMethod::Password(password) => {
                    self.session.userauth_password(&target.user, password)
                }
                AuthMethod::KeyFile { path, passphrase } => {
                    let path = expand_home(&path.to_string_lossy());
                    self.session
                        .userauth_pubkey_file(&target.user, None, &path, passphrase.as_deref())
                }
            };
            match result {
                Ok(()) if self.session.authenticated() => {
                    tracing::debug!("Authenticated {} via {}", target.user, method.label());
                    return Ok(());
                }
                Ok(()) => {}
                Err(e) => {
                    tracing::debug!("Auth method {} failed: {}", method.label(), e);
                    last_error = Some(e);
                }
            }
        }

        let tried = methods
            .iter()
            .map(AuthMethod::label)
            .collect::<Vec<_>>()
            .join(", ");
        Err(SessionError::Auth(match last_error {
            Some(e) => format!("{} (tried {tried})", e.message()),
            None => format!("server rejected every method (tried {tried})"),
        }))
    }

    fn open_channel(&mut self, size: TermSize, term: &str) -> Result<RemoteChannel, SessionError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| protocol_error("failed to open channel", e))?;
        channel
            .request_pty(
                term,
                None,
                Some((size.cols as u32, size.rows as u32, 0, 0)),
            )
            .map_err(|e| protocol_error("PTY request denied", e))?;
        channel
            .shell()
            .map_err(|e| protocol_error("shell request denied", e))?;

        // From here on a blocking read returns TimedOut after one poll.
        self.session.set_timeout(duration_ms(self.options.read_poll));

        Ok(RemoteChannel {
            reader: Box::new(Ssh2Reader(channel.clone())),
            control: Box::new(Ssh2Control {
                session: self.session.clone(),
                channel,
                options: self.options.clone(),
            }),
        })
    }
}

struct Ssh2Reader(Channel);

impl Read for Ssh2Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

struct Ssh2Control {
    session: Session,
    channel: Channel,
    options: Ssh2Options,
}

impl RemoteControl for Ssh2Control {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.channel.write_all(data)?;
        self.channel.flush()
    }

    fn resize(&mut self, size: TermSize) -> io::Result<()> {
        self.channel
            .request_pty_size(size.cols as u32, size.rows as u32, None, None)
            .map_err(io::Error::from)
    }

    fn probe(&mut self) -> io::Result<()> {
        // Blocks until the server replies or probe_timeout passes.
        self.session
            .set_timeout(duration_ms(self.options.probe_timeout));
        let (name, value) = LIVENESS_ENV;
        let result = self.channel.setenv(name, value);
        self.session.set_timeout(duration_ms(self.options.read_poll));
        liveness_reply(result)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Err(e) = self.channel.close() {
            tracing::debug!("Channel close: {}", e);
        }
        self.session
            .disconnect(None, "session closed", None)
            .map_err(io::Error::from)
    }
}
