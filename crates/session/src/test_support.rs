//! Recording sinks and scripted drivers for exercising the registry
//! without real processes or servers.

use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::driver::{
    HostKeyCheck, LocalControl, LocalDriver, LocalProcess, LocalSpawnRequest, RemoteChannel,
    RemoteControl, RemoteDriver, RemoteTarget, RemoteTransport, TermSize,
};
use crate::{ConnectionStatus, EventSink, SessionError, SessionEvent};

// ==== Event Recording ====

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn outputs(&self, session_id: &str) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Output { session_id: id, data } if id == session_id => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn output_text(&self, session_id: &str) -> String {
        String::from_utf8_lossy(&self.outputs(session_id).concat()).into_owned()
    }

    pub fn statuses(&self, session_id: &str) -> Vec<ConnectionStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::StatusChanged {
                    session_id: id,
                    status,
                    ..
                } if id == session_id => Some(*status),
                _ => None,
            })
            .collect()
    }

    pub fn last_error(&self, session_id: &str) -> Option<String> {
        self.events.lock().iter().rev().find_map(|event| match event {
            SessionEvent::StatusChanged {
                session_id: id,
                error_message: Some(message),
                ..
            } if id == session_id => Some(message.clone()),
            _ => None,
        })
    }

    /// Wait until `status` has been reported for the session.
    pub async fn wait_for_status(
        &self,
        session_id: &str,
        status: ConnectionStatus,
        timeout: Duration,
    ) -> bool {
        self.wait_until(timeout, || self.statuses(session_id).contains(&status))
            .await
    }

    /// Wait until the session's output contains `needle`.
    pub async fn wait_for_output(&self, session_id: &str, needle: &str, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.output_text(session_id).contains(needle))
            .await
    }

    async fn wait_until(&self, timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if check() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ==== Byte Streams ====

/// Blocking reader over a channel of chunks. Dropping every sender is EOF.
pub struct ChannelReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    poll: Option<Duration>,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            poll: None,
        }
    }

    /// Return `TimedOut` when nothing arrives within `poll`, like a socket
    /// with a read timeout.
    pub fn with_poll(rx: mpsc::Receiver<Vec<u8>>, poll: Duration) -> Self {
        Self {
            poll: Some(poll),
            ..Self::new(rx)
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let chunk = match self.poll {
                None => self.rx.recv().ok(),
                Some(poll) => match self.rx.recv_timeout(poll) {
                    Ok(chunk) => Some(chunk),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => None,
                },
            };
            match chunk {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Shared view of one fake process or channel.
#[derive(Clone, Default)]
pub struct StreamHandle {
    output: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    resizes: Arc<Mutex<Vec<TermSize>>>,
    released: Arc<AtomicBool>,
}

impl StreamHandle {
    fn connect(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        *self.output.lock() = Some(tx);
        rx
    }

    /// Deliver bytes as if the process or server wrote them.
    pub fn feed(&self, data: &[u8]) {
        if let Some(tx) = self.output.lock().as_ref() {
            let _ = tx.send(data.to_vec());
        }
    }

    /// End the stream; the reader sees EOF.
    pub fn finish(&self) {
        self.output.lock().take();
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn resizes(&self) -> Vec<TermSize> {
        self.resizes.lock().clone()
    }

    /// Whether the process was killed or the channel closed.
    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.was_released() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream released"));
        }
        self.written.lock().extend_from_slice(data);
        Ok(())
    }
}

// ==== Local Driver ====

#[derive(Default)]
struct LocalScript {
    fail_with: Option<String>,
    /// Killing does not end the output stream.
    stuck: bool,
    requests: Vec<LocalSpawnRequest>,
    handles: Vec<StreamHandle>,
}

/// Local driver whose processes are in-memory byte streams.
#[derive(Clone, Default)]
pub struct FakeLocalDriver {
    script: Arc<Mutex<LocalScript>>,
}

impl FakeLocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following spawn fails with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.script.lock().fail_with = Some(message.into());
    }

    /// Spawned processes ignore kill, so their reader never finishes.
    pub fn set_stuck(&self, stuck: bool) {
        self.script.lock().stuck = stuck;
    }

    pub fn requests(&self) -> Vec<LocalSpawnRequest> {
        self.script.lock().requests.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.script.lock().handles.len()
    }

    /// Handle of the n-th spawned process.
    pub fn handle(&self, index: usize) -> Option<StreamHandle> {
        self.script.lock().handles.get(index).cloned()
    }
}

impl LocalDriver for FakeLocalDriver {
    fn spawn(&self, request: &LocalSpawnRequest) -> Result<LocalProcess, SessionError> {
        let mut script = self.script.lock();
        script.requests.push(request.clone());
        if let Some(message) = &script.fail_with {
            return Err(SessionError::Spawn {
                shell: request.shell.clone(),
                message: message.clone(),
            });
        }

        let handle = StreamHandle::default();
        let rx = handle.connect();
        let pid = 10_000 + script.handles.len() as u32;
        script.handles.push(handle.clone());
        Ok(LocalProcess {
            reader: Box::new(ChannelReader::new(rx)),
            control: Box::new(FakeLocalControl {
                handle,
                pid,
                stuck: script.stuck,
            }),
        })
    }
}

struct FakeLocalControl {
    handle: StreamHandle,
    pid: u32,
    stuck: bool,
}

impl LocalControl for FakeLocalControl {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.handle.write(data)
    }

    fn resize(&mut self, size: TermSize) -> io::Result<()> {
        self.handle.resizes.lock().push(size);
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.handle.released.store(true, Ordering::SeqCst);
        if !self.stuck {
            self.handle.finish();
        }
        Ok(())
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.pid)
    }
}

// ==== Remote Driver ====

/// What the fake server does at each step of the connection flow.
#[derive(Clone)]
pub struct RemoteScript {
    pub dial_error: Option<String>,
    pub dial_delay: Duration,
    pub host_key: HostKeyCheck,
    pub auth_error: Option<String>,
    pub channel_error: Option<String>,
    /// Read timeout of the channel, which paces liveness checks.
    pub read_poll: Duration,
}

impl Default for RemoteScript {
    fn default() -> Self {
        Self {
            dial_error: None,
            dial_delay: Duration::ZERO,
            host_key: HostKeyCheck::Trusted,
            auth_error: None,
            channel_error: None,
            read_poll: Duration::from_millis(10),
        }
    }
}

/// Shared view of the fake server.
#[derive(Clone)]
pub struct RemoteHandle {
    pub stream: StreamHandle,
    steps: Arc<Mutex<Vec<&'static str>>>,
    probe_ok: Arc<AtomicBool>,
    probes: Arc<AtomicUsize>,
    trusted: Arc<AtomicBool>,
    channel_size: Arc<Mutex<Option<TermSize>>>,
}

impl Default for RemoteHandle {
    fn default() -> Self {
        Self {
            stream: StreamHandle::default(),
            steps: Arc::default(),
            probe_ok: Arc::new(AtomicBool::new(true)),
            probes: Arc::default(),
            trusted: Arc::default(),
            channel_size: Arc::default(),
        }
    }
}

impl RemoteHandle {
    /// Connection steps taken so far, in order.
    pub fn steps(&self) -> Vec<&'static str> {
        self.steps.lock().clone()
    }

    /// Make liveness probes succeed or fail from now on.
    pub fn set_responsive(&self, responsive: bool) {
        self.probe_ok.store(responsive, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn host_key_trusted(&self) -> bool {
        self.trusted.load(Ordering::SeqCst)
    }

    /// Geometry the shell channel was opened with.
    pub fn channel_size(&self) -> Option<TermSize> {
        *self.channel_size.lock()
    }

    fn step(&self, name: &'static str) {
        self.steps.lock().push(name);
    }
}

#[derive(Clone, Default)]
pub struct FakeRemoteDriver {
    script: Arc<Mutex<RemoteScript>>,
    handle: RemoteHandle,
}

impl FakeRemoteDriver {
    pub fn new(script: RemoteScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            handle: RemoteHandle::default(),
        }
    }

    pub fn handle(&self) -> RemoteHandle {
        self.handle.clone()
    }

    pub fn update_script(&self, update: impl FnOnce(&mut RemoteScript)) {
        update(&mut self.script.lock());
    }
}

impl RemoteDriver for FakeRemoteDriver {
    fn dial(
        &self,
        target: &RemoteTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn RemoteTransport>, SessionError> {
        let script = self.script.lock().clone();
        self.handle.step("dial");
        if !script.dial_delay.is_zero() {
            std::thread::sleep(script.dial_delay);
        }
        if let Some(message) = script.dial_error {
            return Err(SessionError::Network(message));
        }
        tracing::debug!("Fake dial to {}", target.display_addr());
        Ok(Box::new(FakeTransport {
            script,
            handle: self.handle.clone(),
        }))
    }
}

struct FakeTransport {
    script: RemoteScript,
    handle: RemoteHandle,
}

impl RemoteTransport for FakeTransport {
    fn handshake(&mut self) -> Result<(), SessionError> {
        self.handle.step("handshake");
        Ok(())
    }

    fn verify_host_key(&mut self) -> Result<HostKeyCheck, SessionError> {
        self.handle.step("verify_host_key");
        if self.handle.host_key_trusted() {
            return Ok(HostKeyCheck::Trusted);
        }
        Ok(self.script.host_key.clone())
    }

    fn trust_host_key(&mut self) -> Result<(), SessionError> {
        self.handle.step("trust_host_key");
        self.handle.trusted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn authenticate(&mut self, _target: &RemoteTarget) -> Result<(), SessionError> {
        self.handle.step("authenticate");
        match &self.script.auth_error {
            Some(message) => Err(SessionError::Auth(message.clone())),
            None => Ok(()),
        }
    }

    fn open_channel(&mut self, size: TermSize, _term: &str) -> Result<RemoteChannel, SessionError> {
        self.handle.step("open_channel");
        if let Some(message) = &self.script.channel_error {
            return Err(SessionError::Protocol(message.clone()));
        }
        *self.handle.channel_size.lock() = Some(size);
        let rx = self.handle.stream.connect();
        Ok(RemoteChannel {
            reader: Box::new(ChannelReader::with_poll(rx, self.script.read_poll)),
            control: Box::new(FakeRemoteControl {
                handle: self.handle.clone(),
            }),
        })
    }
}

struct FakeRemoteControl {
    handle: RemoteHandle,
}

impl RemoteControl for FakeRemoteControl {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.handle.stream.write(data)
    }

    fn resize(&mut self, size: TermSize) -> io::Result<()> {
        self.handle.stream.resizes.lock().push(size);
        Ok(())
    }

    fn probe(&mut self) -> io::Result<()> {
        self.handle.probes.fetch_add(1, Ordering::SeqCst);
        if self.handle.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::TimedOut, "keepalive unanswered"))
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.handle.stream.released.store(true, Ordering::SeqCst);
        self.handle.stream.finish();
        Ok(())
    }
}
