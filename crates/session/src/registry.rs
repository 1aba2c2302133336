//! The session registry: admission, lookup, input, resize and close.
//!
//! Sessions live in an insertion-ordered table behind one lock that is
//! only held for map operations. Per-session I/O goes through the
//! session's own entry, so a slow write on one session never blocks
//! lookups or writes on another.

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use rustc_hash::{FxBuildHasher, FxHashSet};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};
use tokio::runtime::Handle;
use util::ResultExt;
use uuid::Uuid;

use crate::connection::RemoteSessionTask;
use crate::driver::{LocalDriver, LocalSpawnRequest, RemoteDriver, RemoteTarget, TermSize};
use crate::entry::{Control, SessionEntry};
use crate::local::LocalSessionTask;
use crate::messages::MessagePump;
use crate::metrics::{MetricSeries, MetricsRecorder};
use crate::{
    default_shell, sampler, ConnectionStatus, EventSink, MessageKind, SessionConfig,
    SessionError, SessionId, SessionKind,
};

/// Removed ids remembered so late writes to them stay silent.
const TOMBSTONE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct LocalSessionRequest {
    /// Caller-chosen id; a UUID is generated when absent.
    pub id: Option<SessionId>,
    pub tab_id: Option<String>,
    /// Overrides the configured and login shells.
    pub shell: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub size: TermSize,
}

#[derive(Debug, Clone)]
pub struct RemoteSessionRequest {
    pub id: Option<SessionId>,
    pub tab_id: Option<String>,
    pub target: RemoteTarget,
    pub size: TermSize,
}

impl RemoteSessionRequest {
    pub fn new(target: RemoteTarget) -> Self {
        Self {
            id: None,
            tab_id: None,
            target,
            size: TermSize::default(),
        }
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub tab_id: Option<String>,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub created_at_ms: u64,
    pub idle_ms: u64,
    pub cols: u16,
    pub rows: u16,
    pub host_key_prompt: bool,
}

impl SessionInfo {
    fn from_entry(entry: &SessionEntry) -> Self {
        let state = entry.snapshot();
        Self {
            id: entry.id.clone(),
            kind: entry.kind,
            tab_id: entry.tab_id.clone(),
            status: state.status,
            last_error: state.last_error,
            created_at_ms: entry
                .created_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            idle_ms: state.last_activity.elapsed().as_millis() as u64,
            cols: state.size.cols,
            rows: state.size.rows,
            host_key_prompt: entry.side.lock().host_key_prompt,
        }
    }
}

struct SessionTable {
    sessions: IndexMap<SessionId, Arc<SessionEntry>, FxBuildHasher>,
    /// Ids admitted but not yet inserted.
    reserved: FxHashSet<SessionId>,
    tombstones: IndexSet<SessionId, FxBuildHasher>,
}

impl SessionTable {
    fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|entry| !entry.status().is_terminal())
            .count()
    }
}

pub(crate) struct RegistryInner {
    config: Arc<SessionConfig>,
    table: RwLock<SessionTable>,
    local_driver: Arc<dyn LocalDriver>,
    remote_driver: Arc<dyn RemoteDriver>,
    pump: Arc<MessagePump>,
    pub(crate) metrics: MetricsRecorder,
    pub(crate) runtime: Handle,
}

/// Admission slot held while a session is being set up.
struct Reservation<'a> {
    inner: &'a RegistryInner,
    id: SessionId,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, entry: Arc<SessionEntry>) {
        let mut table = self.inner.table.write();
        table.reserved.remove(&self.id);
        table.tombstones.shift_remove(&self.id);
        table.sessions.insert(self.id.clone(), entry);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.inner.table.write().reserved.remove(&self.id);
        }
    }
}

impl RegistryInner {
    pub(crate) fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.table.read().sessions.get(id).cloned()
    }

    /// Records under the table lock; nothing lands after a removal's cleanup.
    pub(crate) fn record_stats<'a>(
        &self,
        id: &str,
        samples: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<usize, SessionError> {
        let table = self.table.read();
        if !table.sessions.contains_key(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(self.metrics.record_stats(id, samples))
    }

    fn set_update_rate(&self, id: &str, rate_ms: u64) -> Result<(), SessionError> {
        let table = self.table.read();
        if !table.sessions.contains_key(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        self.metrics.set_update_rate(id, rate_ms)
    }

    fn lookup(&self, id: &str) -> Result<Option<Arc<SessionEntry>>, SessionError> {
        let table = self.table.read();
        match table.sessions.get(id) {
            Some(entry) => Ok(Some(entry.clone())),
            None if table.tombstones.contains(id) => Ok(None),
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    fn reserve(&self, id: &str) -> Result<Reservation<'_>, SessionError> {
        let mut table = self.table.write();
        if table.sessions.contains_key(id) || table.reserved.contains(id) {
            return Err(SessionError::DuplicateId(id.to_string()));
        }
        let max = self.config.max_sessions;
        if table.active_count() + table.reserved.len() >= max {
            tracing::warn!("Refusing session {}: limit of {} reached", id, max);
            return Err(SessionError::LimitExceeded { max });
        }
        table.reserved.insert(id.to_string());
        Ok(Reservation {
            inner: self,
            id: id.to_string(),
            committed: false,
        })
    }

    /// The reader stopped touching the handle. Drop the entry if it was closed.
    pub(crate) fn reader_finished(&self, entry: &Arc<SessionEntry>) {
        if entry.is_closing() {
            self.remove_entry(entry);
        }
    }

    fn remove_entry(&self, entry: &Arc<SessionEntry>) {
        let removed = {
            let mut table = self.table.write();
            let current = table
                .sessions
                .get(&entry.id)
                .is_some_and(|existing| Arc::ptr_eq(existing, entry));
            if current {
                table.sessions.shift_remove(&entry.id);
                if table.tombstones.len() >= TOMBSTONE_CAPACITY {
                    table.tombstones.shift_remove_index(0);
                }
                table.tombstones.insert(entry.id.clone());
            }
            current
        };
        if removed {
            self.metrics.cleanup_session_metrics(&entry.id);
            tracing::debug!(session_id = %entry.id, "Session removed");
        }
    }

    /// Tear down an entry whose reader thread never started.
    fn abandon(&self, entry: &Arc<SessionEntry>, error: &SessionError) {
        entry.begin_close();
        if let Some(mut control) = entry.control.lock().take() {
            control.release().warn_on_err();
        }
        self.pump.update_connection_status(
            entry,
            ConnectionStatus::Failed,
            Some(error.user_message()),
        );
        entry.mark_reader_done();
        self.remove_entry(entry);
        entry.notify_done();
    }
}

/// Owns every live session. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Build a registry on the current tokio runtime.
    ///
    /// # Panics
    /// When called outside a runtime context.
    pub fn new(
        config: SessionConfig,
        sink: Arc<dyn EventSink>,
        local_driver: Arc<dyn LocalDriver>,
        remote_driver: Arc<dyn RemoteDriver>,
    ) -> Self {
        Self::with_runtime(config, sink, local_driver, remote_driver, Handle::current())
    }

    pub fn with_runtime(
        config: SessionConfig,
        sink: Arc<dyn EventSink>,
        local_driver: Arc<dyn LocalDriver>,
        remote_driver: Arc<dyn RemoteDriver>,
        runtime: Handle,
    ) -> Self {
        let pump = Arc::new(MessagePump::new(sink, runtime.clone(), config.animation_tick));
        let metrics = MetricsRecorder::new(config.default_update_rate_ms);
        Self {
            inner: Arc::new(RegistryInner {
                config: Arc::new(config),
                table: RwLock::new(SessionTable {
                    sessions: IndexMap::with_hasher(FxBuildHasher),
                    reserved: FxHashSet::default(),
                    tombstones: IndexSet::with_capacity_and_hasher(
                        TOMBSTONE_CAPACITY,
                        FxBuildHasher,
                    ),
                }),
                local_driver,
                remote_driver,
                pump,
                metrics,
                runtime,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Spawn a local shell. The session is `Connected` once this returns.
    pub fn create_local(&self, request: LocalSessionRequest) -> Result<SessionId, SessionError> {
        let inner = &self.inner;
        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let reservation = inner.reserve(&id)?;

        let spawn_request = LocalSpawnRequest {
            shell: request
                .shell
                .or_else(|| inner.config.default_shell.clone())
                .unwrap_or_else(default_shell),
            args: request.args,
            working_dir: request
                .working_dir
                .or_else(|| inner.config.default_working_directory.clone()),
            env: request.env,
            size: request.size,
            term: inner.config.term.clone(),
        };

        let process = match inner.local_driver.spawn(&spawn_request) {
            Ok(process) => process,
            Err(e) => {
                let message = e.user_message();
                tracing::error!(session_id = %id, "Failed to spawn local session: {}", message);
                inner.pump.emit_status(
                    request.tab_id.unwrap_or_else(|| id.clone()),
                    id,
                    ConnectionStatus::Failed,
                    Some(message),
                );
                return Err(e);
            }
        };

        let entry = Arc::new(SessionEntry::new(
            id.clone(),
            SessionKind::Local,
            request.tab_id,
            request.size,
        ));
        entry.install_control(Control::Local(process.control));
        inner
            .pump
            .update_connection_status(&entry, ConnectionStatus::Connected, None);
        reservation.commit(entry.clone());

        let task = LocalSessionTask {
            entry: entry.clone(),
            pump: inner.pump.clone(),
            reader: process.reader,
            registry: Arc::downgrade(inner),
        };
        if let Err(e) = thread::Builder::new()
            .name("session-reader".into())
            .spawn(move || task.run())
        {
            let error = SessionError::Io(e);
            inner.abandon(&entry, &error);
            return Err(error);
        }

        if inner.config.sample_local_processes {
            sampler::spawn(inner, id.clone());
        }
        tracing::info!(session_id = %id, shell = %spawn_request.shell, "Local session created");
        Ok(id)
    }

    /// Start connecting to a remote host. Returns as soon as the session is
    /// registered in `Connecting`; progress arrives as events.
    pub fn create_remote(&self, request: RemoteSessionRequest) -> Result<SessionId, SessionError> {
        let inner = &self.inner;
        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let reservation = inner.reserve(&id)?;

        let entry = Arc::new(SessionEntry::new(
            id.clone(),
            SessionKind::Remote,
            request.tab_id,
            request.size,
        ));
        inner
            .pump
            .update_connection_status(&entry, ConnectionStatus::Connecting, None);
        reservation.commit(entry.clone());

        tracing::info!(session_id = %id, "Connecting to {}", request.target.display_addr());
        let task = RemoteSessionTask {
            entry: entry.clone(),
            pump: inner.pump.clone(),
            driver: inner.remote_driver.clone(),
            target: request.target,
            config: inner.config.clone(),
            registry: Arc::downgrade(inner),
        };
        if let Err(e) = thread::Builder::new()
            .name("ssh-connect".into())
            .spawn(move || task.run())
        {
            let error = SessionError::Io(e);
            inner.abandon(&entry, &error);
            return Err(error);
        }
        Ok(id)
    }

    /// Forward input to the session.
    ///
    /// Input to a session that is closing, finished, or not yet connected
    /// is dropped.
    pub fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let Some(entry) = self.inner.lookup(id)? else {
            return Ok(());
        };
        if entry.is_closing() || entry.status().is_terminal() {
            tracing::trace!(session_id = id, "Dropping input to finished session");
            return Ok(());
        }
        let mut control = entry.control.lock();
        match control.as_mut() {
            Some(control) => control.write_all(data).map_err(SessionError::Io),
            None => Ok(()),
        }
    }

    /// Record the new geometry and forward it to the process or channel.
    ///
    /// A remote session that is still connecting picks the size up when
    /// its channel opens.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let Some(entry) = self.inner.lookup(id)? else {
            return Ok(());
        };
        let size = TermSize::new(cols, rows);
        entry.set_size(size);
        if entry.is_closing() {
            return Ok(());
        }
        let forward = match entry.kind {
            SessionKind::Local => !entry.status().is_terminal(),
            SessionKind::Remote => entry.status().is_established(),
        };
        if !forward {
            return Ok(());
        }
        let mut control = entry.control.lock();
        match control.as_mut() {
            Some(control) => control.resize(size).map_err(SessionError::Io),
            None => Ok(()),
        }
    }

    /// Close a session. Idempotent.
    ///
    /// Kills the process or closes the channel and reports `Closed`. The
    /// entry leaves the registry once its reader has let go of the handle.
    pub fn close(&self, id: &str) -> Result<(), SessionError> {
        let inner = &self.inner;
        let Some(entry) = inner.lookup(id)? else {
            return Ok(());
        };
        if !entry.begin_close() {
            return Ok(());
        }

        inner.pump.stop_animation(&entry);
        let pending = {
            let mut side = entry.side.lock();
            side.host_key_prompt = false;
            side.pending_decision.take()
        };
        // Dropping the sender wakes a connect blocked on the prompt.
        drop(pending);

        inner
            .pump
            .update_connection_status(&entry, ConnectionStatus::Closed, None);

        let control = entry.control.lock().take();
        if let Some(mut control) = control {
            control.release().warn_on_err();
        }

        if entry.is_reader_done() {
            inner.remove_entry(&entry);
        }
        tracing::info!(session_id = id, "Session closed");
        Ok(())
    }

    /// Wait until the session's reader has finished.
    pub async fn wait_for_close(&self, id: &str, timeout: Duration) -> Result<(), SessionError> {
        let Some(entry) = self.inner.get(id) else {
            return Ok(());
        };
        let mut done = entry.subscribe_done();
        let finished = tokio::time::timeout(timeout, done.wait_for(|done| *done))
            .await
            .is_ok();
        if finished {
            Ok(())
        } else {
            Err(SessionError::Timeout(id.to_string()))
        }
    }

    /// Answer a pending host-key prompt.
    pub fn accept_host_key(&self, id: &str, accept: bool) -> Result<(), SessionError> {
        let entry = self
            .inner
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let decision = {
            let mut side = entry.side.lock();
            let decision = side
                .pending_decision
                .take()
                .ok_or_else(|| SessionError::NoPendingHostKey(id.to_string()))?;
            side.host_key_prompt = false;
            decision
        };
        if decision.send(accept).is_err() {
            tracing::debug!(session_id = id, "Host key decision arrived after connect ended");
        }
        Ok(())
    }

    pub fn status(&self, id: &str) -> Option<ConnectionStatus> {
        self.inner.get(id).map(|entry| entry.status())
    }

    pub fn session(&self, id: &str) -> Option<SessionInfo> {
        self.inner
            .get(id)
            .map(|entry| SessionInfo::from_entry(&entry))
    }

    /// Every registered session, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.entries()
            .iter()
            .map(|entry| SessionInfo::from_entry(entry))
            .collect()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.table.read().sessions.keys().cloned().collect()
    }

    /// Sessions that count against the limit.
    pub fn active_count(&self) -> usize {
        self.inner.table.read().active_count()
    }

    /// Show a lifecycle message on the session's terminal.
    pub fn emit_message(&self, id: &str, text: &str, kind: MessageKind) -> Result<(), SessionError> {
        let entry = self
            .inner
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        self.inner.pump.emit_message(&entry, text, kind);
        Ok(())
    }

    pub fn set_update_rate(&self, id: &str, rate_ms: u64) -> Result<(), SessionError> {
        self.inner.set_update_rate(id, rate_ms)
    }

    pub fn metric_history(&self, id: &str, metric: &str) -> MetricSeries {
        self.inner.metrics.history(id, metric)
    }

    /// Record externally collected samples, e.g. from a remote stats command.
    pub fn record_stats<'a>(
        &self,
        id: &str,
        samples: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<usize, SessionError> {
        self.inner.record_stats(id, samples)
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.inner.metrics
    }

    /// Stop every animation and clear every prompt flag.
    pub fn cleanup_messages(&self) {
        let entries = self.entries();
        self.inner
            .pump
            .cleanup(entries.iter().map(|entry| entry.as_ref()));
    }

    fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.inner.table.read().sessions.values().cloned().collect()
    }
}
