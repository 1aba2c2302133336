//! Per-session lifecycle object owned by the registry.
//!
//! Everything keyed by a session lives here, so dropping the entry from the
//! registry drops its animation, prompt flag and pending host-key decision too.

use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};
use tokio::sync::{oneshot, watch};

use crate::driver::{LocalControl, RemoteControl, TermSize};
use crate::messages::Animation;
use crate::{ConnectionStatus, SessionId, SessionKind};

#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_activity: Instant,
    pub size: TermSize,
}

pub(crate) enum Control {
    Local(Box<dyn LocalControl>),
    Remote(Box<dyn RemoteControl>),
}

impl Control {
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Local(control) => control.write_all(data),
            Self::Remote(control) => control.write_all(data),
        }
    }

    pub fn resize(&mut self, size: TermSize) -> io::Result<()> {
        match self {
            Self::Local(control) => control.resize(size),
            Self::Remote(control) => control.resize(size),
        }
    }

    /// Kill the local process or close the remote channel.
    pub fn release(&mut self) -> io::Result<()> {
        match self {
            Self::Local(control) => control.kill(),
            Self::Remote(control) => control.close(),
        }
    }

    pub fn process_id(&self) -> Option<u32> {
        match self {
            Self::Local(control) => control.process_id(),
            Self::Remote(_) => None,
        }
    }
}

/// Animation and host-key prompt state, guarded separately from status.
#[derive(Default)]
pub(crate) struct SideState {
    pub animation: Option<Animation>,
    pub host_key_prompt: bool,
    pub pending_decision: Option<oneshot::Sender<bool>>,
}

pub(crate) struct SessionEntry {
    pub id: SessionId,
    pub kind: SessionKind,
    pub tab_id: Option<String>,
    pub created_at: SystemTime,
    pub(crate) state: RwLock<SessionState>,
    /// Writers hold this for the duration of a write, serializing them.
    pub(crate) control: Mutex<Option<Control>>,
    pub(crate) side: Mutex<SideState>,
    closing: AtomicBool,
    reader_done: AtomicBool,
    done: watch::Sender<bool>,
}

impl SessionEntry {
    pub fn new(id: SessionId, kind: SessionKind, tab_id: Option<String>, size: TermSize) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            id,
            kind,
            tab_id,
            created_at: SystemTime::now(),
            state: RwLock::new(SessionState {
                status: ConnectionStatus::Idle,
                last_error: None,
                last_activity: Instant::now(),
                size,
            }),
            control: Mutex::new(None),
            side: Mutex::new(SideState::default()),
            closing: AtomicBool::new(false),
            reader_done: AtomicBool::new(false),
            done,
        }
    }

    /// Tab the status events are scoped to; the session itself when unowned.
    pub fn tab_or_id(&self) -> String {
        self.tab_id.clone().unwrap_or_else(|| self.id.clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn size(&self) -> TermSize {
        self.state.read().size
    }

    pub fn set_size(&self, size: TermSize) {
        self.state.write().size = size;
    }

    pub fn touch(&self) {
        self.state.write().last_activity = Instant::now();
    }

    pub fn install_control(&self, control: Control) {
        *self.control.lock() = Some(control);
    }

    pub fn process_id(&self) -> Option<u32> {
        self.control.lock().as_ref().and_then(Control::process_id)
    }

    /// Run a liveness probe against the remote control, if one is installed.
    pub fn probe(&self) -> bool {
        match self.control.lock().as_mut() {
            Some(Control::Remote(control)) => control.probe().is_ok(),
            Some(Control::Local(_)) | None => true,
        }
    }

    /// Mark the session as closing. Returns false if it already was.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Called exactly once by the reader when it stops touching the handle.
    pub fn mark_reader_done(&self) {
        self.reader_done.store(true, Ordering::SeqCst);
    }

    /// Wake everyone in [`Self::subscribe_done`]. Sent after the registry
    /// has dropped a closed entry, so waiters never observe it half-removed.
    pub fn notify_done(&self) {
        self.done.send_replace(true);
    }

    pub fn is_reader_done(&self) -> bool {
        self.reader_done.load(Ordering::SeqCst)
    }

    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> SessionEntry {
        SessionEntry::new("s1".into(), SessionKind::Local, None, TermSize::default())
    }

    #[test]
    fn begin_close_is_one_shot() {
        let entry = entry();
        assert!(entry.begin_close());
        assert!(!entry.begin_close());
        assert!(entry.is_closing());
    }

    #[test]
    fn tab_falls_back_to_session_id() {
        assert_eq!(entry().tab_or_id(), "s1");
        let owned = SessionEntry::new("s2".into(), SessionKind::Remote, Some("t".into()), TermSize::default());
        assert_eq!(owned.tab_or_id(), "t");
    }

    #[tokio::test]
    async fn done_signal_reaches_late_subscribers() {
        let entry = entry();
        entry.mark_reader_done();
        entry.notify_done();
        let mut rx = entry.subscribe_done();
        rx.wait_for(|done| *done).await.expect("sender alive");
        assert!(entry.is_reader_done());
    }
}
