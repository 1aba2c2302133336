//! Lifecycle messages, status events and connecting animations.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::entry::SessionEntry;
use crate::{ConnectionStatus, EventSink, SessionEvent};

const RESET: &str = "\x1b[0m";
const CLEAR_LINE: &str = "\r\x1b[2K";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Info,
    Success,
    Warning,
    Error,
    Progress,
    Debug,
}

impl MessageKind {
    /// Colored glyph prefix; `None` for kinds that are only logged.
    fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Info => Some("\x1b[36mℹ"),
            Self::Success => Some("\x1b[32m✓"),
            Self::Warning => Some("\x1b[33m⚠"),
            Self::Error => Some("\x1b[31m✗"),
            Self::Progress => Some("\x1b[34m→"),
            Self::Debug => None,
        }
    }

    /// Whether the kind still reaches the terminal during a host-key prompt.
    fn is_critical(self) -> bool {
        matches!(self, Self::Warning | Self::Error)
    }
}

/// Format a lifecycle message as a terminal line.
pub fn format_message(text: &str, kind: MessageKind) -> Option<String> {
    kind.prefix()
        .map(|prefix| format!("{prefix}{RESET} {text}\r\n"))
}

fn animation_frame(label: &str, dots: usize) -> String {
    format!("{CLEAR_LINE}\x1b[34m→{RESET} {label}{}", ".".repeat(dots))
}

/// A running connecting animation.
///
/// Every frame is emitted while holding `running`, so once `finish` has
/// flipped it the clear-line it writes is the animation's last output.
pub(crate) struct Animation {
    running: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

/// Formats and routes everything a session shows besides its own output.
pub(crate) struct MessagePump {
    sink: Arc<dyn EventSink>,
    runtime: Handle,
    tick: Duration,
}

impl MessagePump {
    pub fn new(sink: Arc<dyn EventSink>, runtime: Handle, tick: Duration) -> Self {
        Self {
            sink,
            runtime,
            tick,
        }
    }

    pub(crate) fn emit_output(&self, entry: &SessionEntry, data: Vec<u8>) {
        self.sink.emit(SessionEvent::Output {
            session_id: entry.id.clone(),
            data,
        });
    }

    pub(crate) fn emit_message(&self, entry: &SessionEntry, text: &str, kind: MessageKind) {
        let (prompting, animating) = {
            let side = entry.side.lock();
            (side.host_key_prompt, side.animation.is_some())
        };

        if kind == MessageKind::Debug {
            tracing::debug!(session_id = %entry.id, "{}", text);
            return;
        }
        if prompting && !kind.is_critical() {
            tracing::debug!(session_id = %entry.id, ?kind, "Suppressed during host key prompt: {}", text);
            return;
        }
        tracing::trace!(session_id = %entry.id, ?kind, "{}", text);

        let Some(line) = format_message(text, kind) else {
            return;
        };
        let data = if animating {
            format!("{CLEAR_LINE}{line}")
        } else {
            line
        };
        self.emit_output(entry, data.into_bytes());
    }

    /// Validated status transition plus a status-changed event.
    ///
    /// The event is emitted under the status lock so events leave in the
    /// same order the transitions happened. Returns false when the
    /// transition is not allowed from the current status.
    pub(crate) fn update_connection_status(
        &self,
        entry: &SessionEntry,
        status: ConnectionStatus,
        error: Option<String>,
    ) -> bool {
        let mut state = entry.state.write();
        let previous = state.status;
        if !previous.can_transition_to(status) {
            tracing::debug!(
                session_id = %entry.id,
                "Ignoring transition {} -> {}",
                previous,
                status
            );
            return false;
        }
        state.status = status;
        if error.is_some() {
            state.last_error = error.clone();
        }
        tracing::info!(session_id = %entry.id, from = %previous, to = %status, "Session status changed");

        self.sink.emit(SessionEvent::StatusChanged {
            tab_id: entry.tab_or_id(),
            session_id: entry.id.clone(),
            status,
            error_message: error,
        });
        true
    }

    /// Status event for a session that never made it into the registry.
    pub(crate) fn emit_status(
        &self,
        tab_id: String,
        session_id: String,
        status: ConnectionStatus,
        error: Option<String>,
    ) {
        self.sink.emit(SessionEvent::StatusChanged {
            tab_id,
            session_id,
            status,
            error_message: error,
        });
    }

    pub(crate) fn set_host_key_prompt(&self, entry: &SessionEntry, prompting: bool) {
        entry.side.lock().host_key_prompt = prompting;
    }

    /// Start the cycling-ellipsis animation, replacing any running one.
    pub(crate) fn start_animation(&self, entry: &SessionEntry, label: &str) {
        let mut side = entry.side.lock();
        if let Some(previous) = side.animation.take() {
            self.finish_animation(entry, previous);
        }

        let running = Arc::new(Mutex::new(true));
        let sink = self.sink.clone();
        let session_id = entry.id.clone();
        let label = label.to_string();
        let tick = self.tick;
        let flag = running.clone();

        let task = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut dots = 0;
            loop {
                interval.tick().await;
                {
                    let running = flag.lock();
                    if !*running {
                        break;
                    }
                    sink.emit(SessionEvent::Output {
                        session_id: session_id.clone(),
                        data: animation_frame(&label, dots).into_bytes(),
                    });
                }
                dots = (dots + 1) % 4;
            }
        });

        side.animation = Some(Animation { running, task });
    }

    pub(crate) fn stop_animation(&self, entry: &SessionEntry) {
        let animation = entry.side.lock().animation.take();
        if let Some(animation) = animation {
            self.finish_animation(entry, animation);
        }
    }

    fn finish_animation(&self, entry: &SessionEntry, animation: Animation) {
        {
            let mut running = animation.running.lock();
            if *running {
                *running = false;
                self.emit_output(entry, CLEAR_LINE.as_bytes().to_vec());
            }
        }
        animation.task.abort();
    }

    /// Stop every animation and clear every prompt flag. Shutdown only.
    pub(crate) fn cleanup<'a>(&self, entries: impl IntoIterator<Item = &'a SessionEntry>) {
        let mut stopped = 0;
        for entry in entries {
            let animation = {
                let mut side = entry.side.lock();
                side.host_key_prompt = false;
                side.animation.take()
            };
            if let Some(animation) = animation {
                self.finish_animation(entry, animation);
                stopped += 1;
            }
        }
        tracing::debug!("Message pump cleanup stopped {} animations", stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TermSize;
    use crate::test_support::RecordingSink;
    use crate::SessionKind;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn pump(sink: &Arc<RecordingSink>) -> MessagePump {
        MessagePump::new(sink.clone(), Handle::current(), Duration::from_millis(10))
    }

    fn entry() -> SessionEntry {
        SessionEntry::new("s1".into(), SessionKind::Remote, Some("tab-1".into()), TermSize::default())
    }

    // ==== Message Formatting Tests ====

    #[test_case(MessageKind::Info, "\x1b[36mℹ\x1b[0m hello\r\n" ; "info")]
    #[test_case(MessageKind::Success, "\x1b[32m✓\x1b[0m hello\r\n" ; "success")]
    #[test_case(MessageKind::Warning, "\x1b[33m⚠\x1b[0m hello\r\n" ; "warning")]
    #[test_case(MessageKind::Error, "\x1b[31m✗\x1b[0m hello\r\n" ; "error")]
    #[test_case(MessageKind::Progress, "\x1b[34m→\x1b[0m hello\r\n" ; "progress")]
    fn formats_visible_kinds(kind: MessageKind, expected: &str) {
        assert_eq!(format_message("hello", kind).as_deref(), Some(expected));
    }

    #[test]
    fn debug_is_never_formatted() {
        assert_eq!(format_message("hello", MessageKind::Debug), None);
    }

    // ==== Prompt Suppression Tests ====

    #[tokio::test]
    async fn prompt_flag_suppresses_non_critical_kinds() {
        let sink = Arc::new(RecordingSink::default());
        let pump = pump(&sink);
        let entry = entry();
        pump.set_host_key_prompt(&entry, true);

        for kind in [MessageKind::Info, MessageKind::Progress, MessageKind::Debug] {
            pump.emit_message(&entry, "noise", kind);
        }
        assert!(sink.outputs("s1").is_empty());

        pump.emit_message(&entry, "careful", MessageKind::Warning);
        pump.emit_message(&entry, "broken", MessageKind::Error);
        let text = sink.output_text("s1");
        assert!(text.contains("careful"));
        assert!(text.contains("broken"));
        assert!(!text.contains("noise"));
    }

    #[tokio::test]
    async fn messages_flow_without_prompt() {
        let sink = Arc::new(RecordingSink::default());
        let pump = pump(&sink);
        let entry = entry();

        pump.emit_message(&entry, "hello", MessageKind::Info);
        pump.emit_message(&entry, "hidden", MessageKind::Debug);
        assert_eq!(sink.outputs("s1").len(), 1);
    }

    // ==== Status Tests ====

    #[tokio::test]
    async fn status_event_is_scoped_to_tab() {
        let sink = Arc::new(RecordingSink::default());
        let pump = pump(&sink);
        let entry = entry();

        assert!(pump.update_connection_status(&entry, ConnectionStatus::Connecting, None));
        assert!(!pump.update_connection_status(&entry, ConnectionStatus::Idle, None));
        assert!(pump.update_connection_status(
            &entry,
            ConnectionStatus::Failed,
            Some("boom".into())
        ));

        let events = sink.events();
        assert_eq!(
            events,
            vec![
                SessionEvent::StatusChanged {
                    tab_id: "tab-1".into(),
                    session_id: "s1".into(),
                    status: ConnectionStatus::Connecting,
                    error_message: None,
                },
                SessionEvent::StatusChanged {
                    tab_id: "tab-1".into(),
                    session_id: "s1".into(),
                    status: ConnectionStatus::Failed,
                    error_message: Some("boom".into()),
                },
            ]
        );
        assert_eq!(entry.snapshot().last_error.as_deref(), Some("boom"));
    }

    // ==== Animation Tests ====

    #[tokio::test]
    async fn animation_cycles_dots_and_clears_last() {
        let sink = Arc::new(RecordingSink::default());
        let pump = pump(&sink);
        let entry = entry();

        pump.start_animation(&entry, "Connecting");
        tokio::time::sleep(Duration::from_millis(80)).await;
        pump.stop_animation(&entry);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let outputs = sink.outputs("s1");
        assert!(outputs.len() >= 3, "expected several frames, got {outputs:?}");
        assert_eq!(outputs[0], animation_frame("Connecting", 0).into_bytes());
        assert_eq!(outputs[1], animation_frame("Connecting", 1).into_bytes());
        assert_eq!(outputs.last().unwrap(), CLEAR_LINE.as_bytes());
        assert!(entry.side.lock().animation.is_none());
    }

    #[tokio::test]
    async fn starting_again_replaces_running_animation() {
        let sink = Arc::new(RecordingSink::default());
        let pump = pump(&sink);
        let entry = entry();

        pump.start_animation(&entry, "First");
        tokio::time::sleep(Duration::from_millis(25)).await;
        pump.start_animation(&entry, "Second");
        tokio::time::sleep(Duration::from_millis(25)).await;
        pump.stop_animation(&entry);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let text = sink.output_text("s1");
        let last_first = text.rfind("First").expect("first animation ran");
        let first_second = text.find("Second").expect("second animation ran");
        assert!(last_first < first_second, "animations interleaved: {text:?}");
        assert!(text.ends_with(CLEAR_LINE));
    }

    #[tokio::test]
    async fn cleanup_stops_animations_and_clears_flags() {
        let sink = Arc::new(RecordingSink::default());
        let pump = pump(&sink);
        let a = entry();
        let b = SessionEntry::new("s2".into(), SessionKind::Remote, None, TermSize::default());
        pump.start_animation(&a, "Connecting");
        pump.set_host_key_prompt(&b, true);

        pump.cleanup([&a, &b]);

        assert!(a.side.lock().animation.is_none());
        assert!(!b.side.lock().host_key_prompt);
    }
}
