//! Local shell sessions on a pseudo-terminal.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use settings::constants::sessions::READ_CHUNK_SIZE;
use std::io::{self, Read, Write};
use std::sync::{Arc, Weak};

use crate::driver::{LocalControl, LocalDriver, LocalProcess, LocalSpawnRequest, TermSize};
use crate::entry::SessionEntry;
use crate::messages::MessagePump;
use crate::registry::RegistryInner;
use crate::{ConnectionStatus, MessageKind, SessionError};

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Spawns shells on the platform's native PTY system.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyDriver;

impl LocalDriver for PtyDriver {
    fn spawn(&self, request: &LocalSpawnRequest) -> Result<LocalProcess, SessionError> {
        let spawn_error = |message: String| SessionError::Spawn {
            shell: request.shell.clone(),
            message,
        };

        let pair = native_pty_system()
            .openpty(pty_size(request.size))
            .map_err(|e| spawn_error(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&request.shell);
        cmd.args(&request.args);
        if let Some(dir) = &request.working_dir {
            cmd.cwd(dir);
        }
        cmd.env("TERM", &request.term);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_error(e.to_string()))?;
        // The child holds its own copy; keeping ours would mask EOF.
        drop(pair.slave);

        let master = pair.master;
        let writer = master
            .take_writer()
            .map_err(|e| spawn_error(format!("failed to get PTY writer: {e}")))?;
        let reader = master
            .try_clone_reader()
            .map_err(|e| spawn_error(format!("failed to get PTY reader: {e}")))?;

        tracing::debug!(
            shell = %request.shell,
            pid = ?child.process_id(),
            "Spawned {}x{} PTY",
            request.size.cols,
            request.size.rows
        );

        Ok(LocalProcess {
            reader,
            control: Box::new(PtyControl {
                master,
                writer,
                child,
            }),
        })
    }
}

struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl LocalControl for PtyControl {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn resize(&mut self, size: TermSize) -> io::Result<()> {
        self.master.resize(pty_size(size)).map_err(io::Error::other)
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => self.child.kill(),
        }
    }

    fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }
}

impl Drop for PtyControl {
    fn drop(&mut self) {
        if !matches!(self.child.try_wait(), Ok(Some(_))) {
            if let Err(e) = self.child.kill() {
                // ESRCH is expected if the shell already exited
                tracing::debug!("Kill child process: {}", e);
            }
        }

        // Reap it to avoid a zombie
        if let Err(e) = self.child.wait() {
            tracing::debug!("Wait for child process: {}", e);
        }
    }
}

/// Reader loop for a local session, run on a dedicated thread.
pub(crate) struct LocalSessionTask {
    pub entry: Arc<SessionEntry>,
    pub pump: Arc<MessagePump>,
    pub reader: Box<dyn Read + Send>,
    pub registry: Weak<RegistryInner>,
}

impl LocalSessionTask {
    pub fn run(mut self) {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.entry.touch();
                    self.pump.emit_output(&self.entry, buf[..n].to_vec());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Linux reports EIO once the slave side is gone.
                    tracing::debug!(session_id = %self.entry.id, "PTY read ended: {}", e);
                    break;
                }
            }
        }

        if !self.entry.is_closing() {
            self.pump
                .emit_message(&self.entry, "Process exited", MessageKind::Info);
            self.pump
                .update_connection_status(&self.entry, ConnectionStatus::Closed, None);
        }

        self.entry.mark_reader_done();
        if let Some(registry) = self.registry.upgrade() {
            registry.reader_finished(&self.entry);
        }
        self.entry.notify_done();
        tracing::debug!(session_id = %self.entry.id, "Local reader finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn request(shell: &str, args: &[&str]) -> LocalSpawnRequest {
        LocalSpawnRequest {
            shell: shell.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: None,
            env: vec![("TERMHUB_TEST".into(), "42".into())],
            size: TermSize::new(100, 30),
            term: "xterm-256color".into(),
        }
    }

    fn read_until(reader: &mut dyn Read, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        while Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&collected).contains(needle) {
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    // ==== PtyDriver Tests ====

    #[test]
    fn spawn_nonexistent_shell_is_spawn_error() {
        let result = PtyDriver.spawn(&request("/nonexistent/shell-xyz", &[]));
        match result {
            Err(SessionError::Spawn { shell, .. }) => assert_eq!(shell, "/nonexistent/shell-xyz"),
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[test]
    fn spawned_shell_sees_env_and_term() {
        let mut process = PtyDriver
            .spawn(&request("/bin/sh", &["-c", "echo \"$TERM:$TERMHUB_TEST\""]))
            .expect("should spawn /bin/sh");
        let output = read_until(&mut *process.reader, "xterm-256color:42", Duration::from_secs(5));
        assert!(output.contains("xterm-256color:42"), "output: {output:?}");
    }

    #[test]
    fn written_input_is_echoed_back() {
        let mut process = PtyDriver
            .spawn(&request("/bin/sh", &[]))
            .expect("should spawn /bin/sh");
        assert!(process.control.process_id().is_some());
        process
            .control
            .write_all(b"echo marker-$((40+2))\n")
            .expect("should write");
        let output = read_until(&mut *process.reader, "marker-42", Duration::from_secs(5));
        assert!(output.contains("marker-42"), "output: {output:?}");

        process.control.resize(TermSize::new(120, 40)).expect("should resize");
        process.control.kill().expect("should kill");
    }
}
