use std::collections::HashMap;
use std::io::{Read as _, Write as _};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::TerminalError;
use crate::hub::{OutputHub, OutputSubscription};

/// Default controlling-terminal window until the first client resize.
pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

/// Upper bound accepted by [`Terminal::resize`].
pub const MAX_DIMENSION: u16 = 1000;

/// Bound on a single pump read from the PTY master.
const READ_CHUNK: usize = 1024;

/// Cap on the ring buffer backing REST reads, truncated from the front.
/// Separate from the hub backlog so REST polling never consumes bytes
/// destined for subscribers.
const REST_BUFFER_LIMIT: usize = 50_000;

/// Snapshot of a session's state as reported over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub id: String,
    pub active: bool,
    pub created_at: f64,
    pub last_activity: f64,
    pub shell_command: String,
    pub idle_time: f64,
}

/// One PTY-backed shell session: a child process, its PTY master, and the
/// pump task that drains output into the session's [`OutputHub`].
pub struct Terminal {
    id: String,
    shell_command: String,
    created_at_ms: u64,
    last_activity_ms: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
    hub: Arc<OutputHub>,
    rest_buffer: Arc<Mutex<Vec<u8>>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Arc<Mutex<Option<Box<dyn std::io::Write + Send>>>>,
    child: Mutex<Option<Box<dyn portable_pty::Child + Send>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Split a shell command with shell-style quoting (single, double,
/// backslash escapes).
fn tokenize(shell_command: &str) -> Result<Vec<String>, TerminalError> {
    let argv = shlex::split(shell_command)
        .ok_or_else(|| TerminalError::Spawn(format!("unbalanced quoting: {shell_command}")))?;
    if argv.is_empty() {
        return Err(TerminalError::Spawn("empty shell command".to_string()));
    }
    Ok(argv)
}

impl Terminal {
    /// Spawn the shell under a fresh PTY pair and start the output pump.
    ///
    /// The command is tokenized with shell-style quoting; a program given by
    /// path must exist on disk. The child inherits the parent environment
    /// with `env` applied on top.
    pub async fn spawn(
        session_id: impl Into<String>,
        shell_command: &str,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, TerminalError> {
        let id = session_id.into();
        let argv = tokenize(shell_command)?;

        if argv[0].contains('/') && !Path::new(&argv[0]).exists() {
            return Err(TerminalError::Spawn(format!(
                "command path does not exist: {}",
                argv[0]
            )));
        }

        tracing::debug!(session_id = %id, command = ?argv, "spawning PTY");

        // portable-pty is synchronous, so open and spawn on a blocking thread.
        let argv_clone = argv.clone();
        let (master, child, reader) = tokio::task::spawn_blocking(move || {
            let pty_system = native_pty_system();
            let pair = pty_system
                .openpty(PtySize {
                    rows: DEFAULT_ROWS,
                    cols: DEFAULT_COLS,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| TerminalError::Spawn(e.to_string()))?;

            let mut cmd = CommandBuilder::new(&argv_clone[0]);
            cmd.args(&argv_clone[1..]);
            if let Some(env) = env {
                for (k, v) in &env {
                    cmd.env(k, v);
                }
            }

            let child = pair
                .slave
                .spawn_command(cmd)
                .map_err(|e| TerminalError::Spawn(e.to_string()))?;

            let reader = pair
                .master
                .try_clone_reader()
                .map_err(|e| TerminalError::Spawn(e.to_string()))?;

            Ok::<_, TerminalError>((pair.master, child, reader))
        })
        .await
        .map_err(|e| TerminalError::Spawn(e.to_string()))??;

        let writer = master
            .take_writer()
            .map_err(|e| TerminalError::Spawn(e.to_string()))?;

        let created = now_ms();
        let terminal = Self {
            id: id.clone(),
            shell_command: shell_command.to_string(),
            created_at_ms: created,
            last_activity_ms: Arc::new(AtomicU64::new(created)),
            active: Arc::new(AtomicBool::new(true)),
            hub: Arc::new(OutputHub::new()),
            rest_buffer: Arc::new(Mutex::new(Vec::new())),
            master: Mutex::new(Some(master)),
            writer: Arc::new(Mutex::new(Some(writer))),
            child: Mutex::new(Some(child)),
            pump: Mutex::new(None),
        };

        let pump = terminal.start_pump(reader);
        *terminal.pump.lock().unwrap() = Some(pump);

        tracing::info!(session_id = %id, command = %shell_command, "terminal started");
        Ok(terminal)
    }

    /// Run the pump on a blocking thread: read, stamp activity, publish.
    ///
    /// Read discipline: blocking reads on a dedicated task. Closing the
    /// terminal kills the child and drops the master, which unblocks the
    /// in-flight read with EOF or EIO and ends the loop.
    fn start_pump(&self, mut reader: Box<dyn std::io::Read + Send>) -> JoinHandle<()> {
        let id = self.id.clone();
        let active = self.active.clone();
        let hub = self.hub.clone();
        let rest_buffer = self.rest_buffer.clone();
        let last_activity = self.last_activity_ms.clone();

        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                if !active.load(Ordering::Acquire) {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::info!(session_id = %id, "terminal reached EOF");
                        active.store(false, Ordering::Release);
                        break;
                    }
                    Ok(n) => {
                        last_activity.fetch_max(now_ms(), Ordering::AcqRel);
                        let chunk = &buf[..n];
                        {
                            let mut rest = rest_buffer.lock().unwrap();
                            rest.extend_from_slice(chunk);
                            if rest.len() > REST_BUFFER_LIMIT {
                                let excess = rest.len() - REST_BUFFER_LIMIT;
                                rest.drain(..excess);
                            }
                        }
                        hub.publish(chunk);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => {
                        tracing::debug!(session_id = %id, error = %e, "pump read error");
                        active.store(false, Ordering::Release);
                        break;
                    }
                }
            }
            tracing::debug!(session_id = %id, "pump exited");
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shell_command(&self) -> &str {
        &self.shell_command
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.last_activity_ms.fetch_max(now_ms(), Ordering::AcqRel);
    }

    /// Time since the last read or write.
    pub fn idle(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms().saturating_sub(last))
    }

    /// Forward bytes to the PTY master. Fails with `NotActive` once the
    /// session has closed or its child has exited.
    pub async fn write(&self, data: &[u8]) -> Result<usize, TerminalError> {
        if !self.is_active() {
            return Err(TerminalError::NotActive);
        }
        self.touch();

        let writer = self.writer.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock().unwrap();
            let w = guard.as_mut().ok_or(TerminalError::NotActive)?;
            w.write_all(&data)
                .map_err(|e| TerminalError::Io(e.to_string()))?;
            w.flush().map_err(|e| TerminalError::Io(e.to_string()))?;
            Ok(data.len())
        })
        .await
        .map_err(|e| TerminalError::Io(e.to_string()))?
    }

    /// Set the PTY window size (TIOCSWINSZ). Dimensions must be in
    /// `1..=MAX_DIMENSION`.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), TerminalError> {
        if rows == 0 || cols == 0 || rows > MAX_DIMENSION || cols > MAX_DIMENSION {
            return Err(TerminalError::BadArgument(format!(
                "resize dimensions out of range: {rows}x{cols}"
            )));
        }
        if !self.is_active() {
            return Err(TerminalError::NotActive);
        }

        {
            let guard = self.master.lock().unwrap();
            let master = guard.as_ref().ok_or(TerminalError::NotActive)?;
            master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| TerminalError::Io(e.to_string()))?;
        }

        self.touch();
        tracing::debug!(session_id = %self.id, rows, cols, "terminal resized");
        Ok(())
    }

    /// Drain up to `size` bytes from the REST ring buffer. Fails with
    /// `NotActive` once the session has closed or its child has exited.
    pub fn take(&self, size: usize) -> Result<Vec<u8>, TerminalError> {
        if !self.is_active() {
            return Err(TerminalError::NotActive);
        }
        self.touch();
        let mut rest = self.rest_buffer.lock().unwrap();
        let n = size.min(rest.len());
        Ok(rest.drain(..n).collect())
    }

    /// Attach an output subscriber; primed with the hub backlog.
    pub fn subscribe(&self) -> OutputSubscription {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &OutputHub {
        &self.hub
    }

    /// Terminate the child and release the PTY. Idempotent.
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);

        if let Some(mut child) = self.child.lock().unwrap().take() {
            if let Err(e) = child.kill() {
                tracing::debug!(session_id = %self.id, error = %e, "kill failed (child may have exited)");
            }
        }
        *self.writer.lock().unwrap() = None;
        // Dropping the master closes the PTY fd and unblocks the pump read.
        *self.master.lock().unwrap() = None;
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
            tracing::info!(session_id = %self.id, "terminal closed");
        }
    }

    pub fn info(&self) -> TerminalInfo {
        let last_ms = self.last_activity_ms.load(Ordering::Acquire);
        TerminalInfo {
            id: self.id.clone(),
            active: self.is_active(),
            created_at: self.created_at_ms as f64 / 1000.0,
            last_activity: last_ms as f64 / 1000.0,
            shell_command: self.shell_command.clone(),
            idle_time: now_ms().saturating_sub(last_ms) as f64 / 1000.0,
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn wait_for_output(sub: &mut OutputSubscription, needle: &[u8]) -> Vec<u8> {
        let mut collected = sub.backlog.clone();
        let deadline = Duration::from_secs(2);
        while !collected
            .windows(needle.len().max(1))
            .any(|w| w == needle)
        {
            let chunk = timeout(deadline, sub.rx.recv())
                .await
                .expect("timed out waiting for terminal output")
                .expect("output channel closed");
            collected.extend_from_slice(&chunk);
        }
        collected
    }

    #[test]
    fn tokenize_handles_quoting() {
        assert_eq!(
            tokenize("/bin/sh -c 'echo hi'").unwrap(),
            vec!["/bin/sh", "-c", "echo hi"]
        );
        assert_eq!(
            tokenize(r#"/bin/echo "a b" c\ d"#).unwrap(),
            vec!["/bin/echo", "a b", "c d"]
        );
        assert!(tokenize("'unbalanced").is_err());
        assert!(tokenize("").is_err());
    }

    #[tokio::test]
    async fn spawn_rejects_missing_path() {
        let err = Terminal::spawn("t", "/no/such/binary", None)
            .await
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, TerminalError::Spawn(_)));
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let terminal = Terminal::spawn("echo-test", "/bin/sh", None)
            .await
            .expect("spawn");
        let mut sub = terminal.subscribe();

        terminal.write(b"echo marker12345\n").await.expect("write");
        let output = wait_for_output(&mut sub, b"marker12345").await;
        assert!(!output.is_empty());

        terminal.close();
    }

    #[tokio::test]
    async fn rest_buffer_receives_output_independently() {
        let terminal = Terminal::spawn("rest-test", "/bin/sh", None)
            .await
            .expect("spawn");
        let mut sub = terminal.subscribe();

        terminal.write(b"echo restmarker\n").await.expect("write");
        wait_for_output(&mut sub, b"restmarker").await;

        // The ring buffer saw the same bytes even though a subscriber
        // already consumed them from the hub.
        let drained = terminal.take(REST_BUFFER_LIMIT).expect("take");
        let text = String::from_utf8_lossy(&drained);
        assert!(text.contains("restmarker"));

        // A second drain yields nothing new.
        assert!(terminal.take(REST_BUFFER_LIMIT).expect("take").is_empty());

        terminal.close();
    }

    #[tokio::test]
    async fn resize_validates_dimensions() {
        let terminal = Terminal::spawn("resize-test", "/bin/sh", None)
            .await
            .expect("spawn");

        assert!(matches!(
            terminal.resize(0, 80),
            Err(TerminalError::BadArgument(_))
        ));
        assert!(matches!(
            terminal.resize(24, 1001),
            Err(TerminalError::BadArgument(_))
        ));
        terminal.resize(40, 132).expect("valid resize");

        terminal.close();
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let terminal = Terminal::spawn("closed-test", "/bin/sh", None)
            .await
            .expect("spawn");
        terminal.close();

        assert!(matches!(
            terminal.write(b"ls\n").await,
            Err(TerminalError::NotActive)
        ));
        assert!(matches!(
            terminal.resize(24, 80),
            Err(TerminalError::NotActive)
        ));
        assert!(matches!(
            terminal.take(1024),
            Err(TerminalError::NotActive)
        ));
    }

    #[tokio::test]
    async fn child_exit_deactivates_terminal() {
        let terminal = Terminal::spawn("exit-test", "/bin/sh -c 'echo done'", None)
            .await
            .expect("spawn");

        // The child exits on its own; the pump sees EOF and flips the flag.
        for _ in 0..100 {
            if !terminal.is_active() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!terminal.is_active());
        assert!(matches!(
            terminal.write(b"x").await,
            Err(TerminalError::NotActive)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let terminal = Terminal::spawn("idem-test", "/bin/sh", None)
            .await
            .expect("spawn");
        terminal.close();
        terminal.close();
        assert!(!terminal.is_active());
    }

    #[tokio::test]
    async fn last_activity_is_monotone() {
        let terminal = Terminal::spawn("mono-test", "/bin/sh", None)
            .await
            .expect("spawn");

        let before = terminal.info().last_activity;
        tokio::time::sleep(Duration::from_millis(20)).await;
        terminal.write(b"\n").await.expect("write");
        let after = terminal.info().last_activity;
        assert!(after >= before);

        terminal.close();
    }

    #[tokio::test]
    async fn info_reports_session_fields() {
        let terminal = Terminal::spawn("info-test", "/bin/sh", None)
            .await
            .expect("spawn");
        let info = terminal.info();

        assert_eq!(info.id, "info-test");
        assert!(info.active);
        assert_eq!(info.shell_command, "/bin/sh");
        assert!(info.created_at > 0.0);
        assert!(info.last_activity >= info.created_at);
        assert!(info.idle_time >= 0.0);

        terminal.close();
    }
}
