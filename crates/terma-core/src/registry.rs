use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::TerminalError;
use crate::hub::OutputSubscription;
use crate::terminal::{Terminal, TerminalInfo};

/// How often the reaper scans for idle sessions.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Idle time after which a session is closed by the reaper.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(86_400);

type CloseHook = Box<dyn Fn(&str) + Send + Sync>;

/// Authoritative owner of all live terminals, keyed by session id.
///
/// Creation, lookup and teardown appear atomic to callers; the map lock is
/// never held across PTY I/O or subscriber delivery.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Terminal>>>,
    default_shell: String,
    cleanup_interval: Duration,
    idle_timeout: Duration,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
    on_close: std::sync::Mutex<Option<CloseHook>>,
}

fn valid_session_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

impl SessionRegistry {
    pub fn new(cleanup_interval: Duration, idle_timeout: Duration) -> Self {
        Self::with_shell(default_shell(), cleanup_interval, idle_timeout)
    }

    pub fn with_shell(
        default_shell: impl Into<String>,
        cleanup_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_shell: default_shell.into(),
            cleanup_interval,
            idle_timeout,
            reaper: std::sync::Mutex::new(None),
            on_close: std::sync::Mutex::new(None),
        }
    }

    /// Install a hook invoked with the session id whenever a terminal is
    /// closed through the registry (explicitly, by the reaper, or at
    /// shutdown).
    pub fn set_close_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_close.lock().unwrap() = Some(Box::new(hook));
    }

    fn run_close_hook(&self, id: &str) {
        if let Some(hook) = self.on_close.lock().unwrap().as_ref() {
            hook(id);
        }
    }

    /// Create and start a session. A duplicate id returns the existing id
    /// without spawning a second process. On spawn failure no entry is
    /// inserted.
    pub async fn create(
        &self,
        session_id: Option<String>,
        shell_command: Option<String>,
    ) -> Result<String, TerminalError> {
        let id = match session_id {
            Some(id) => {
                if !valid_session_id(&id) {
                    return Err(TerminalError::BadArgument(format!(
                        "invalid session id: {id}"
                    )));
                }
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        if self.sessions.read().await.contains_key(&id) {
            tracing::warn!(session_id = %id, "session already exists");
            return Ok(id);
        }

        let shell = shell_command.unwrap_or_else(|| self.default_shell.clone());
        let terminal = Arc::new(Terminal::spawn(id.clone(), &shell, None).await?);

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            // Lost a create race for the same id; first one wins.
            drop(sessions);
            terminal.close();
            return Ok(id);
        }
        sessions.insert(id.clone(), terminal);
        drop(sessions);

        tracing::info!(session_id = %id, shell = %shell, "session created");
        Ok(id)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Terminal>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Remove and close a session. Returns whether the id was present.
    pub async fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(terminal) => {
                terminal.close();
                self.run_close_hook(session_id);
                tracing::info!(session_id, "session closed");
                true
            }
            None => {
                tracing::warn!(session_id, "close requested for unknown session");
                false
            }
        }
    }

    pub async fn list(&self) -> Vec<TerminalInfo> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|t| t.info()).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Write bytes to a session's PTY. An unknown session fails the same
    /// way a closed one does.
    pub async fn write_to_session(
        &self,
        session_id: &str,
        data: &[u8],
    ) -> Result<usize, TerminalError> {
        let terminal = self.get(session_id).await.ok_or(TerminalError::NotActive)?;
        terminal.write(data).await
    }

    /// Drain up to `size` bytes from a session's REST ring buffer.
    pub async fn read_from_session(
        &self,
        session_id: &str,
        size: usize,
    ) -> Result<Vec<u8>, TerminalError> {
        let terminal = self.get(session_id).await.ok_or(TerminalError::NotActive)?;
        terminal.take(size)
    }

    pub async fn resize_session(
        &self,
        session_id: &str,
        rows: u16,
        cols: u16,
    ) -> Result<(), TerminalError> {
        let terminal = self.get(session_id).await.ok_or(TerminalError::NotActive)?;
        terminal.resize(rows, cols)
    }

    pub async fn subscribe(&self, session_id: &str) -> Option<OutputSubscription> {
        let terminal = self.get(session_id).await?;
        Some(terminal.subscribe())
    }

    /// Start the idle reaper.
    pub fn start(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.cleanup_interval);
            loop {
                ticker.tick().await;
                registry.reap_idle().await;
            }
        });
        *self.reaper.lock().unwrap() = Some(handle);
        tracing::info!(
            cleanup_interval_secs = self.cleanup_interval.as_secs(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "session registry started"
        );
    }

    /// Close every session idle longer than the timeout. Victims are
    /// snapshotted under the read lock and closed outside it.
    async fn reap_idle(&self) {
        let victims: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, t)| t.idle() > self.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in victims {
            tracing::info!(session_id = %id, "reaping idle session");
            self.close(&id).await;
        }
    }

    /// Cancel the reaper and close every session.
    pub async fn stop(&self) {
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        }

        let drained: Vec<(String, Arc<Terminal>)> =
            self.sessions.write().await.drain().collect();
        for (id, terminal) in drained {
            terminal.close();
            self.run_close_hook(&id);
        }
        tracing::info!("session registry stopped");
    }
}
