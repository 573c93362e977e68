//! Terminal session registry
//!
//! Owns every polling-visible terminal session. Sessions move through
//! `pending -> active -> closed`; there is at most one active session per
//! (operator, host) and concurrent create requests for the same pair join
//! the same in-flight creation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;

use ft_core::api::{ExecuteResponse, PollResponse, SessionDescriptor};
use ft_core::config::{TerminalConfig, TimeoutConfig};
use ft_core::time::{current_time_millis, elapsed_duration};
use ft_core::traits::{HostStore, OperatorDirectory};
use ft_core::types::{AuditKind, AuditRecord, Operator, StreamKind};
use ft_core::{ConnectionKey, FtError, FtResult, HostId, OperatorId, SessionId};

use super::buffer::OutputBuffer;
use super::completion;
use super::single_flight::SingleFlight;
use crate::connection::ConnectionPool;
use crate::shell::{CommandMiddleware, ShellOutput, ShellSession};

/// Text echoed into the buffer for an interrupt
const INTERRUPT_ECHO: &str = "^C\n";

/// One polling-visible terminal session
pub struct TerminalSession {
    pub id: SessionId,
    shell: ShellSession,
    buffer: Mutex<OutputBuffer>,
    running: AtomicBool,
    closed: AtomicBool,
    created_at: u64,
    last_activity: AtomicU64,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl TerminalSession {
    fn new(id: SessionId, shell: ShellSession, scrollback: usize) -> Self {
        let now = current_time_millis();
        Self {
            id,
            shell,
            buffer: Mutex::new(OutputBuffer::new(scrollback)),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            created_at: now,
            last_activity: AtomicU64::new(now),
        }
    }

    /// (host, operator) this session belongs to
    pub fn key(&self) -> &ConnectionKey {
        self.shell.key()
    }

    pub fn host_id(&self) -> &HostId {
        &self.shell.key().host_id
    }

    pub fn operator_id(&self) -> &OperatorId {
        &self.shell.key().operator_id
    }

    /// Creation timestamp (ms)
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// A command is executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Not closed, and the shell's connection was not released
    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.shell.is_closed()
    }

    /// Time since the last command, poll or creation
    pub fn idle_for(&self) -> Duration {
        elapsed_duration(self.last_activity.load(Ordering::Relaxed))
    }

    /// Tracked working directory
    pub async fn current_dir(&self) -> String {
        self.shell.current_dir().await
    }

    /// Public descriptor
    pub async fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            session_id: self.id.clone(),
            host_id: self.host_id().clone(),
            current_dir: self.current_dir().await,
            created_at: self.created_at,
            running: self.is_running(),
        }
    }

    fn touch(&self) {
        self.last_activity
            .store(current_time_millis(), Ordering::Relaxed);
    }

    fn visible_to(&self, caller: &Operator) -> bool {
        caller.elevated || *self.operator_id() == caller.id
    }

    /// Atomically claim the close; only the first caller wins
    fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn append(&self, stream: StreamKind, text: &str) {
        if !text.is_empty() {
            self.buffer.lock().await.push(stream, text);
        }
    }
}

/// Clears the running flag when the command ends, however it ends
struct BusyGuard(Arc<TerminalSession>);

impl BusyGuard {
    fn acquire(session: Arc<TerminalSession>) -> FtResult<Self> {
        session
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FtError::SessionBusy(session.id.clone()))?;
        Ok(Self(session))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// A command accepted for execution
struct Accepted {
    guard: BusyGuard,
    /// Command as rewritten by the middleware
    command: String,
    warning: Option<String>,
}

#[derive(Default)]
struct SessionIndex {
    sessions: DashMap<SessionId, Arc<TerminalSession>>,
    by_owner: DashMap<ConnectionKey, SessionId>,
}

impl SessionIndex {
    fn insert(&self, session: Arc<TerminalSession>) {
        self.by_owner
            .insert(session.key().clone(), session.id.clone());
        self.sessions.insert(session.id.clone(), session);
    }

    /// The active session for (host, operator), dropping a stale entry
    fn active(&self, key: &ConnectionKey) -> Option<Arc<TerminalSession>> {
        let id = self.by_owner.get(key).map(|r| r.value().clone())?;
        match self.sessions.get(&id).map(|r| Arc::clone(&r)) {
            Some(session) if session.is_active() => Some(session),
            _ => {
                self.by_owner.remove_if(key, |_, current| *current == id);
                None
            }
        }
    }

    fn remove(&self, session: &TerminalSession) {
        self.sessions.remove(&session.id);
        self.by_owner
            .remove_if(session.key(), |_, current| *current == session.id);
    }
}

/// Registry of terminal sessions
pub struct TerminalRegistry {
    pool: Arc<ConnectionPool>,
    store: Arc<dyn HostStore>,
    middleware: Arc<CommandMiddleware>,
    timeouts: TimeoutConfig,
    terminal: TerminalConfig,
    directory: Arc<dyn OperatorDirectory>,
    index: Arc<SessionIndex>,
    pending: SingleFlight<ConnectionKey, Arc<TerminalSession>>,
}

impl TerminalRegistry {
    pub fn new(
        pool: Arc<ConnectionPool>,
        directory: Arc<dyn OperatorDirectory>,
        middleware: Arc<CommandMiddleware>,
        timeouts: TimeoutConfig,
        terminal: TerminalConfig,
    ) -> Self {
        Self {
            store: Arc::clone(pool.store()),
            pool,
            directory,
            middleware,
            pending: SingleFlight::new(timeouts.pending_creation),
            timeouts,
            terminal,
            index: Arc::new(SessionIndex::default()),
        }
    }

    /// Get or create the session for (operator, host)
    ///
    /// The caller must own the host or be elevated. An active session is
    /// returned unchanged. Otherwise the caller joins the in-flight creation
    /// for the pair, or starts one.
    pub async fn create(
        &self,
        caller: &Operator,
        host_id: &HostId,
    ) -> FtResult<Arc<TerminalSession>> {
        if self.store.host_target(host_id).await?.is_none() {
            return Err(FtError::HostNotFound(host_id.clone()));
        }
        if !caller.elevated && !self.directory.can_access_host(&caller.id, host_id).await {
            tracing::warn!("Session for {} on {} rejected: no access", caller.id, host_id);
            return Err(FtError::AccessDenied(format!(
                "host {} is not accessible",
                host_id
            )));
        }

        let key = ConnectionKey::new(host_id.clone(), caller.id.clone());

        let index = Arc::clone(&self.index);
        let pool = Arc::clone(&self.pool);
        let probe_timeout = self.timeouts.probe;
        let scrollback = self.terminal.scrollback_lines;
        let creation_key = key.clone();

        self.pending
            .run(
                key.clone(),
                || self.index.active(&key),
                move || async move {
                    let shell = ShellSession::open(
                        pool,
                        creation_key.host_id.clone(),
                        creation_key.operator_id.clone(),
                        probe_timeout,
                    )
                    .await?;
                    let session = Arc::new(TerminalSession::new(
                        SessionId::generate(),
                        shell,
                        scrollback,
                    ));
                    index.insert(Arc::clone(&session));
                    tracing::info!(
                        "Created terminal session {} for {}",
                        session.id,
                        creation_key
                    );
                    Ok(session)
                },
            )
            .await
    }

    /// Look up an active session visible to `caller`
    pub fn get(&self, id: &SessionId, caller: &Operator) -> FtResult<Arc<TerminalSession>> {
        match self.index.sessions.get(id).map(|r| Arc::clone(&r)) {
            Some(session) if session.is_active() && session.visible_to(caller) => Ok(session),
            _ => Err(FtError::SessionNotFound(id.clone())),
        }
    }

    /// Run a command and wait for its result
    pub async fn execute(
        &self,
        id: &SessionId,
        caller: &Operator,
        command: &str,
        confirm: bool,
    ) -> FtResult<ExecuteResponse> {
        let accepted = self.accept(id, caller, command, confirm).await?;
        self.complete(accepted).await
    }

    /// Accept a command, return its echo and finish it in the background
    pub async fn submit(
        self: &Arc<Self>,
        id: &SessionId,
        caller: &Operator,
        command: &str,
        confirm: bool,
    ) -> FtResult<ExecuteResponse> {
        let accepted = self.accept(id, caller, command, confirm).await?;
        let response = ExecuteResponse {
            command: accepted.command.clone(),
            current_dir: accepted.guard.0.current_dir().await,
            warning: accepted.warning.clone(),
            pending: true,
            ..Default::default()
        };

        let registry = Arc::clone(self);
        let session_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.complete(accepted).await {
                tracing::debug!("Background command in {} failed: {}", session_id, e);
            }
        });

        Ok(response)
    }

    /// Validate, classify and rewrite a command, then mark the session busy
    async fn accept(
        &self,
        id: &SessionId,
        caller: &Operator,
        command: &str,
        confirm: bool,
    ) -> FtResult<Accepted> {
        let session = self.get(id, caller)?;
        let guard = BusyGuard::acquire(Arc::clone(&session))?;

        let classification = self.middleware.classify(command);
        if !classification.allowed {
            let reason = classification
                .warning
                .unwrap_or_else(|| "command rejected".to_string());
            tracing::warn!(
                "Blocked command in {} from {}: {}",
                session.id,
                caller.id,
                reason
            );
            self.audit(
                &session,
                AuditKind::CommandBlocked,
                json!({ "sessionId": session.id, "command": command, "reason": reason }),
            )
            .await;
            return Err(FtError::CommandBlocked(reason));
        }
        if classification.requires_confirmation
            && self.middleware.policy().require_confirmation
            && !confirm
        {
            return Err(FtError::ConfirmationRequired(
                classification
                    .warning
                    .unwrap_or_else(|| "confirmation required".to_string()),
            ));
        }

        let rewritten = self.middleware.preprocess(command);
        session.touch();
        session
            .append(StreamKind::Input, &format!("{}\n", rewritten))
            .await;

        Ok(Accepted {
            guard,
            command: rewritten,
            warning: classification.warning,
        })
    }

    async fn complete(&self, accepted: Accepted) -> FtResult<ExecuteResponse> {
        let Accepted {
            guard,
            command,
            warning,
        } = accepted;
        let session = Arc::clone(&guard.0);

        let result = session.shell.run(&command, self.timeouts.command).await;
        session.touch();

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                session
                    .append(StreamKind::Stderr, &format!("{}\n", e))
                    .await;
                if session.shell.is_closed() {
                    tracing::info!("Shell of {} is gone, closing session", session.id);
                    drop(guard);
                    self.close_session(&session);
                }
                return Err(e);
            }
        };

        let ShellOutput {
            stdout,
            stderr,
            exit_code,
            current_dir,
            clear,
        } = if output.clear {
            output
        } else {
            let processed = self.middleware.postprocess(output.exec_output(), &command);
            ShellOutput {
                stdout: processed.stdout,
                stderr: processed.stderr,
                exit_code: processed.exit_code,
                ..output
            }
        };

        session.append(StreamKind::Stdout, &stdout).await;
        session.append(StreamKind::Stderr, &stderr).await;

        self.audit(
            &session,
            AuditKind::TerminalCommand,
            json!({
                "sessionId": session.id,
                "command": command,
                "exitCode": exit_code,
                "cwd": current_dir,
            }),
        )
        .await;

        drop(guard);
        Ok(ExecuteResponse {
            command,
            stdout,
            stderr,
            exit_code: Some(exit_code),
            current_dir,
            warning,
            clear,
            pending: false,
        })
    }

    /// Buffered output newer than `since`
    ///
    /// Without `since` the window defaults to the last few seconds. Every
    /// poll counts as activity.
    pub async fn poll(
        &self,
        id: &SessionId,
        caller: &Operator,
        since: Option<u64>,
    ) -> FtResult<PollResponse> {
        let session = self.get(id, caller)?;
        session.touch();

        let since = since.unwrap_or_else(|| {
            current_time_millis().saturating_sub(self.terminal.default_poll_window_ms)
        });

        let (lines, high_water) = {
            let buffer = session.buffer.lock().await;
            (buffer.since(since), buffer.high_water())
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        for line in &lines {
            match line.stream {
                StreamKind::Stdout => stdout.push_str(&line.text),
                StreamKind::Stderr => stderr.push_str(&line.text),
                StreamKind::Input => {}
            }
        }

        Ok(PollResponse {
            stdout,
            stderr,
            has_new_output: !lines.is_empty(),
            current_dir: session.current_dir().await,
            timestamp: high_water.max(since),
            running: session.is_running(),
            lines,
        })
    }

    /// Tab-completion suggestions for `partial`
    pub async fn completions(
        &self,
        id: &SessionId,
        caller: &Operator,
        partial: &str,
        cwd: Option<&str>,
    ) -> FtResult<Vec<String>> {
        let session = self.get(id, caller)?;
        session.touch();
        completion::complete(&session.shell, partial, cwd, self.terminal.completion_limit).await
    }

    /// Best-effort interrupt of the running command
    pub async fn interrupt(&self, id: &SessionId, caller: &Operator) -> FtResult<()> {
        let session = self.get(id, caller)?;
        session.touch();
        session.append(StreamKind::Input, INTERRUPT_ECHO).await;
        session.shell.interrupt().await
    }

    /// Close a session; unknown or already-closed sessions are not an error
    pub fn close(&self, id: &SessionId, caller: &Operator) {
        let Some(session) = self.index.sessions.get(id).map(|r| Arc::clone(&r)) else {
            tracing::debug!("Close of unknown session {}", id);
            return;
        };
        if !session.visible_to(caller) {
            tracing::debug!("Ignoring close of {} by {}", id, caller.id);
            return;
        }
        self.close_session(&session);
    }

    /// Sessions visible to `caller`
    pub async fn list(&self, caller: &Operator) -> Vec<SessionDescriptor> {
        let sessions: Vec<Arc<TerminalSession>> = self
            .index
            .sessions
            .iter()
            .filter(|r| r.is_active() && r.visible_to(caller))
            .map(|r| Arc::clone(r.value()))
            .collect();

        let mut descriptors = Vec::with_capacity(sessions.len());
        for session in sessions {
            descriptors.push(session.descriptor().await);
        }
        descriptors.sort_by_key(|d| d.created_at);
        descriptors
    }

    /// Close sessions idle for at least `idle`, and sessions whose shell
    /// went away; returns the number closed
    pub fn sweep(&self, idle: Duration) -> usize {
        let expired: Vec<Arc<TerminalSession>> = self
            .index
            .sessions
            .iter()
            .filter(|r| !r.is_active() || (!r.is_running() && r.idle_for() >= idle))
            .map(|r| Arc::clone(r.value()))
            .collect();

        let mut closed = 0;
        for session in expired {
            tracing::info!(
                "Sweeping session {} (idle {:?})",
                session.id,
                session.idle_for()
            );
            if self.close_session(&session) {
                closed += 1;
            }
        }
        closed
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.index.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.index.sessions.is_empty()
    }

    /// Close and forget a session; the connection is released in the
    /// background once nothing else holds it
    fn close_session(&self, session: &Arc<TerminalSession>) -> bool {
        let first = session.try_close();
        self.index.remove(session);
        session.shell.close();

        if first {
            tracing::info!("Closed terminal session {}", session.id);
            let pool = Arc::clone(&self.pool);
            let key = session.key().clone();
            tokio::spawn(async move {
                if pool.release_if_unused(&key).await {
                    tracing::debug!("Released connection {} with its last session", key);
                }
            });
        }
        first
    }

    async fn audit(&self, session: &TerminalSession, kind: AuditKind, payload: serde_json::Value) {
        let record = AuditRecord {
            host_id: session.host_id().clone(),
            operator_id: session.operator_id().clone(),
            kind,
            payload,
            recorded_at: current_time_millis(),
        };
        if let Err(e) = self.store.append_audit_record(record).await {
            tracing::warn!("Failed to record audit entry for {}: {}", session.id, e);
        }
    }
}
