//! Emulated persistent shell
//!
//! The transport runs every command in a fresh, state-losing invocation.
//! A shell session keeps the working directory and environment itself and
//! replays them in front of each command:
//!
//! ```text
//! cd -- '<tracked dir>' || exit 1
//! export KEY='value' ...
//! <command>
//! ```
//!
//! Commands that may change directory get a trailing `pwd` probe whose
//! result is split off the output and becomes the new tracked directory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;

use ft_core::traits::ExecOutput;
use ft_core::{ConnectionKey, FtError, FtResult, HostId, OperatorId};

use crate::connection::{ConnectionPool, PooledConnection};

/// Escape sequence returned for a clear-screen request
pub const CLEAR_SEQUENCE: &str = "\x1b[H\x1b[2J";

/// Escape sequences a remote `clear` may print
const CLEAR_OUTPUTS: &[&str] = &[
    "\x1b[H\x1b[2J",
    "\x1b[2J\x1b[H",
    "\x1b[H\x1b[2J\x1b[3J",
    "\x1b[3J\x1b[H\x1b[2J",
];

const ENV_MARKER: &str = "__FT_ENV__";
const PWD_MARKER: &str = "__FT_PWD__";

/// Captures directory, home and environment in one round trip
const INIT_PROBE: &str = "pwd; printf '%s\\n' \"$HOME\"; printf '%s\\n' '__FT_ENV__'; env";

/// Variables forced on every session, overriding captured values
const BASELINE_ENV: &[(&str, &str)] = &[
    ("TERM", "xterm-256color"),
    ("LANG", "C.UTF-8"),
    ("LC_ALL", "C.UTF-8"),
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("COLUMNS", "200"),
    ("LINES", "50"),
];

/// Captured variables that describe one invocation rather than the session
const VOLATILE_ENV: &[&str] = &[
    "PWD",
    "OLDPWD",
    "SHLVL",
    "_",
    "SSH_CLIENT",
    "SSH_CONNECTION",
    "SSH_TTY",
    "SSH_AUTH_SOCK",
    "BASHOPTS",
    "SHELLOPTS",
    "BASH_VERSINFO",
    "UID",
    "EUID",
    "PPID",
    "MAIL",
];

/// Directory-change verbs that trigger the trailing `pwd` probe
const DIRECTORY_VERBS: &[&str] = &["cd", "pushd", "popd"];

/// Output of one shell command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Tracked directory after the command
    pub current_dir: String,
    /// Caller should reset its screen
    pub clear: bool,
}

impl ShellOutput {
    /// Raw streams and exit code
    pub fn exec_output(&self) -> ExecOutput {
        ExecOutput {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            exit_code: self.exit_code,
        }
    }
}

#[derive(Debug, Clone)]
struct ShellState {
    cwd: String,
    home: String,
    prev_dir: Option<String>,
    env: BTreeMap<String, String>,
    unset: BTreeSet<String>,
}

/// A tracked-state shell on top of one pooled connection
pub struct ShellSession {
    key: ConnectionKey,
    pool: Arc<ConnectionPool>,
    conn: RwLock<Option<Arc<PooledConnection>>>,
    state: Mutex<ShellState>,
    /// Serializes commands of this session
    run_lock: Mutex<()>,
    probe_timeout: Duration,
    closed: AtomicBool,
}

impl ShellSession {
    /// Acquire a connection and capture the initial shell state
    ///
    /// A connection-level failure is retried once on a fresh connect.
    pub async fn open(
        pool: Arc<ConnectionPool>,
        host_id: HostId,
        operator_id: OperatorId,
        probe_timeout: Duration,
    ) -> FtResult<Self> {
        let key = ConnectionKey::new(host_id, operator_id);
        let conn = match pool.acquire(&key.host_id, &key.operator_id, false).await {
            Err(e) if e.is_connection_level() => {
                tracing::warn!("Opening shell on {} failed ({}), retrying once", key, e);
                pool.acquire(&key.host_id, &key.operator_id, true).await?
            }
            other => other?,
        };

        let session = Self {
            key,
            pool,
            conn: RwLock::new(Some(conn)),
            state: Mutex::new(ShellState {
                cwd: "/".to_string(),
                home: "/".to_string(),
                prev_dir: None,
                env: BTreeMap::new(),
                unset: BTreeSet::new(),
            }),
            run_lock: Mutex::new(()),
            probe_timeout,
            closed: AtomicBool::new(false),
        };

        let output = session.exec(INIT_PROBE, probe_timeout).await?;
        let initial = parse_init_probe(&output.stdout);
        tracing::debug!(
            "Shell on {} starts in {} with {} environment entries",
            session.key,
            initial.cwd,
            initial.env.len()
        );
        *session.state.lock().await = initial;

        Ok(session)
    }

    /// (host, operator) of the underlying connection
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Tracked working directory
    pub async fn current_dir(&self) -> String {
        self.state.lock().await.cwd.clone()
    }

    /// Tracked home directory
    pub async fn home_dir(&self) -> String {
        self.state.lock().await.home.clone()
    }

    /// Tracked environment
    pub async fn environment(&self) -> BTreeMap<String, String> {
        self.state.lock().await.env.clone()
    }

    /// Whether the session was closed or its connection released
    pub fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        match self.connection() {
            Some(conn) => conn.released_token().is_cancelled(),
            None => true,
        }
    }

    /// Close the session and drop its connection handle
    ///
    /// The connection itself stays pooled; the registry decides whether
    /// to release it.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closing shell on {}", self.key);
        }
        if let Ok(mut slot) = self.conn.write() {
            slot.take();
        }
    }

    /// Best-effort interrupt of the command in flight
    pub async fn interrupt(&self) -> FtResult<()> {
        let conn = self.live_connection()?;
        conn.interrupt().await
    }

    /// Run one command against the tracked state
    pub async fn run(&self, command: &str, timeout: Duration) -> FtResult<ShellOutput> {
        let _serial = self.run_lock.lock().await;
        let command = command.trim();
        let snapshot = self.state.lock().await.clone();

        if command.is_empty() {
            return Ok(snapshot.output(ExecOutput::default()));
        }
        if command == "clear" {
            return Ok(ShellOutput {
                stdout: CLEAR_SEQUENCE.to_string(),
                current_dir: snapshot.cwd,
                clear: true,
                ..Default::default()
            });
        }

        let words: Vec<&str> = command.split_whitespace().collect();
        if is_single_command(command) {
            match words.as_slice() {
                ["cd"] if is_literal(command) => {
                    return self.change_dir(&snapshot, None, timeout).await;
                }
                ["cd", target] if is_literal(command) => {
                    return self.change_dir(&snapshot, Some(target), timeout).await;
                }
                ["export", assignments @ ..]
                    if !assignments.is_empty() && !assignments.iter().any(|a| a.starts_with('-')) =>
                {
                    return self.export(&snapshot, command, assignments, timeout).await;
                }
                ["unset", keys @ ..] if !keys.is_empty() => {
                    return self.unset(&snapshot, keys).await;
                }
                _ => {}
            }
        }

        let tracks_dir = changes_directory(command);
        let mut script = snapshot.prelude();
        script.push_str(command);
        if tracks_dir {
            script.push_str(&format!(
                "\n__ft_rc=$?\nprintf '\\n%s\\n' '{}'\npwd\nexit $__ft_rc",
                PWD_MARKER
            ));
        }

        let raw = self.exec(&script, timeout).await?;
        let mut output = if tracks_dir {
            self.apply_pwd_probe(&snapshot, raw).await
        } else {
            snapshot.output(raw)
        };

        if CLEAR_OUTPUTS.contains(&output.stdout.trim_end_matches(['\r', '\n'])) {
            output.stdout = CLEAR_SEQUENCE.to_string();
            output.clear = true;
        }
        Ok(output)
    }

    /// Run a helper command in `dir` (default: the tracked directory)
    /// without touching tracked state
    pub async fn probe(&self, command: &str, dir: Option<&str>) -> FtResult<ExecOutput> {
        let dir = match dir {
            Some(dir) => dir.to_string(),
            None => self.current_dir().await,
        };
        let script = format!("cd -- {} 2>/dev/null\n{}", quote(&dir), command);
        self.exec(&script, self.probe_timeout).await
    }

    async fn change_dir(
        &self,
        snapshot: &ShellState,
        target: Option<&str>,
        timeout: Duration,
    ) -> FtResult<ShellOutput> {
        let print_dir = target == Some("-");
        let resolved = match resolve_target(snapshot, target) {
            Ok(path) => path,
            Err(message) => {
                return Ok(snapshot.output(ExecOutput {
                    stderr: message,
                    exit_code: 1,
                    ..Default::default()
                }));
            }
        };

        let probe = format!("cd -- {} && pwd", quote(&resolved));
        let raw = self.exec(&probe, timeout).await?;
        let new_dir = raw.stdout.lines().last().map(str::trim).unwrap_or("");

        if raw.exit_code != 0 || !new_dir.starts_with('/') {
            let stderr = if raw.stderr.trim().is_empty() {
                format!("cd: {}: No such file or directory\n", resolved)
            } else {
                raw.stderr
            };
            return Ok(snapshot.output(ExecOutput {
                stderr,
                exit_code: 1,
                ..Default::default()
            }));
        }

        let new_dir = new_dir.to_string();
        {
            let mut state = self.state.lock().await;
            state.prev_dir = Some(state.cwd.clone());
            state.cwd = new_dir.clone();
        }
        tracing::trace!("Shell on {} changed directory to {}", self.key, new_dir);

        Ok(ShellOutput {
            stdout: if print_dir { format!("{}\n", new_dir) } else { String::new() },
            current_dir: new_dir,
            ..Default::default()
        })
    }

    async fn export(
        &self,
        snapshot: &ShellState,
        command: &str,
        assignments: &[&str],
        timeout: Duration,
    ) -> FtResult<ShellOutput> {
        // Fragments of quoted values are not identifiers and drop out here;
        // invalid names are reported by the remote shell itself
        let keys: Vec<&str> = assignments
            .iter()
            .map(|a| a.split_once('=').map_or(*a, |(k, _)| k))
            .filter(|k| is_identifier(k))
            .collect();

        // Values go through the remote shell so `$VAR` and quoting expand
        let mut script = snapshot.prelude();
        script.push_str(command);
        for key in &keys {
            script.push_str(&format!("\nprintf '%s\\0' \"${}\"", key));
        }

        let raw = self.exec(&script, timeout).await?;
        if raw.exit_code != 0 {
            return Ok(snapshot.output(raw));
        }

        let values: Vec<&str> = raw.stdout.split('\0').collect();
        {
            let mut state = self.state.lock().await;
            for (key, value) in keys.iter().zip(values) {
                state.unset.remove(*key);
                state.env.insert(key.to_string(), value.to_string());
            }
        }

        Ok(snapshot.output(ExecOutput::default()))
    }

    async fn unset(&self, snapshot: &ShellState, keys: &[&str]) -> FtResult<ShellOutput> {
        let flags_stripped: Vec<&str> = keys.iter().copied().filter(|k| *k != "-v").collect();
        if let Some(bad) = flags_stripped.iter().find(|k| !is_identifier(k)) {
            return Ok(snapshot.output(ExecOutput {
                stderr: format!("unset: `{}': not a valid identifier\n", bad),
                exit_code: 1,
                ..Default::default()
            }));
        }

        let mut state = self.state.lock().await;
        for key in flags_stripped {
            state.env.remove(key);
            state.unset.insert(key.to_string());
        }
        Ok(state.output(ExecOutput::default()))
    }

    async fn apply_pwd_probe(&self, snapshot: &ShellState, raw: ExecOutput) -> ShellOutput {
        let marker = format!("\n{}\n", PWD_MARKER);
        let Some(idx) = raw.stdout.rfind(&marker) else {
            return probe_failure(snapshot, raw);
        };

        let new_dir = raw.stdout[idx + marker.len()..].trim().to_string();
        let user_stdout = raw.stdout[..idx].to_string();
        if !new_dir.starts_with('/') || new_dir.contains('\n') {
            return probe_failure(
                snapshot,
                ExecOutput {
                    stdout: user_stdout,
                    ..raw
                },
            );
        }

        let mut state = self.state.lock().await;
        if state.cwd != new_dir {
            state.prev_dir = Some(state.cwd.clone());
            state.cwd = new_dir;
        }
        ShellOutput {
            stdout: user_stdout,
            stderr: raw.stderr,
            exit_code: raw.exit_code,
            current_dir: state.cwd.clone(),
            clear: false,
        }
    }

    fn connection(&self) -> Option<Arc<PooledConnection>> {
        self.conn.read().ok().and_then(|slot| slot.clone())
    }

    fn live_connection(&self) -> FtResult<Arc<PooledConnection>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FtError::Transport(format!("shell on {} is closed", self.key)));
        }
        self.connection()
            .ok_or_else(|| FtError::Transport(format!("shell on {} is closed", self.key)))
    }

    /// Run on the session's connection, reconnecting once on a
    /// connection-level failure
    async fn exec(&self, script: &str, timeout: Duration) -> FtResult<ExecOutput> {
        let conn = self.live_connection()?;
        match conn.exec_serialized(script, timeout).await {
            Err(e) if e.is_connection_level() => {
                if conn.released_token().is_cancelled() {
                    self.close();
                    return Err(e);
                }
                tracing::warn!("Shell on {} lost its connection ({}), reconnecting", self.key, e);
                let fresh = self.reconnect(&conn).await?;
                fresh.exec_serialized(script, timeout).await
            }
            other => other,
        }
    }

    async fn reconnect(&self, stale: &Arc<PooledConnection>) -> FtResult<Arc<PooledConnection>> {
        let cached_is_stale = self
            .pool
            .get(&self.key)
            .is_some_and(|cached| Arc::ptr_eq(&cached, stale));
        let fresh = self
            .pool
            .acquire(&self.key.host_id, &self.key.operator_id, cached_is_stale)
            .await?;
        if let Ok(mut slot) = self.conn.write() {
            if !self.closed.load(Ordering::Acquire) {
                *slot = Some(Arc::clone(&fresh));
            }
        }
        Ok(fresh)
    }
}

impl ShellState {
    /// Directory entry and environment replay placed before a command
    fn prelude(&self) -> String {
        let mut script = format!("cd -- {} || exit 1\n", quote(&self.cwd));
        if !self.unset.is_empty() {
            script.push_str("unset");
            for key in &self.unset {
                script.push(' ');
                script.push_str(key);
            }
            script.push('\n');
        }
        if !self.env.is_empty() {
            script.push_str("export");
            for (key, value) in &self.env {
                script.push_str(&format!(" {}={}", key, quote(value)));
            }
            script.push('\n');
        }
        script
    }

    fn output(&self, raw: ExecOutput) -> ShellOutput {
        ShellOutput {
            stdout: raw.stdout,
            stderr: raw.stderr,
            exit_code: raw.exit_code,
            current_dir: self.cwd.clone(),
            clear: false,
        }
    }
}

fn probe_failure(snapshot: &ShellState, raw: ExecOutput) -> ShellOutput {
    let mut stderr = raw.stderr;
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str("pwd probe failed: working directory unchanged\n");
    snapshot.output(ExecOutput {
        stdout: raw.stdout,
        stderr,
        exit_code: if raw.exit_code == 0 { 1 } else { raw.exit_code },
    })
}

fn parse_init_probe(stdout: &str) -> ShellState {
    let mut lines = stdout.lines();
    let cwd = lines.next().map(str::trim).unwrap_or("");
    let home = lines.next().map(str::trim).unwrap_or("");

    let home = if home.starts_with('/') { home } else { "/" };
    let cwd = if cwd.starts_with('/') { cwd } else { home };

    let mut env = BTreeMap::new();
    let mut in_env = false;
    for line in stdout.lines() {
        if !in_env {
            in_env = line == ENV_MARKER;
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if is_identifier(key) && !VOLATILE_ENV.contains(&key) && !key.starts_with("BASH_FUNC_") {
            env.insert(key.to_string(), value.to_string());
        }
    }
    for (key, value) in BASELINE_ENV {
        env.insert(key.to_string(), value.to_string());
    }

    ShellState {
        cwd: cwd.to_string(),
        home: home.to_string(),
        prev_dir: None,
        env,
        unset: BTreeSet::new(),
    }
}

fn resolve_target(state: &ShellState, target: Option<&str>) -> Result<String, String> {
    let target = target.map(unquote);
    let resolved = match target {
        None | Some("") | Some("~") => state.home.clone(),
        Some("-") => state
            .prev_dir
            .clone()
            .ok_or_else(|| "cd: OLDPWD not set\n".to_string())?,
        Some(t) if t.starts_with("~/") => join(&state.home, &t[2..]),
        Some(t) if t.starts_with('/') => t.to_string(),
        Some(t) => join(&state.cwd, t),
    };
    Ok(resolved)
}

fn join(base: &str, rel: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, rel)
    } else {
        format!("{}/{}", base, rel)
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Single-quote a string for the remote shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// No command separators or redirections
fn is_single_command(command: &str) -> bool {
    !command.contains(|c| matches!(c, ';' | '&' | '|' | '>' | '<' | '\n'))
}

/// No substitutions or expansions left for the remote shell
fn is_literal(command: &str) -> bool {
    !command.contains(|c| matches!(c, '`' | '$' | '(' | '*' | '?'))
}

fn changes_directory(command: &str) -> bool {
    command
        .split(|c: char| c.is_whitespace() || matches!(c, ';' | '&' | '|' | '(' | ')' | '{' | '}'))
        .any(|word| DIRECTORY_VERBS.contains(&word))
}
