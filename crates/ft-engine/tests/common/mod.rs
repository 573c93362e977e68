//! Simulated remote hosts for integration tests
//!
//! `FakeConnector` hands out channels to in-memory hosts. Each exec runs a
//! tiny shell interpreter that starts from the login state every time:
//! nothing persists between execs except the host's filesystem, exactly
//! like a real stateless exec channel.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ft_core::config::{EngineConfig, HostEntry, OperatorEntry};
use ft_core::traits::{Connector, ExecOutput, RemoteChannel};
use ft_core::types::{HostTarget, Operator};
use ft_core::{HostId, OperatorId, TransportError};
use ft_engine::inventory::{token_digest, Inventory, TokenDirectory};
use ft_engine::EngineState;

/// Commands `compgen -c` knows about
const COMMANDS: &[&str] = &[
    "cat", "cd", "echo", "env", "exit", "export", "false", "ls", "lsblk", "mkdir", "printf",
    "pwd", "sleep", "true", "unset",
];

/// One simulated host
pub struct FakeHost {
    pub home: String,
    fs: Mutex<FakeFs>,
    login_env: BTreeMap<String, String>,
    pub connects: AtomicUsize,
    pub execs: AtomicUsize,
    pub interrupts: AtomicUsize,
    /// Refuse new connections
    pub refuse_connect: AtomicBool,
    /// Refuse this many upcoming connects
    pub refuse_next: AtomicUsize,
    /// Fail this many upcoming execs with a channel error
    pub fail_execs: AtomicUsize,
    /// Delay applied to every connect
    pub connect_delay: Mutex<Duration>,
    /// Every script received, in order
    pub scripts: Mutex<Vec<String>>,
}

#[derive(Default)]
struct FakeFs {
    dirs: BTreeSet<String>,
    files: BTreeSet<String>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        let home = "/home/ubuntu".to_string();
        let mut fs = FakeFs::default();
        for dir in ["/", "/home", "/home/ubuntu", "/tmp", "/var", "/var/log", "/etc", "/srv"] {
            fs.dirs.insert(dir.to_string());
        }
        for file in ["/etc/hosts", "/etc/hostname", "/var/log/syslog", "/home/ubuntu/notes.txt"] {
            fs.files.insert(file.to_string());
        }

        let mut login_env = BTreeMap::new();
        for (k, v) in [
            ("HOME", "/home/ubuntu"),
            ("USER", "ubuntu"),
            ("SHELL", "/bin/bash"),
            ("PATH", "/usr/local/bin:/usr/bin:/bin"),
            ("LANG", "en_US.UTF-8"),
            ("TERM", "dumb"),
            ("PWD", "/home/ubuntu"),
            ("SHLVL", "1"),
            ("SSH_CONNECTION", "10.0.0.9 51234 10.0.0.1 22"),
        ] {
            login_env.insert(k.to_string(), v.to_string());
        }

        Arc::new(Self {
            home,
            fs: Mutex::new(fs),
            login_env,
            connects: AtomicUsize::new(0),
            execs: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            refuse_connect: AtomicBool::new(false),
            refuse_next: AtomicUsize::new(0),
            fail_execs: AtomicUsize::new(0),
            connect_delay: Mutex::new(Duration::ZERO),
            scripts: Mutex::new(Vec::new()),
        })
    }

    pub fn mkdir(&self, path: &str) {
        self.fs.lock().unwrap().dirs.insert(path.to_string());
    }

    pub fn touch(&self, path: &str) {
        self.fs.lock().unwrap().files.insert(path.to_string());
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.fs.lock().unwrap().dirs.contains(path)
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let fs = self.fs.lock().unwrap();
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        fs.dirs
            .iter()
            .chain(fs.files.iter())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Run one script from the login state
    async fn run_script(&self, script: &str) -> Result<ExecOutput, TransportError> {
        self.scripts.lock().unwrap().push(script.to_string());
        let mut sh = Interp {
            host: self,
            cwd: self.home.clone(),
            env: self.login_env.clone(),
            rc: 0,
            stdout: String::new(),
            stderr: String::new(),
        };

        for line in script.lines() {
            match sh.run_line(line).await {
                Flow::Continue => {}
                Flow::Exit(code) => {
                    sh.rc = code;
                    break;
                }
                Flow::DropConnection => {
                    return Err(TransportError::Channel("connection reset by peer".into()));
                }
            }
        }

        Ok(ExecOutput {
            stdout: sh.stdout,
            stderr: sh.stderr,
            exit_code: sh.rc,
        })
    }
}

enum Flow {
    Continue,
    Exit(i32),
    DropConnection,
}

struct Interp<'a> {
    host: &'a FakeHost,
    cwd: String,
    env: BTreeMap<String, String>,
    rc: i32,
    stdout: String,
    stderr: String,
}

impl<'a> Interp<'a> {
    async fn run_line(&mut self, line: &str) -> Flow {
        let mut pending_op: Option<&str> = None;
        for (segment, op) in split_ops(line) {
            let skip = match pending_op {
                Some("&&") => self.rc != 0,
                Some("||") => self.rc == 0,
                _ => false,
            };
            if !skip {
                match self.run_pipeline(&segment).await {
                    Flow::Continue => {}
                    other => return other,
                }
            }
            pending_op = op;
        }
        Flow::Continue
    }

    async fn run_pipeline(&mut self, segment: &str) -> Flow {
        let mut stages = segment.splitn(2, " | ");
        let first = stages.next().unwrap_or("");
        let head_limit = stages.next().and_then(|rest| {
            let words = self.words(rest);
            match words.as_slice() {
                [cmd, flag, n] if cmd == "head" && flag == "-n" => n.parse::<usize>().ok(),
                _ => None,
            }
        });

        let before = self.stdout.len();
        let flow = self.run_simple(first).await;
        if let Some(limit) = head_limit {
            let produced = self.stdout.split_off(before);
            let kept: Vec<&str> = produced.lines().take(limit).collect();
            if !kept.is_empty() {
                self.stdout.push_str(&kept.join("\n"));
                self.stdout.push('\n');
            }
        }
        flow
    }

    async fn run_simple(&mut self, command: &str) -> Flow {
        let mut words = self.words(command);
        words.retain(|w| w != "2>/dev/null");

        // Leading assignments
        let mut temp_env = Vec::new();
        while let Some(first) = words.first() {
            match first.split_once('=') {
                Some((k, v)) if is_identifier(k) => {
                    temp_env.push((k.to_string(), v.to_string()));
                    words.remove(0);
                }
                _ => break,
            }
        }
        if words.is_empty() {
            for (k, v) in temp_env {
                self.env.insert(k, v);
            }
            self.rc = 0;
            return Flow::Continue;
        }

        let args: Vec<String> = words[1..].to_vec();
        let rc = match words[0].as_str() {
            "echo" => {
                self.stdout.push_str(&args.join(" "));
                self.stdout.push('\n');
                0
            }
            "printf" => {
                let format = args.first().cloned().unwrap_or_default();
                let value = args.get(1).cloned().unwrap_or_default();
                let text = unescape(&format).replacen("%s", &value, 1);
                self.stdout.push_str(&text);
                0
            }
            "pwd" => {
                self.stdout.push_str(&format!("{}\n", self.cwd));
                0
            }
            "env" => {
                for (k, v) in &self.env {
                    self.stdout.push_str(&format!("{}={}\n", k, v));
                }
                0
            }
            "cd" => self.cd(&args),
            "export" => {
                for arg in &args {
                    if let Some((k, v)) = arg.split_once('=') {
                        if is_identifier(k) {
                            self.env.insert(k.to_string(), v.to_string());
                        }
                    }
                }
                0
            }
            "unset" => {
                for arg in &args {
                    self.env.remove(arg);
                }
                0
            }
            "true" => 0,
            "false" => 1,
            "exit" => {
                let code = args.first().and_then(|c| c.parse().ok()).unwrap_or(self.rc);
                return Flow::Exit(code);
            }
            "sleep" => {
                let secs: f64 = args.first().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                0
            }
            "mkdir" => {
                for arg in &args {
                    let path = resolve(&self.cwd, arg);
                    self.host.mkdir(&path);
                }
                0
            }
            "ls" => self.ls(&args),
            "compgen" => self.compgen(&args),
            "drop-connection" => return Flow::DropConnection,
            "clear-remote" => {
                self.stdout.push_str("\x1b[H\x1b[2J");
                0
            }
            "fail-loudly" => {
                self.stderr.push_str("boom\n");
                2
            }
            other => {
                self.stderr
                    .push_str(&format!("bash: line 1: {}: command not found\n", other));
                127
            }
        };
        self.rc = rc;
        Flow::Continue
    }

    fn cd(&mut self, args: &[String]) -> i32 {
        let target = args
            .iter()
            .find(|a| *a != "--")
            .cloned()
            .unwrap_or_else(|| self.host.home.clone());
        let path = resolve(&self.cwd, &target);
        if self.host.is_dir(&path) {
            self.cwd = path;
            0
        } else {
            self.stderr.push_str(&format!(
                "bash: line 1: cd: {}: No such file or directory\n",
                target
            ));
            1
        }
    }

    fn ls(&mut self, args: &[String]) -> i32 {
        let show_all = args.iter().any(|a| a.starts_with('-') && a.contains('a'));
        let dir = args
            .iter()
            .find(|a| !a.starts_with('-'))
            .map(|a| resolve(&self.cwd, a))
            .unwrap_or_else(|| self.cwd.clone());
        if !self.host.is_dir(&dir) {
            self.stderr
                .push_str(&format!("ls: cannot access '{}': No such file or directory\n", dir));
            return 2;
        }
        let mut entries = Vec::new();
        if show_all {
            entries.push(".".to_string());
            entries.push("..".to_string());
        }
        entries.extend(self.host.children(&dir));
        for entry in entries {
            self.stdout.push_str(&entry);
            self.stdout.push('\n');
        }
        0
    }

    fn compgen(&mut self, args: &[String]) -> i32 {
        let word = args.last().cloned().unwrap_or_default();
        let candidates: Vec<String> = match args.first().map(String::as_str) {
            Some("-c") => COMMANDS
                .iter()
                .filter(|c| c.starts_with(&word))
                .map(|c| c.to_string())
                .collect(),
            Some("-f") => self
                .host
                .children(&self.cwd)
                .into_iter()
                .filter(|c| c.starts_with(&word))
                .collect(),
            _ => Vec::new(),
        };
        for c in &candidates {
            self.stdout.push_str(c);
            self.stdout.push('\n');
        }
        if candidates.is_empty() {
            1
        } else {
            0
        }
    }

    /// Split into words honoring quotes and expanding `$VAR` / `$?`
    fn words(&self, command: &str) -> Vec<String> {
        let mut words = Vec::new();
        let mut current = String::new();
        let mut in_word = false;
        let mut chars = command.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    in_word = true;
                    for q in chars.by_ref() {
                        if q == '\'' {
                            break;
                        }
                        current.push(q);
                    }
                }
                '"' => {
                    in_word = true;
                    let mut inner = String::new();
                    for q in chars.by_ref() {
                        if q == '"' {
                            break;
                        }
                        inner.push(q);
                    }
                    current.push_str(&self.expand(&inner));
                }
                '\\' => {
                    in_word = true;
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '$' => {
                    in_word = true;
                    let mut name = String::new();
                    if chars.peek() == Some(&'?') {
                        chars.next();
                        current.push_str(&self.rc.to_string());
                        continue;
                    }
                    while let Some(&n) = chars.peek() {
                        if n == '_' || n.is_ascii_alphanumeric() {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    current.push_str(self.env.get(&name).map(String::as_str).unwrap_or(""));
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    in_word = true;
                    current.push(c);
                }
            }
        }
        if in_word {
            words.push(current);
        }
        words
    }

    fn expand(&self, text: &str) -> String {
        let mut out = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            if chars.peek() == Some(&'?') {
                chars.next();
                out.push_str(&self.rc.to_string());
                continue;
            }
            let mut name = String::new();
            while let Some(&n) = chars.peek() {
                if n == '_' || n.is_ascii_alphanumeric() {
                    name.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push_str(self.env.get(&name).map(String::as_str).unwrap_or(""));
        }
        out
    }
}

/// Split a line on `&&`, `||` and `;` outside single quotes
fn split_ops(line: &str) -> Vec<(String, Option<&'static str>)> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_single = !in_single;
                current.push(c);
            }
            '&' if !in_single && chars.peek() == Some(&'&') => {
                chars.next();
                parts.push((std::mem::take(&mut current), Some("&&")));
            }
            '|' if !in_single && chars.peek() == Some(&'|') => {
                chars.next();
                parts.push((std::mem::take(&mut current), Some("||")));
            }
            ';' if !in_single => {
                parts.push((std::mem::take(&mut current), Some(";")));
            }
            c => current.push(c),
        }
    }
    parts.push((current, None));
    parts
        .into_iter()
        .map(|(s, op)| (s.trim().to_string(), op))
        .filter(|(s, _)| !s.is_empty())
        .collect()
}

fn unescape(format: &str) -> String {
    format.replace("\\n", "\n").replace("\\0", "\0")
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Resolve `path` against `cwd`, normalizing `.` and `..`
fn resolve(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Channel to a simulated host
pub struct FakeChannel {
    host: Arc<FakeHost>,
    closed: AtomicBool,
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    async fn exec(&self, command: &str) -> Result<ExecOutput, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.host.execs.fetch_add(1, Ordering::SeqCst);

        let pending_failures = self.host.fail_execs.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.host.fail_execs.fetch_sub(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            return Err(TransportError::Channel("broken pipe".into()));
        }

        let result = self.host.run_script(command).await;
        if result.is_err() {
            self.closed.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn send_interrupt(&self) -> Result<(), TransportError> {
        self.host.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector over a set of simulated hosts
#[derive(Default)]
pub struct FakeConnector {
    hosts: Mutex<HashMap<HostId, Arc<FakeHost>>>,
}

impl FakeConnector {
    pub fn add(&self, id: &str) -> Arc<FakeHost> {
        let host = FakeHost::new();
        self.hosts
            .lock()
            .unwrap()
            .insert(HostId::new(id), Arc::clone(&host));
        host
    }

    pub fn host(&self, id: &str) -> Arc<FakeHost> {
        Arc::clone(&self.hosts.lock().unwrap()[&HostId::new(id)])
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        target: &HostTarget,
        _timeout: Duration,
    ) -> Result<Arc<dyn RemoteChannel>, TransportError> {
        let host = self
            .hosts
            .lock()
            .unwrap()
            .get(&target.id)
            .cloned()
            .ok_or_else(|| TransportError::Handshake(format!("{}: no route to host", target.address)))?;

        let delay = *host.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let refuse_once = host
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse_once || host.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Handshake(format!(
                "{}:{}: connection refused",
                target.address, target.port
            )));
        }

        host.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeChannel {
            host,
            closed: AtomicBool::new(false),
        }))
    }
}

/// An engine wired to simulated hosts
pub struct TestEngine {
    pub state: Arc<EngineState>,
    pub connector: Arc<FakeConnector>,
    pub inventory: Arc<Inventory>,
}

pub const ALICE_TOKEN: &str = "alice-token";
pub const BOB_TOKEN: &str = "bob-token";
pub const ROOT_TOKEN: &str = "root-token";

pub fn alice() -> Operator {
    Operator {
        id: OperatorId::new("alice"),
        name: "alice".into(),
        elevated: false,
    }
}

pub fn bob() -> Operator {
    Operator {
        id: OperatorId::new("bob"),
        name: "bob".into(),
        elevated: false,
    }
}

pub fn root() -> Operator {
    Operator {
        id: OperatorId::new("root"),
        name: "root".into(),
        elevated: true,
    }
}

/// Config with hosts owned by alice and three operators
pub fn test_config(host_ids: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.hosts = host_ids
        .iter()
        .map(|id| HostEntry {
            id: id.to_string(),
            name: None,
            address: format!("{}.internal", id),
            port: 22,
            username: "ubuntu".into(),
            password: Some("secret".into()),
            key_path: None,
            passphrase: None,
            owner: "alice".into(),
            host_key: None,
        })
        .collect();
    config.operators = [("alice", ALICE_TOKEN, false), ("bob", BOB_TOKEN, false), ("root", ROOT_TOKEN, true)]
        .iter()
        .map(|(id, token, elevated)| OperatorEntry {
            id: id.to_string(),
            name: None,
            token_sha256: token_digest(token),
            elevated: *elevated,
        })
        .collect();
    config
}

pub fn engine_with(config: EngineConfig) -> TestEngine {
    let connector = Arc::new(FakeConnector::default());
    for entry in &config.hosts {
        connector.add(&entry.id);
    }
    let inventory = Arc::new(Inventory::new(&config.hosts));
    let directory = Arc::new(TokenDirectory::new(&config.operators, Arc::clone(&inventory)));
    let state = Arc::new(EngineState::new(
        config,
        Arc::clone(&connector) as Arc<dyn Connector>,
        Arc::clone(&inventory) as Arc<dyn ft_core::traits::HostStore>,
        directory,
    ));
    TestEngine {
        state,
        connector,
        inventory,
    }
}

pub fn engine(host_ids: &[&str]) -> TestEngine {
    engine_with(test_config(host_ids))
}
