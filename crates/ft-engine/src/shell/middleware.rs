//! Command middleware
//!
//! Classifies, rewrites and sanitizes commands before they reach a remote
//! shell, and normalizes their output afterwards. Classification only looks
//! at the literal command text; it is advisory and not a confinement
//! boundary.

use std::sync::OnceLock;

use regex::Regex;

use ft_core::config::PolicyConfig;
use ft_core::traits::ExecOutput;

/// Marker appended to a stream cut at the output cap
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Terminal type forced for interactive programs and sessions
pub const FORCED_TERM: &str = "xterm-256color";

/// Note replacing the empty output of a directory listing
const EMPTY_DIRECTORY_NOTE: &str = "(empty directory)\n";

/// Prefix added to the output of a bare `pwd`
const PWD_PREFIX: &str = "Current directory: ";

/// Shorthand expanded when it is the first token
const ALIASES: &[(&str, &str)] = &[
    ("ll", "ls -alF"),
    ("la", "ls -A"),
    ("l", "ls -CF"),
    ("..", "cd .."),
    ("...", "cd ../.."),
    ("h", "history"),
];

/// Programs that expect a terminal
const INTERACTIVE_PROGRAMS: &[&str] = &[
    "vim", "vi", "nvim", "nano", "emacs", "less", "more", "man", "top", "htop", "ssh", "telnet",
    "ftp", "sftp", "mysql", "psql", "screen", "tmux",
];

/// Interpreters that only become interactive REPLs without arguments
const REPL_PROGRAMS: &[&str] = &["python", "python3", "node", "irb", "ghci", "bash", "sh", "zsh"];

/// apt subcommands rewritten to their non-interactive form
const APT_SUBCOMMANDS: &[&str] = &[
    "install",
    "remove",
    "purge",
    "upgrade",
    "dist-upgrade",
    "full-upgrade",
    "autoremove",
    "update",
];

/// Result of classifying a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub allowed: bool,
    pub dangerous: bool,
    pub requires_confirmation: bool,
    pub warning: Option<String>,
}

impl Classification {
    fn allow() -> Self {
        Self {
            allowed: true,
            dangerous: false,
            requires_confirmation: false,
            warning: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            dangerous: true,
            requires_confirmation: false,
            warning: Some(reason.into()),
        }
    }

    fn advisory(warning: String) -> Self {
        Self {
            warning: Some(warning),
            ..Self::allow()
        }
    }
}

struct Rules {
    blocked: Vec<(Regex, &'static str)>,
    dangerous: Vec<(Regex, &'static str)>,
    noise: Vec<Regex>,
    apt: Option<Regex>,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| {
        let compile = |patterns: &[(&str, &'static str)]| {
            patterns
                .iter()
                .filter_map(|(pattern, reason)| match Regex::new(pattern) {
                    Ok(re) => Some((re, *reason)),
                    Err(e) => {
                        tracing::error!("Invalid middleware pattern {:?}: {}", pattern, e);
                        None
                    }
                })
                .collect::<Vec<_>>()
        };

        Rules {
            blocked: compile(&[
                (r"(^|[\s;&|(])(mkfs(\.\w+)?|mke2fs|mkswap|wipefs)(\s|$)", "filesystem format"),
                (
                    r"\bdd\s+.*\bif=/dev/(zero|u?random)\b.*\bof=/dev/",
                    "zero-device write to a block device",
                ),
                (
                    r"\bdd\s+.*\bof=/dev/(sd|hd|vd|xvd|nvme|mmcblk)",
                    "raw write to a block device",
                ),
                (
                    r">\s*/dev/(sd|hd|vd|xvd|nvme|mmcblk)[a-z0-9]*(\s|$)",
                    "redirect onto a block device",
                ),
            ]),
            dangerous: compile(&[
                (r"(^|[\s;&|])(shutdown|reboot|halt|poweroff)(\s|$)", "powers off or restarts the host"),
                (r"(^|[\s;&|])init\s+[06](\s|$)", "changes the runlevel"),
                (r"(^|[\s;&|])dd\s", "raw block copy"),
                (r"(^|[\s;&|])kill\s+-9\s+-1(\s|$)", "kills every process"),
                (r"(^|[\s;&|])(killall|pkill)\s", "kills processes by name"),
                (r"(^|[\s;&|])systemctl\s+(stop|disable|mask)\s", "stops a system service"),
                (r"(^|[\s;&|])iptables\s+(-F|--flush)", "flushes firewall rules"),
                (r"(^|[\s;&|])ufw\s+disable", "disables the firewall"),
                (r"(^|[\s;&|])(chmod|chown|chgrp)\s+(-\S+\s+)*-[a-zA-Z]*R", "recursive permission change"),
                (r">\s*/etc/", "overwrites a system configuration file"),
                (r"(^|[\s;&|])(userdel|groupdel)\s", "deletes accounts"),
                (r"(^|[\s;&|])crontab\s+-r(\s|$)", "removes the crontab"),
            ]),
            noise: [
                r"^WARNING: apt does not have a stable CLI interface\. Use with caution in scripts\.\s*$",
                r"^debconf: (unable to initialize frontend|\(|falling back to frontend|delaying package configuration)",
                r"^dpkg-preconfigure: unable to re-open stdin",
                r"^sudo: unable to resolve host ",
                r"^mesg: ttyname failed",
            ]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect(),
            apt: Regex::new(r"^(sudo\s+)?apt(-get)?\s+(\S+)(.*)$").ok(),
        }
    })
}

/// Classifies, rewrites and normalizes commands
#[derive(Debug, Clone)]
pub struct CommandMiddleware {
    policy: PolicyConfig,
    output_cap: usize,
}

impl CommandMiddleware {
    /// Create middleware with the given policy and per-stream output cap
    pub fn new(policy: PolicyConfig, output_cap: usize) -> Self {
        Self { policy, output_cap }
    }

    /// Classification policy in effect
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Classify a command by its literal text
    pub fn classify(&self, command: &str) -> Classification {
        let text = command.trim();
        let rules = rules();

        if let Some(reason) = hard_block_reason(text) {
            return Classification::reject(format!("{} is never allowed", reason));
        }
        for (re, reason) in &rules.blocked {
            if re.is_match(text) {
                return Classification::reject(format!("{} is never allowed", reason));
            }
        }

        let dangerous = segments(text)
            .iter()
            .any(|seg| is_forced_recursive_delete(seg))
            .then_some("recursive forced delete")
            .or_else(|| {
                rules
                    .dangerous
                    .iter()
                    .find(|(re, _)| re.is_match(text))
                    .map(|(_, reason)| *reason)
            });

        if let Some(reason) = dangerous {
            if !self.policy.allow_dangerous {
                return Classification::reject(format!(
                    "dangerous command rejected by policy: {}",
                    reason
                ));
            }
            return Classification {
                allowed: true,
                dangerous: true,
                requires_confirmation: true,
                warning: Some(format!("Potentially dangerous: {}", reason)),
            };
        }

        let words = tokens(text);
        let Some(first) = words.first() else {
            return Classification::allow();
        };

        if matches!(*first, "sudo" | "su" | "doas") {
            return Classification {
                allowed: true,
                dangerous: false,
                requires_confirmation: true,
                warning: Some("Runs with elevated privileges".to_string()),
            };
        }

        let (verb, args) = split_verb(&words);
        if is_interactive(verb, args) {
            return Classification::advisory(format!(
                "'{}' is interactive and may not behave as expected without a terminal",
                verb
            ));
        }
        if is_long_running(verb, args) {
            return Classification::advisory(format!(
                "'{}' runs until interrupted and will be stopped at the command timeout",
                verb
            ));
        }

        Classification::allow()
    }

    /// Rewrite a command before execution
    pub fn preprocess(&self, command: &str) -> String {
        let expanded = expand_alias(command.trim());
        let rewritten = rewrite_package_manager(&expanded);
        let rewritten = force_term_for_interactive(&rewritten);
        add_confirmation_flag(&rewritten)
    }

    /// Normalize command output; exit code is never altered
    pub fn postprocess(&self, output: ExecOutput, command: &str) -> ExecOutput {
        let mut stdout = strip_noise(&output.stdout);
        let stderr = strip_noise(&output.stderr);

        let words = tokens(command.trim());
        match words.as_slice() {
            ["ls", ..] if output.exit_code == 0 && stdout.trim().is_empty() => {
                stdout = EMPTY_DIRECTORY_NOTE.to_string();
            }
            ["pwd"] if output.exit_code == 0 && !stdout.starts_with(PWD_PREFIX) => {
                stdout = format!("{}{}", PWD_PREFIX, stdout);
            }
            _ => {}
        }

        ExecOutput {
            stdout: truncate(&stdout, self.output_cap),
            stderr: truncate(&stderr, self.output_cap),
            exit_code: output.exit_code,
        }
    }
}

/// Split on command separators into simple-command segments
fn segments(text: &str) -> Vec<&str> {
    text.split(|c| c == ';' || c == '&' || c == '|' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn tokens(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// First word after any privilege prefix and its arguments
fn split_verb<'a, 'b>(words: &'b [&'a str]) -> (&'a str, &'b [&'a str]) {
    let mut idx = 0;
    while idx < words.len() && matches!(words[idx], "sudo" | "doas") {
        idx += 1;
    }
    match words.get(idx) {
        Some(verb) => (*verb, &words[idx + 1..]),
        None => ("", &[]),
    }
}

fn short_flags<'a>(args: &'a [&'a str]) -> impl Iterator<Item = &'a str> + 'a {
    args.iter()
        .copied()
        .filter(|a| a.starts_with('-') && !a.starts_with("--") && a.len() > 1)
}

fn has_short_flag(args: &[&str], flag: char) -> bool {
    short_flags(args).any(|a| a[1..].contains(flag))
}

fn has_long_flag(args: &[&str], flag: &str) -> bool {
    args.iter().any(|a| *a == flag)
}

fn is_recursive(args: &[&str]) -> bool {
    has_short_flag(args, 'r') || has_short_flag(args, 'R') || has_long_flag(args, "--recursive")
}

fn targets_root(args: &[&str]) -> bool {
    args.iter()
        .filter(|a| !a.starts_with('-'))
        .any(|a| is_root_path(a.trim_matches(|c| c == '"' || c == '\'')))
}

/// `/` or `/*` once repeated slashes, `.` and `..` are resolved
fn is_root_path(path: &str) -> bool {
    if !path.starts_with('/') {
        return false;
    }
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.is_empty() || parts == ["*"]
}

/// Hard-blocked shapes that need argument inspection rather than a regex
fn hard_block_reason(text: &str) -> Option<&'static str> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(":(){:|:&};:") {
        return Some("fork bomb");
    }

    for seg in segments(text) {
        let words = tokens(seg);
        let (verb, args) = split_verb(&words);
        match verb {
            "rm" if is_recursive(args) && targets_root(args) => {
                return Some("recursive delete of the root filesystem");
            }
            "chmod" | "chown" | "chgrp" if is_recursive(args) && targets_root(args) => {
                return Some("recursive permission reset on the root filesystem");
            }
            _ => {}
        }
    }
    None
}

fn is_forced_recursive_delete(segment: &str) -> bool {
    let words = tokens(segment);
    let (verb, args) = split_verb(&words);
    verb == "rm"
        && is_recursive(args)
        && (has_short_flag(args, 'f') || has_long_flag(args, "--force"))
}

fn is_interactive(verb: &str, args: &[&str]) -> bool {
    INTERACTIVE_PROGRAMS.contains(&verb) || (REPL_PROGRAMS.contains(&verb) && args.is_empty())
}

fn is_long_running(verb: &str, args: &[&str]) -> bool {
    match verb {
        "tail" | "journalctl" => has_short_flag(args, 'f') || has_short_flag(args, 'F') || has_long_flag(args, "--follow"),
        "watch" | "yes" => true,
        "ping" | "ping6" => !has_short_flag(args, 'c'),
        "nc" | "netcat" | "ncat" | "socat" => has_short_flag(args, 'l'),
        "docker" | "kubectl" => {
            args.first() == Some(&"logs") && (has_short_flag(args, 'f') || has_long_flag(args, "--follow"))
        }
        "tcpdump" | "iftop" | "iotop" | "vmstat" | "iostat" => true,
        _ => false,
    }
}

fn expand_alias(command: &str) -> String {
    let (first, rest) = match command.find(char::is_whitespace) {
        Some(idx) => command.split_at(idx),
        None => (command, ""),
    };
    match ALIASES.iter().find(|(alias, _)| *alias == first) {
        Some((_, expansion)) => format!("{}{}", expansion, rest),
        None => command.to_string(),
    }
}

fn rewrite_package_manager(command: &str) -> String {
    let Some(re) = rules().apt.as_ref() else {
        return command.to_string();
    };
    let Some(caps) = re.captures(command) else {
        return command.to_string();
    };

    let subcommand = caps.get(3).map_or("", |m| m.as_str());
    if !APT_SUBCOMMANDS.contains(&subcommand) {
        return command.to_string();
    }

    let sudo = caps.get(1).map_or("", |m| m.as_str());
    let rest = caps.get(4).map_or("", |m| m.as_str());
    let rest_words = tokens(rest);

    let mut flags = Vec::new();
    if subcommand != "update"
        && !has_short_flag(&rest_words, 'y')
        && !has_long_flag(&rest_words, "--yes")
        && !has_long_flag(&rest_words, "--assume-yes")
    {
        flags.push("-y");
    }
    if !has_short_flag(&rest_words, 'q') && !has_long_flag(&rest_words, "--quiet") {
        flags.push("-q");
    }

    let mut out = format!("{}apt-get {}", sudo, subcommand);
    for flag in flags {
        out.push(' ');
        out.push_str(flag);
    }
    out.push_str(rest);
    out
}

fn force_term_for_interactive(command: &str) -> String {
    let words = tokens(command);
    let (verb, _) = split_verb(&words);
    if verb.is_empty() || !INTERACTIVE_PROGRAMS.contains(&verb) || command.contains("TERM=") {
        return command.to_string();
    }
    match command.find(verb) {
        Some(idx) => format!("{}TERM={} {}", &command[..idx], FORCED_TERM, &command[idx..]),
        None => command.to_string(),
    }
}

fn add_confirmation_flag(command: &str) -> String {
    let words = tokens(command);
    let (verb, args) = split_verb(&words);
    if !matches!(verb, "rm" | "mv" | "cp") {
        return command.to_string();
    }
    if has_short_flag(args, 'i')
        || has_short_flag(args, 'I')
        || has_short_flag(args, 'f')
        || args.iter().any(|a| a.starts_with("--interactive") || *a == "--force")
    {
        return command.to_string();
    }
    // Only the first simple command is rewritten
    if segments(command).len() > 1 {
        return command.to_string();
    }
    match command.find(verb) {
        Some(idx) => {
            let end = idx + verb.len();
            format!("{} -i{}", &command[..end], &command[end..])
        }
        None => command.to_string(),
    }
}

fn strip_noise(text: &str) -> String {
    let noise = &rules().noise;
    if !text.lines().any(|line| noise.iter().any(|re| re.is_match(line))) {
        return text.to_string();
    }

    let kept: String = text
        .split_inclusive('\n')
        .filter(|line| !noise.iter().any(|re| re.is_match(line.trim_end_matches(['\r', '\n']))))
        .collect();
    kept.trim_start_matches('\n').to_string()
}

/// Cut a stream at `cap` bytes (on a char boundary) and mark it
///
/// Already-truncated text is returned unchanged.
fn truncate(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    if text.ends_with(TRUNCATION_MARKER) && text.len() <= cap + TRUNCATION_MARKER.len() {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}
