//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::inventory::{HostEntry, OperatorEntry};
use super::serde_utils::duration_secs;

/// Configuration for the session engine daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address for the HTTP polling API
    pub bind_address: String,

    /// Every timeout the engine applies
    pub timeouts: TimeoutConfig,

    /// Terminal session buffering and completion limits
    pub terminal: TerminalConfig,

    /// Command classification policy
    pub policy: PolicyConfig,

    /// Fan-out executor settings
    pub fanout: FanoutConfig,

    /// SSH transport settings
    pub ssh: SshConfig,

    /// Host inventory
    pub hosts: Vec<HostEntry>,

    /// Operators allowed to use the API
    pub operators: Vec<OperatorEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8722".to_string(),
            timeouts: TimeoutConfig::default(),
            terminal: TerminalConfig::default(),
            policy: PolicyConfig::default(),
            fanout: FanoutConfig::default(),
            ssh: SshConfig::default(),
            hosts: Vec::new(),
            operators: Vec::new(),
        }
    }
}

/// Timeouts and periodic intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// SSH handshake (connect + auth)
    #[serde(with = "duration_secs")]
    pub connect: Duration,

    /// Liveness probe on a cached connection
    #[serde(with = "duration_secs")]
    pub probe: Duration,

    /// Interactive command default
    #[serde(with = "duration_secs")]
    pub command: Duration,

    /// Per-host bound for fan-out commands
    #[serde(with = "duration_secs")]
    pub fanout: Duration,

    /// Pending session creation is discarded after this
    #[serde(with = "duration_secs")]
    pub pending_creation: Duration,

    /// Sessions without execute/poll activity for this long are closed
    #[serde(with = "duration_secs")]
    pub idle_session: Duration,

    /// Interval between idle sweeps
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,

    /// Finished script executions are kept this long
    #[serde(with = "duration_secs")]
    pub execution_retention: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            probe: Duration::from_secs(5),
            command: Duration::from_secs(30),
            fanout: Duration::from_secs(600),
            pending_creation: Duration::from_secs(30),
            idle_session: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            execution_retention: Duration::from_secs(3600),
        }
    }
}

/// Terminal session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Maximum buffered lines per session (oldest dropped first)
    pub scrollback_lines: usize,

    /// Per-stream output cap before truncation
    pub output_cap_bytes: usize,

    /// Maximum suggestions per completion tier
    pub completion_limit: usize,

    /// Look-back window for a poll without `since`
    pub default_poll_window_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            scrollback_lines: 2000,
            output_cap_bytes: 50 * 1024,
            completion_limit: 15,
            default_poll_window_ms: 2000,
        }
    }
}

/// Command classification policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// When false, dangerous (but not hard-blocked) commands are rejected
    pub allow_dangerous: bool,

    /// When true, commands flagged as requiring confirmation only run
    /// if the request carries an explicit confirmation
    pub require_confirmation: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_dangerous: true,
            require_confirmation: true,
        }
    }
}

/// Fan-out executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Hosts driven at once; 1 runs hosts strictly in order
    pub concurrency: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Keepalive interval on idle connections
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Missed keepalives before the connection is dropped
    pub keepalive_max: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            keepalive_max: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts_are_reasonable() {
        let t = TimeoutConfig::default();
        assert_eq!(t.connect, Duration::from_secs(15));
        assert!(t.probe < t.command);
        assert!(t.command < t.fanout);
        assert!(t.sweep_interval < t.idle_session);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            bind_address = "0.0.0.0:80"

            [timeouts]
            command = "45s"

            [policy]
            allow_dangerous = false
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:80");
        assert_eq!(config.timeouts.command, Duration::from_secs(45));
        assert_eq!(config.timeouts.connect, Duration::from_secs(15));
        assert!(!config.policy.allow_dangerous);
        assert!(config.policy.require_confirmation);
        assert_eq!(config.terminal.output_cap_bytes, 51200);
    }
}
