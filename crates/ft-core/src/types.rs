//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of random bytes in a terminal session identifier
const SESSION_ID_BYTES: usize = 16;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the raw ID string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a remote host target
    HostId
);

string_id!(
    /// Identifier of an operator (the human driving the browser)
    OperatorId
);

string_id!(
    /// Opaque, unguessable identifier of a terminal session
    SessionId
);

string_id!(
    /// Identifier of a fan-out script execution
    ExecutionId
);

impl SessionId {
    /// Generate a fresh random session ID (32 hex chars)
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }
}

impl ExecutionId {
    /// Generate a fresh execution ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Key of a pooled connection: one live channel per (host, operator)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host_id: HostId,
    pub operator_id: OperatorId,
}

impl ConnectionKey {
    pub fn new(host_id: HostId, operator_id: OperatorId) -> Self {
        Self {
            host_id,
            operator_id,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.operator_id, self.host_id)
    }
}

/// Authentication material for a host
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password authentication
    Password(String),
    /// Private key authentication (OpenSSH/PEM text)
    PrivateKey {
        pem: String,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => write!(f, "Password(<redacted>)"),
            Credential::PrivateKey { .. } => write!(f, "PrivateKey(<redacted>)"),
        }
    }
}

/// A remote machine the engine can connect to
#[derive(Debug, Clone)]
pub struct HostTarget {
    pub id: HostId,
    /// Display name
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    /// Operator that owns this host
    pub owner_id: OperatorId,
    /// Pinned host key fingerprint, if any
    pub host_key: Option<String>,
    pub status: HostStatus,
}

/// Reachability status recorded for a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    /// Never checked
    #[default]
    Unknown,
    /// Last connection attempt succeeded
    Connected,
    /// Connection was released
    Disconnected,
    /// Last connection attempt failed
    Error,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Unknown => write!(f, "unknown"),
            HostStatus::Connected => write!(f, "connected"),
            HostStatus::Disconnected => write!(f, "disconnected"),
            HostStatus::Error => write!(f, "error"),
        }
    }
}

/// An authenticated operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub name: String,
    /// Elevated operators may access every host
    pub elevated: bool,
}

/// Which stream a buffered terminal line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Echo of the command that ran
    Input,
    Stdout,
    Stderr,
}

/// Status of a fan-out script execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one host within a fan-out execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostOutcome {
    /// Command ran (regardless of its exit code)
    Success,
    /// Connection or execution error
    Failed,
}

/// Per-host result of a fan-out execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResult {
    pub host_id: HostId,
    pub outcome: HostOutcome,
    pub stdout: String,
    pub stderr: String,
    /// Remote exit code, absent when the command never ran
    pub exit_code: Option<i32>,
    /// Error message for failed hosts
    pub error: Option<String>,
    pub started_at: u64,
    pub finished_at: u64,
}

/// Kind of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Command executed in an interactive terminal session
    TerminalCommand,
    /// Command executed as part of a fan-out
    ScriptCommand,
    /// Command rejected by the middleware
    CommandBlocked,
}

/// An audit record handed to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub host_id: HostId,
    pub operator_id: OperatorId,
    pub kind: AuditKind,
    pub payload: serde_json::Value,
    pub recorded_at: u64,
}

/// Script log entry persisted for a fan-out execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLogEntry {
    pub execution_id: ExecutionId,
    pub operator_id: OperatorId,
    pub command: String,
    pub host_ids: Vec<HostId>,
    pub status: ExecutionStatus,
    pub results: Vec<HostResult>,
    pub created_at: u64,
    pub finished_at: Option<u64>,
}
