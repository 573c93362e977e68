//! Core error types for fanterm

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{ExecutionId, HostId, SessionId};

/// Client-visible error kinds of the session engine
///
/// `Clone` so that a single failed session creation can be handed to every
/// caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FtError {
    /// Credentials, network or handshake failure
    #[error("Connection to {host} failed: {message}")]
    ConnectFailed { host: HostId, message: String },

    /// Host does not exist in the inventory
    #[error("Host not found: {0}")]
    HostNotFound(HostId),

    /// Stale or unknown terminal session
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Script execution not found
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// A command is already running in the session
    #[error("Session busy: {0}")]
    SessionBusy(SessionId),

    /// Hard security rejection
    #[error("Command blocked: {0}")]
    CommandBlocked(String),

    /// Command needs explicit confirmation before it runs
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    /// Remote execution exceeded its bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Ownership or authorization failure
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport failure on an established connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),
}

impl FtError {
    /// Whether a fresh connection might fix this error
    pub fn is_connection_level(&self) -> bool {
        matches!(self, FtError::Transport(_) | FtError::ConnectFailed { .. })
    }
}

impl From<TransportError> for FtError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(d) => FtError::Timeout(d),
            other => FtError::Transport(other.to_string()),
        }
    }
}

impl From<StoreError> for FtError {
    fn from(e: StoreError) -> Self {
        FtError::Store(e.to_string())
    }
}

/// Transport-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// TCP connect or key exchange failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Credentials rejected
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Host key did not match the pinned fingerprint
    #[error("Host key verification failed: {0}")]
    HostKeyRejected(String),

    /// Could not load the credential
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Channel open or exec failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Operation exceeded its bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Connection already closed
    #[error("Connection closed")]
    Closed,
}

/// Persistence collaborator errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
