//! Client-tier protocol types
//!
//! JSON bodies exchanged between browser/CLI clients and the engine's
//! polling API. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::types::{
    ExecutionId, ExecutionStatus, HostId, HostResult, OperatorId, SessionId, StreamKind,
};

/// Request to create (or join) a terminal session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub host_id: HostId,
}

/// Public description of a terminal session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub session_id: SessionId,
    pub host_id: HostId,
    pub current_dir: String,
    pub created_at: u64,
    /// A command is currently executing
    pub running: bool,
}

/// List of session descriptors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionList {
    pub sessions: Vec<SessionDescriptor>,
}

/// Request to run a command in a terminal session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub command: String,

    /// Operator acknowledged the confirmation prompt for this command
    #[serde(default)]
    pub confirm: bool,

    /// Wait for the result (false: return the echo, poll for output)
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

/// Result of an execute request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    /// The command as rewritten by the middleware (what actually ran)
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// Absent while the command is still running
    pub exit_code: Option<i32>,
    pub current_dir: String,
    /// Advisory warning from classification
    pub warning: Option<String>,
    /// Client should reset its screen
    pub clear: bool,
    /// Result will arrive through polling
    pub pending: bool,
}

/// Query of a poll request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollQuery {
    /// Return lines strictly newer than this timestamp (ms)
    pub since: Option<u64>,
}

/// One buffered terminal line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputLine {
    /// Strictly increasing within a session
    pub timestamp: u64,
    pub stream: StreamKind,
    pub text: String,
}

/// Buffered output since a cursor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub stdout: String,
    pub stderr: String,
    pub has_new_output: bool,
    pub current_dir: String,
    /// Cursor to pass as `since` on the next poll
    pub timestamp: u64,
    /// A command is currently executing
    pub running: bool,
    /// Every new line, input echoes included, in arrival order
    pub lines: Vec<OutputLine>,
}

/// Tab-completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub partial: String,
    /// Directory to complete in (defaults to the tracked directory)
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Tab-completion suggestions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub suggestions: Vec<String>,
}

/// Acknowledgement for operations that always succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub const OK: Ack = Ack { ok: true };
}

/// Fan-out submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutRequest {
    pub command: String,
    pub host_ids: Vec<HostId>,
    #[serde(default)]
    pub confirm: bool,
}

/// Fan-out accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutAccepted {
    pub execution_id: ExecutionId,
}

/// Aggregated status of a fan-out execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionView {
    pub execution_id: ExecutionId,
    pub operator_id: OperatorId,
    pub command: String,
    pub status: ExecutionStatus,
    pub host_ids: Vec<HostId>,
    /// Results in target order; hosts still running are absent
    pub results: Vec<HostResult>,
    pub created_at: u64,
    pub finished_at: Option<u64>,
}

/// Liveness report of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Tracked terminal sessions
    pub sessions: usize,
    /// Live pooled connections
    pub connections: usize,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind (`session_not_found`, `session_busy`, ...)
    pub error: String,
    pub message: String,
}
