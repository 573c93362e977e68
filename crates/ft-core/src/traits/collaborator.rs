//! External collaborator contracts
//!
//! The engine does not own persistence or authentication. It consumes them
//! through these narrow traits.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{AuditRecord, HostId, HostStatus, HostTarget, Operator, OperatorId, ScriptLogEntry};

/// Persistence collaborator: host records, audit log, script log
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Look up a host target with its credential
    async fn host_target(&self, id: &HostId) -> Result<Option<HostTarget>, StoreError>;

    /// Record reachability status of a host
    async fn set_host_status(
        &self,
        id: &HostId,
        status: HostStatus,
        checked_at: u64,
    ) -> Result<(), StoreError>;

    /// Append an audit record
    async fn append_audit_record(&self, record: AuditRecord) -> Result<(), StoreError>;

    /// Create the script log entry for a new fan-out execution
    async fn create_script_log(&self, entry: &ScriptLogEntry) -> Result<(), StoreError>;

    /// Update the script log entry of a fan-out execution
    async fn update_script_log(&self, entry: &ScriptLogEntry) -> Result<(), StoreError>;
}

/// Auth collaborator: token resolution and host authorization
#[async_trait]
pub trait OperatorDirectory: Send + Sync {
    /// Resolve a bearer token to an operator
    async fn resolve_operator(&self, token: &str) -> Option<Operator>;

    /// Whether the operator may use the host (always true when elevated)
    async fn can_access_host(&self, operator: &OperatorId, host: &HostId) -> bool;
}
