//! Remote-execution transport traits
//!
//! The transport only knows how to run one command and hand back its
//! output. It remembers nothing between calls; working directory and
//! environment persistence is layered on top by the shell session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::types::HostTarget;

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One authenticated channel to a remote host
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Run a command to completion in a fresh, stateless invocation
    async fn exec(&self, command: &str) -> Result<ExecOutput, TransportError>;

    /// Send raw bytes to the remote side without waiting for a result
    ///
    /// Used for best-effort interrupts.
    async fn send_interrupt(&self) -> Result<(), TransportError>;

    /// Whether the underlying connection is known to be gone
    fn is_closed(&self) -> bool;

    /// Close the connection gracefully
    async fn close(&self);
}

/// Opens authenticated channels to host targets
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate, bounded by `timeout`
    async fn connect(
        &self,
        target: &HostTarget,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteChannel>, TransportError>;
}
