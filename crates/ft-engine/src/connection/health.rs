//! Connection liveness probing

use std::time::Duration;

use super::pool::PooledConnection;

/// Cheap command used to test a cached connection
pub const PROBE_COMMAND: &str = "echo __ft_alive__";

/// Marker the probe command prints on a healthy connection
const PROBE_MARKER: &str = "__ft_alive__";

/// Checks that a cached connection still executes commands
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    /// Probe timeout
    pub timeout: Duration,
}

impl LivenessProbe {
    /// Create a new probe
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe a connection
    ///
    /// A connection busy with a shell command is alive by definition and is
    /// not probed.
    pub async fn check(&self, conn: &PooledConnection) -> bool {
        if conn.is_released() {
            return false;
        }
        if conn.is_busy() {
            tracing::trace!("Skipping probe of busy connection {}", conn.key);
            return true;
        }

        match conn.exec(PROBE_COMMAND, self.timeout).await {
            Ok(output) if output.stdout.contains(PROBE_MARKER) => true,
            Ok(output) => {
                tracing::debug!(
                    "Liveness probe on {} returned unexpected output (exit {})",
                    conn.key,
                    output.exit_code
                );
                false
            }
            Err(e) => {
                tracing::debug!("Liveness probe on {} failed: {}", conn.key, e);
                false
            }
        }
    }
}
