//! Connection pool implementation
//!
//! Keeps at most one live authenticated channel per (host, operator) pair.
//! Cached connections are re-validated with a liveness probe before reuse;
//! a failed probe evicts the connection and falls through to a fresh
//! connect. Connecting is serialized per key so concurrent acquirers never
//! open duplicate channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use ft_core::config::TimeoutConfig;
use ft_core::time::{current_time_millis, elapsed_duration};
use ft_core::traits::{Connector, ExecOutput, HostStore, RemoteChannel};
use ft_core::types::HostStatus;
use ft_core::{ConnectionKey, FtError, FtResult, HostId, OperatorId};

use super::health::LivenessProbe;

/// Pool of authenticated connections to remote hosts
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    store: Arc<dyn HostStore>,
    timeouts: TimeoutConfig,
    probe: LivenessProbe,
    /// Live connections indexed by (host, operator)
    connections: DashMap<ConnectionKey, Arc<PooledConnection>>,
    /// Per-key locks serializing probe/connect
    connect_locks: DashMap<ConnectionKey, Arc<Mutex<()>>>,
}

/// One live channel in the pool
///
/// Every command runs on its own exec channel. Shell sessions additionally
/// serialize their compound commands (enter directory, export environment,
/// run) through [`PooledConnection::exec_serialized`], since those are not
/// atomic from the remote shell's point of view.
pub struct PooledConnection {
    /// (host, operator) this connection belongs to
    pub key: ConnectionKey,
    channel: Arc<dyn RemoteChannel>,
    exec_lock: Mutex<()>,
    /// Cancelled when the pool releases this connection
    released: CancellationToken,
    created_at: u64,
    last_used: AtomicU64,
}

impl PooledConnection {
    fn new(key: ConnectionKey, channel: Arc<dyn RemoteChannel>) -> Self {
        let now = current_time_millis();
        Self {
            key,
            channel,
            exec_lock: Mutex::new(()),
            released: CancellationToken::new(),
            created_at: now,
            last_used: AtomicU64::new(now),
        }
    }

    /// Run one stateless command on a fresh exec channel
    pub async fn exec(&self, command: &str, timeout: Duration) -> FtResult<ExecOutput> {
        self.ensure_live()?;
        let result = tokio::time::timeout(timeout, self.run(command)).await;
        Self::settle(result, timeout)
    }

    /// Run one command after any serialized command already in flight
    ///
    /// The timeout covers the wait for the lock as well as the command.
    pub async fn exec_serialized(&self, command: &str, timeout: Duration) -> FtResult<ExecOutput> {
        self.ensure_live()?;
        let result = tokio::time::timeout(timeout, async {
            let _guard = self.exec_lock.lock().await;
            self.run(command).await
        })
        .await;
        Self::settle(result, timeout)
    }

    async fn run(&self, command: &str) -> FtResult<ExecOutput> {
        self.touch();
        tracing::trace!("exec on {}: {}", self.key, command);
        let output = self.channel.exec(command).await;
        self.touch();
        output.map_err(FtError::from)
    }

    fn settle(
        result: Result<FtResult<ExecOutput>, tokio::time::error::Elapsed>,
        timeout: Duration,
    ) -> FtResult<ExecOutput> {
        match result {
            Ok(output) => output,
            Err(_) => Err(FtError::Timeout(timeout)),
        }
    }

    fn ensure_live(&self) -> FtResult<()> {
        if self.is_released() {
            return Err(FtError::Transport(format!("connection {} released", self.key)));
        }
        Ok(())
    }

    /// Send an interrupt outside the per-connection command serialization
    pub async fn interrupt(&self) -> FtResult<()> {
        if self.is_released() {
            return Err(FtError::Transport(format!("connection {} released", self.key)));
        }
        self.channel.send_interrupt().await.map_err(FtError::from)
    }

    /// Whether a serialized command is currently executing
    pub fn is_busy(&self) -> bool {
        self.exec_lock.try_lock().is_err()
    }

    /// Whether the pool released this connection or the transport dropped it
    pub fn is_released(&self) -> bool {
        self.released.is_cancelled() || self.channel.is_closed()
    }

    /// Token cancelled when this connection is released
    pub fn released_token(&self) -> CancellationToken {
        self.released.clone()
    }

    /// Creation timestamp (ms)
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Time since the last command started or finished
    pub fn idle_for(&self) -> Duration {
        elapsed_duration(self.last_used.load(Ordering::Relaxed))
    }

    fn touch(&self) {
        self.last_used
            .store(current_time_millis(), Ordering::Relaxed);
    }

    async fn shutdown(&self) {
        self.released.cancel();
        self.channel.close().await;
    }

    /// Close the channel without cancelling the release token
    ///
    /// Sessions on a discarded connection stay open and reconnect on
    /// their next command.
    async fn discard(&self) {
        self.channel.close().await;
    }
}

impl ConnectionPool {
    /// Create a new empty connection pool
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn HostStore>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            connector,
            store,
            probe: LivenessProbe::new(timeouts.probe),
            timeouts,
            connections: DashMap::new(),
            connect_locks: DashMap::new(),
        }
    }

    /// Get a live connection for (host, operator), connecting if needed
    ///
    /// With `force_new` any cached connection is discarded without probing.
    pub async fn acquire(
        &self,
        host_id: &HostId,
        operator_id: &OperatorId,
        force_new: bool,
    ) -> FtResult<Arc<PooledConnection>> {
        let key = ConnectionKey::new(host_id.clone(), operator_id.clone());
        let lock = self.connect_lock(&key);
        let _guard = lock.lock().await;

        if let Some(existing) = self.get(&key) {
            if !force_new && self.probe.check(&existing).await {
                tracing::trace!("Reusing pooled connection {}", key);
                return Ok(existing);
            }
            tracing::debug!(
                "Evicting pooled connection {} ({})",
                key,
                if force_new { "forced" } else { "failed probe" }
            );
            self.evict(&key, &existing).await;
        }

        self.connect(key).await
    }

    /// Run a command on (host, operator), retrying once on a fresh
    /// connection when the failure is connection-level
    pub async fn exec_with_retry(
        &self,
        host_id: &HostId,
        operator_id: &OperatorId,
        command: &str,
        timeout: Duration,
    ) -> FtResult<ExecOutput> {
        match self.try_exec(host_id, operator_id, command, timeout, false).await {
            Err(e) if e.is_connection_level() => {
                tracing::warn!(
                    "Command on {} failed ({}), retrying on a fresh connection",
                    host_id,
                    e
                );
                self.try_exec(host_id, operator_id, command, timeout, true)
                    .await
            }
            other => other,
        }
    }

    async fn try_exec(
        &self,
        host_id: &HostId,
        operator_id: &OperatorId,
        command: &str,
        timeout: Duration,
        force_new: bool,
    ) -> FtResult<ExecOutput> {
        let conn = self.acquire(host_id, operator_id, force_new).await?;
        conn.exec(command, timeout).await
    }

    /// Dispose of the connection for (host, operator)
    ///
    /// Shell sessions built on it observe the release through
    /// [`PooledConnection::released_token`] and close themselves.
    pub async fn release(&self, host_id: &HostId, operator_id: &OperatorId) -> bool {
        let key = ConnectionKey::new(host_id.clone(), operator_id.clone());
        match self.connections.remove(&key) {
            Some((_, conn)) => {
                self.shutdown(&conn).await;
                true
            }
            None => false,
        }
    }

    /// Release the connection only if nothing outside the pool holds it
    pub async fn release_if_unused(&self, key: &ConnectionKey) -> bool {
        match self
            .connections
            .remove_if(key, |_, conn| Arc::strong_count(conn) == 1)
        {
            Some((_, conn)) => {
                self.shutdown(&conn).await;
                true
            }
            None => false,
        }
    }

    /// Release unused connections idle for at least `idle`
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let candidates: Vec<ConnectionKey> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for() >= idle)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            let removed = self.connections.remove_if(&key, |_, conn| {
                Arc::strong_count(conn) == 1 && conn.idle_for() >= idle
            });
            if let Some((_, conn)) = removed {
                tracing::debug!("Evicting idle connection {}", key);
                self.shutdown(&conn).await;
                evicted += 1;
            }
        }
        evicted
    }

    /// Release every connection (daemon shutdown)
    pub async fn close_all(&self) {
        let keys: Vec<ConnectionKey> = self.connections.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, conn)) = self.connections.remove(&key) {
                self.shutdown(&conn).await;
            }
        }
    }

    /// Get a cached connection without probing
    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<PooledConnection>> {
        self.connections.get(key).map(|r| Arc::clone(&r))
    }

    /// Keys of all live connections
    pub fn keys(&self) -> Vec<ConnectionKey> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if pool is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of keys with a connect lock
    pub fn lock_count(&self) -> usize {
        self.connect_locks.len()
    }

    /// Handle to the persistence collaborator
    pub fn store(&self) -> &Arc<dyn HostStore> {
        &self.store
    }

    fn connect_lock(&self, key: &ConnectionKey) -> Arc<Mutex<()>> {
        self.connect_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn connect(&self, key: ConnectionKey) -> FtResult<Arc<PooledConnection>> {
        let target = self
            .store
            .host_target(&key.host_id)
            .await?
            .ok_or_else(|| FtError::HostNotFound(key.host_id.clone()))?;

        tracing::info!(
            "Connecting to {} ({}:{}) for operator {}",
            target.id,
            target.address,
            target.port,
            key.operator_id
        );

        let timeout = self.timeouts.connect;
        let result = match tokio::time::timeout(timeout, self.connector.connect(&target, timeout))
            .await
        {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("handshake timed out after {:?}", timeout)),
        };

        match result {
            Ok(channel) => {
                let conn = Arc::new(PooledConnection::new(key.clone(), channel));
                self.connections.insert(key.clone(), Arc::clone(&conn));
                self.record_status(&key.host_id, HostStatus::Connected).await;
                tracing::info!("Connected to {}", key);
                Ok(conn)
            }
            Err(message) => {
                tracing::warn!("Connection to {} failed: {}", key, message);
                self.record_status(&key.host_id, HostStatus::Error).await;
                Err(FtError::ConnectFailed {
                    host: key.host_id,
                    message,
                })
            }
        }
    }

    async fn evict(&self, key: &ConnectionKey, conn: &Arc<PooledConnection>) {
        self.connections
            .remove_if(key, |_, current| Arc::ptr_eq(current, conn));
        conn.discard().await;
    }

    async fn shutdown(&self, conn: &PooledConnection) {
        tracing::info!("Releasing connection {}", conn.key);
        conn.shutdown().await;
        // Only when no acquirer holds or awaits the lock
        self.connect_locks
            .remove_if(&conn.key, |_, lock| Arc::strong_count(lock) == 1);
        self.record_status(&conn.key.host_id, HostStatus::Disconnected)
            .await;
    }

    async fn record_status(&self, host_id: &HostId, status: HostStatus) {
        if let Err(e) = self
            .store
            .set_host_status(host_id, status, current_time_millis())
            .await
        {
            tracing::warn!("Failed to record status {} for {}: {}", status, host_id, e);
        }
    }
}
