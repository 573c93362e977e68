//! Fan-out executor
//!
//! Runs one command on many hosts and aggregates per-host results into a
//! script execution. Hosts run independently, up to the configured
//! concurrency; a failure on one host is recorded for that host and never
//! aborts its siblings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::RwLock;

use ft_core::api::ExecutionView;
use ft_core::config::{FanoutConfig, TimeoutConfig};
use ft_core::time::{current_time_millis, elapsed_duration};
use ft_core::traits::{HostStore, OperatorDirectory};
use ft_core::types::{
    AuditKind, AuditRecord, ExecutionStatus, HostOutcome, HostResult, Operator, ScriptLogEntry,
};
use ft_core::{ExecutionId, FtError, FtResult, HostId, OperatorId};

use crate::connection::ConnectionPool;
use crate::shell::CommandMiddleware;

/// A script execution and its result slots (target order)
struct Execution {
    entry: ScriptLogEntry,
    slots: Vec<Option<HostResult>>,
}

impl Execution {
    fn view(&self) -> ExecutionView {
        ExecutionView {
            execution_id: self.entry.execution_id.clone(),
            operator_id: self.entry.operator_id.clone(),
            command: self.entry.command.clone(),
            status: self.entry.status,
            host_ids: self.entry.host_ids.clone(),
            results: self.slots.iter().flatten().cloned().collect(),
            created_at: self.entry.created_at,
            finished_at: self.entry.finished_at,
        }
    }

    fn sync_entry(&mut self) {
        self.entry.results = self.slots.iter().flatten().cloned().collect();
    }
}

/// Runs commands across many hosts
pub struct FanoutExecutor {
    pool: Arc<ConnectionPool>,
    store: Arc<dyn HostStore>,
    directory: Arc<dyn OperatorDirectory>,
    middleware: Arc<CommandMiddleware>,
    timeout: Duration,
    concurrency: usize,
    executions: DashMap<ExecutionId, Arc<RwLock<Execution>>>,
}

impl FanoutExecutor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        directory: Arc<dyn OperatorDirectory>,
        middleware: Arc<CommandMiddleware>,
        timeouts: &TimeoutConfig,
        fanout: &FanoutConfig,
    ) -> Self {
        Self {
            store: Arc::clone(pool.store()),
            pool,
            directory,
            middleware,
            timeout: timeouts.fanout,
            concurrency: fanout.concurrency.max(1),
            executions: DashMap::new(),
        }
    }

    /// Validate and start a fan-out; returns once the execution is recorded
    ///
    /// The whole batch is rejected if the caller may not use any one host.
    pub async fn run(
        self: &Arc<Self>,
        caller: &Operator,
        command: &str,
        host_ids: &[HostId],
        confirm: bool,
    ) -> FtResult<ExecutionId> {
        let command = command.trim();
        if command.is_empty() {
            return Err(FtError::InvalidRequest("command is empty".into()));
        }

        let mut seen = HashSet::new();
        let hosts: Vec<HostId> = host_ids
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();
        if hosts.is_empty() {
            return Err(FtError::InvalidRequest("no target hosts".into()));
        }

        for host in &hosts {
            if !caller.elevated && !self.directory.can_access_host(&caller.id, host).await {
                tracing::warn!("Fan-out by {} rejected: no access to {}", caller.id, host);
                return Err(FtError::AccessDenied(format!("host {} is not accessible", host)));
            }
        }

        let classification = self.middleware.classify(command);
        if !classification.allowed {
            let reason = classification
                .warning
                .unwrap_or_else(|| "command rejected".to_string());
            for host in &hosts {
                self.audit(
                    host,
                    &caller.id,
                    AuditKind::CommandBlocked,
                    json!({ "command": command, "reason": reason }),
                )
                .await;
            }
            return Err(FtError::CommandBlocked(reason));
        }
        if classification.requires_confirmation
            && self.middleware.policy().require_confirmation
            && !confirm
        {
            return Err(FtError::ConfirmationRequired(
                classification
                    .warning
                    .unwrap_or_else(|| "confirmation required".to_string()),
            ));
        }

        let command = self.middleware.preprocess(command);
        let execution_id = ExecutionId::generate();
        let entry = ScriptLogEntry {
            execution_id: execution_id.clone(),
            operator_id: caller.id.clone(),
            command: command.clone(),
            host_ids: hosts.clone(),
            status: ExecutionStatus::Running,
            results: Vec::new(),
            created_at: current_time_millis(),
            finished_at: None,
        };
        self.store.create_script_log(&entry).await?;

        let execution = Arc::new(RwLock::new(Execution {
            slots: vec![None; hosts.len()],
            entry,
        }));
        self.executions
            .insert(execution_id.clone(), Arc::clone(&execution));

        tracing::info!(
            "Fan-out {} by {} on {} hosts: {}",
            execution_id,
            caller.id,
            hosts.len(),
            command
        );

        let executor = Arc::clone(self);
        let operator_id = caller.id.clone();
        tokio::spawn(async move {
            let driver = tokio::spawn({
                let executor = Arc::clone(&executor);
                let execution = Arc::clone(&execution);
                async move { executor.drive(execution, operator_id, command, hosts).await }
            });
            if let Err(e) = driver.await {
                tracing::error!("Fan-out driver failed: {}", e);
                executor.finish(&execution, ExecutionStatus::Failed).await;
            }
        });

        Ok(execution_id)
    }

    /// Current state of an execution visible to `caller`
    pub async fn status(&self, id: &ExecutionId, caller: &Operator) -> FtResult<ExecutionView> {
        let execution = self
            .executions
            .get(id)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| FtError::ExecutionNotFound(id.clone()))?;

        let view = execution.read().await.view();
        if !caller.elevated && view.operator_id != caller.id {
            return Err(FtError::ExecutionNotFound(id.clone()));
        }
        Ok(view)
    }

    /// Forget finished executions older than `retention`
    pub fn prune(&self, retention: Duration) -> usize {
        let before = self.executions.len();
        self.executions.retain(|_, execution| match execution.try_read() {
            Ok(exec) => match exec.entry.finished_at {
                Some(finished) => elapsed_duration(finished) < retention,
                None => true,
            },
            Err(_) => true,
        });
        before - self.executions.len()
    }

    /// Number of tracked executions
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    async fn drive(
        self: Arc<Self>,
        execution: Arc<RwLock<Execution>>,
        operator_id: OperatorId,
        command: String,
        hosts: Vec<HostId>,
    ) {
        let mut results = stream::iter(hosts.into_iter().enumerate())
            .map(|(idx, host)| {
                let executor = Arc::clone(&self);
                let operator_id = operator_id.clone();
                let command = command.clone();
                async move {
                    let result = executor.run_host(&host, &operator_id, &command).await;
                    (idx, result)
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((idx, result)) = results.next().await {
            let entry = {
                let mut exec = execution.write().await;
                if let Some(slot) = exec.slots.get_mut(idx) {
                    *slot = Some(result);
                }
                exec.sync_entry();
                exec.entry.clone()
            };
            if let Err(e) = self.store.update_script_log(&entry).await {
                tracing::warn!("Failed to update script log {}: {}", entry.execution_id, e);
            }
        }

        self.finish(&execution, ExecutionStatus::Completed).await;
    }

    async fn run_host(&self, host: &HostId, operator_id: &OperatorId, command: &str) -> HostResult {
        let started_at = current_time_millis();
        let outcome = self
            .pool
            .exec_with_retry(host, operator_id, command, self.timeout)
            .await;

        let result = match outcome {
            Ok(output) => {
                let output = self.middleware.postprocess(output, command);
                tracing::debug!("Fan-out on {} exited {}", host, output.exit_code);
                HostResult {
                    host_id: host.clone(),
                    outcome: HostOutcome::Success,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: Some(output.exit_code),
                    error: None,
                    started_at,
                    finished_at: current_time_millis(),
                }
            }
            Err(e) => {
                tracing::warn!("Fan-out on {} failed: {}", host, e);
                HostResult {
                    host_id: host.clone(),
                    outcome: HostOutcome::Failed,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    error: Some(e.to_string()),
                    started_at,
                    finished_at: current_time_millis(),
                }
            }
        };

        self.audit(
            host,
            operator_id,
            AuditKind::ScriptCommand,
            json!({
                "command": command,
                "outcome": result.outcome,
                "exitCode": result.exit_code,
                "error": result.error,
            }),
        )
        .await;

        result
    }

    /// Record the final status; readers see it only once it is persisted
    async fn finish(&self, execution: &RwLock<Execution>, status: ExecutionStatus) {
        let mut exec = execution.write().await;
        if exec.entry.status != ExecutionStatus::Running {
            return;
        }
        exec.entry.status = status;
        exec.entry.finished_at = Some(current_time_millis());
        exec.sync_entry();

        tracing::info!("Fan-out {} {}", exec.entry.execution_id, status);
        if let Err(e) = self.store.update_script_log(&exec.entry).await {
            tracing::warn!("Failed to update script log {}: {}", exec.entry.execution_id, e);
        }
    }

    async fn audit(
        &self,
        host: &HostId,
        operator_id: &OperatorId,
        kind: AuditKind,
        payload: serde_json::Value,
    ) {
        let record = AuditRecord {
            host_id: host.clone(),
            operator_id: operator_id.clone(),
            kind,
            payload,
            recorded_at: current_time_millis(),
        };
        if let Err(e) = self.store.append_audit_record(record).await {
            tracing::warn!("Failed to record audit entry for {}: {}", host, e);
        }
    }
}
