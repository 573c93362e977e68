//! Config-backed persistence collaborator

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use ft_core::config::HostEntry;
use ft_core::traits::HostStore;
use ft_core::types::{AuditRecord, Credential, HostStatus, HostTarget, ScriptLogEntry};
use ft_core::{ExecutionId, HostId, OperatorId, StoreError};

/// Audit records kept in memory
const AUDIT_CAPACITY: usize = 10_000;

/// Host inventory from the config file, with in-memory status, audit log
/// and script log
pub struct Inventory {
    hosts: HashMap<HostId, HostEntry>,
    statuses: DashMap<HostId, (HostStatus, u64)>,
    audit: Mutex<VecDeque<AuditRecord>>,
    scripts: DashMap<ExecutionId, ScriptLogEntry>,
}

impl Inventory {
    /// Build from config entries; later duplicates of an id are ignored
    pub fn new(entries: &[HostEntry]) -> Self {
        let mut hosts = HashMap::new();
        for entry in entries {
            let id = HostId::new(entry.id.clone());
            if hosts.contains_key(&id) {
                tracing::warn!("Duplicate host id {} in inventory, ignoring", id);
                continue;
            }
            if entry.password.is_none() && entry.key_path.is_none() {
                tracing::warn!("Host {} has neither password nor key_path", id);
            }
            hosts.insert(id, entry.clone());
        }
        tracing::info!("Loaded {} hosts into inventory", hosts.len());

        Self {
            hosts,
            statuses: DashMap::new(),
            audit: Mutex::new(VecDeque::new()),
            scripts: DashMap::new(),
        }
    }

    /// Owner of a host
    pub fn owner_of(&self, id: &HostId) -> Option<OperatorId> {
        self.hosts.get(id).map(|e| OperatorId::new(e.owner.clone()))
    }

    /// Last recorded status and check time
    pub fn status(&self, id: &HostId) -> Option<(HostStatus, u64)> {
        self.statuses.get(id).map(|r| *r.value())
    }

    /// Most recent audit records, oldest first
    pub async fn recent_audit(&self, limit: usize) -> Vec<AuditRecord> {
        let audit = self.audit.lock().await;
        let skip = audit.len().saturating_sub(limit);
        audit.iter().skip(skip).cloned().collect()
    }

    /// Persisted script log entry
    pub fn script_log(&self, id: &ExecutionId) -> Option<ScriptLogEntry> {
        self.scripts.get(id).map(|r| r.value().clone())
    }

    /// Number of hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    async fn credential(&self, entry: &HostEntry) -> Result<Credential, StoreError> {
        if let Some(path) = entry.resolved_key_path() {
            let pem = tokio::fs::read_to_string(&path).await?;
            return Ok(Credential::PrivateKey {
                pem,
                passphrase: entry.passphrase.clone(),
            });
        }
        match &entry.password {
            Some(password) => Ok(Credential::Password(password.clone())),
            None => Err(StoreError::Backend(format!(
                "host {} has no credential configured",
                entry.id
            ))),
        }
    }
}

#[async_trait]
impl HostStore for Inventory {
    async fn host_target(&self, id: &HostId) -> Result<Option<HostTarget>, StoreError> {
        let Some(entry) = self.hosts.get(id) else {
            return Ok(None);
        };

        Ok(Some(HostTarget {
            id: id.clone(),
            name: entry.display_name().to_string(),
            address: entry.address.clone(),
            port: entry.port,
            username: entry.username.clone(),
            credential: self.credential(entry).await?,
            owner_id: OperatorId::new(entry.owner.clone()),
            host_key: entry.host_key.clone(),
            status: self.status(id).map(|(s, _)| s).unwrap_or_default(),
        }))
    }

    async fn set_host_status(
        &self,
        id: &HostId,
        status: HostStatus,
        checked_at: u64,
    ) -> Result<(), StoreError> {
        if !self.hosts.contains_key(id) {
            return Err(StoreError::NotFound(format!("host {}", id)));
        }
        self.statuses.insert(id.clone(), (status, checked_at));
        Ok(())
    }

    async fn append_audit_record(&self, record: AuditRecord) -> Result<(), StoreError> {
        tracing::info!(
            target: "fanterm::audit",
            host = %record.host_id,
            operator = %record.operator_id,
            kind = ?record.kind,
            payload = %record.payload,
            "audit"
        );

        let mut audit = self.audit.lock().await;
        audit.push_back(record);
        while audit.len() > AUDIT_CAPACITY {
            audit.pop_front();
        }
        Ok(())
    }

    async fn create_script_log(&self, entry: &ScriptLogEntry) -> Result<(), StoreError> {
        self.scripts
            .insert(entry.execution_id.clone(), entry.clone());
        Ok(())
    }

    async fn update_script_log(&self, entry: &ScriptLogEntry) -> Result<(), StoreError> {
        match self.scripts.get_mut(&entry.execution_id) {
            Some(mut existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "script log {}",
                entry.execution_id
            ))),
        }
    }
}
