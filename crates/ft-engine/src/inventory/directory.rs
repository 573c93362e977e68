//! Bearer-token operator directory

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use ft_core::config::OperatorEntry;
use ft_core::traits::OperatorDirectory;
use ft_core::types::Operator;
use ft_core::{HostId, OperatorId};

use super::store::Inventory;

/// Resolves operators by the SHA-256 digest of their bearer token
pub struct TokenDirectory {
    /// Operators indexed by lowercase hex token digest
    by_digest: HashMap<String, Operator>,
    inventory: Arc<Inventory>,
}

impl TokenDirectory {
    /// Build from config entries; host ownership comes from the inventory
    pub fn new(entries: &[OperatorEntry], inventory: Arc<Inventory>) -> Self {
        let mut by_digest = HashMap::new();
        for entry in entries {
            let digest = entry.token_sha256.trim().to_ascii_lowercase();
            if digest.len() != 64 || hex::decode(&digest).is_err() {
                tracing::warn!("Operator {} has a malformed token digest, skipping", entry.id);
                continue;
            }
            let operator = Operator {
                id: OperatorId::new(entry.id.clone()),
                name: entry.name.clone().unwrap_or_else(|| entry.id.clone()),
                elevated: entry.elevated,
            };
            tracing::debug!(
                "Loaded operator {}{}",
                operator.id,
                if operator.elevated { " (elevated)" } else { "" }
            );
            by_digest.insert(digest, operator);
        }

        if by_digest.is_empty() {
            tracing::warn!("No operators configured - every API request will be rejected");
        } else {
            tracing::info!("Loaded {} operators", by_digest.len());
        }

        Self {
            by_digest,
            inventory,
        }
    }

    /// Number of operators
    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    /// Check if there are no operators
    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}

/// Hex SHA-256 digest of a bearer token
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[async_trait]
impl OperatorDirectory for TokenDirectory {
    async fn resolve_operator(&self, token: &str) -> Option<Operator> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        self.by_digest.get(&token_digest(token)).cloned()
    }

    async fn can_access_host(&self, operator: &OperatorId, host: &HostId) -> bool {
        if self
            .by_digest
            .values()
            .any(|op| op.id == *operator && op.elevated)
        {
            return true;
        }
        self.inventory.owner_of(host).as_ref() == Some(operator)
    }
}
