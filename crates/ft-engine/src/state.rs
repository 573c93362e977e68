//! Global engine state

use std::sync::Arc;

use ft_core::config::EngineConfig;
use ft_core::traits::{Connector, HostStore, OperatorDirectory};

use crate::connection::{ConnectionPool, SshConnector};
use crate::fanout::FanoutExecutor;
use crate::inventory::{Inventory, TokenDirectory};
use crate::shell::CommandMiddleware;
use crate::terminal::TerminalRegistry;

/// Shared state of the engine daemon
pub struct EngineState {
    /// Configuration
    pub config: EngineConfig,
    /// Connection pool
    pub pool: Arc<ConnectionPool>,
    /// Terminal session registry
    pub registry: Arc<TerminalRegistry>,
    /// Fan-out executor
    pub fanout: Arc<FanoutExecutor>,
    /// Auth collaborator
    pub directory: Arc<dyn OperatorDirectory>,
}

impl EngineState {
    /// Wire the engine around explicit collaborators
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn HostStore>,
        directory: Arc<dyn OperatorDirectory>,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            connector,
            store,
            config.timeouts.clone(),
        ));
        let middleware = Arc::new(CommandMiddleware::new(
            config.policy.clone(),
            config.terminal.output_cap_bytes,
        ));
        let registry = Arc::new(TerminalRegistry::new(
            Arc::clone(&pool),
            Arc::clone(&directory),
            Arc::clone(&middleware),
            config.timeouts.clone(),
            config.terminal.clone(),
        ));
        let fanout = Arc::new(FanoutExecutor::new(
            Arc::clone(&pool),
            Arc::clone(&directory),
            middleware,
            &config.timeouts,
            &config.fanout,
        ));

        Self {
            config,
            pool,
            registry,
            fanout,
            directory,
        }
    }

    /// Engine over SSH with the config file's inventory and operators
    pub fn from_config(config: EngineConfig) -> Self {
        let inventory = Arc::new(Inventory::new(&config.hosts));
        let directory = Arc::new(TokenDirectory::new(
            &config.operators,
            Arc::clone(&inventory),
        ));
        let connector = Arc::new(SshConnector::new(&config.ssh));
        Self::new(config, connector, inventory, directory)
    }

    /// Get the connection pool
    pub fn connection_pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Get the terminal registry
    pub fn terminal_registry(&self) -> &Arc<TerminalRegistry> {
        &self.registry
    }
}
