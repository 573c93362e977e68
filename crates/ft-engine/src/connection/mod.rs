//! Connection management

mod health;
mod pool;
mod ssh;

pub use health::{LivenessProbe, PROBE_COMMAND};
pub use pool::{ConnectionPool, PooledConnection};
pub use ssh::SshConnector;
