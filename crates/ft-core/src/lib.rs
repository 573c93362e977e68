//! ft-core: Core abstractions and configuration for fanterm
//!
//! This crate provides shared types, error kinds, configuration structures,
//! the transport and collaborator traits, and the client-tier API types
//! used by the engine and the CLI.

pub mod api;
pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{FtError, StoreError, TransportError};
pub use types::{ConnectionKey, ExecutionId, HostId, OperatorId, SessionId};

/// Result alias for engine operations
pub type FtResult<T> = Result<T, FtError>;
