//! ft-engine: Session engine for remote Ubuntu hosts
//!
//! The engine keeps pooled SSH connections per (host, operator), emulates a
//! persistent shell on top of stateless command execution, exposes terminal
//! sessions through a polling HTTP API, and fans commands out to many hosts
//! at once.

pub mod connection;
pub mod fanout;
pub mod inventory;
pub mod server;
pub mod shell;
pub mod state;
pub mod terminal;

pub use state::EngineState;
