//! Core trait definitions

mod collaborator;
mod transport;

pub use collaborator::{HostStore, OperatorDirectory};
pub use transport::{Connector, ExecOutput, RemoteChannel};
