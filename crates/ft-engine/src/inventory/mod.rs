//! Default collaborators backed by the config file

mod directory;
mod store;

pub use directory::{token_digest, TokenDirectory};
pub use store::Inventory;
