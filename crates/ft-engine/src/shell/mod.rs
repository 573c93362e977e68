//! Shell emulation and command middleware

mod middleware;
mod session;

pub use middleware::{Classification, CommandMiddleware, FORCED_TERM, TRUNCATION_MARKER};
pub use session::{quote, ShellOutput, ShellSession, CLEAR_SEQUENCE};
