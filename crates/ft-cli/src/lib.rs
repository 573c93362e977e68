//! ft-cli: Command-line client for fanterm
//!
//! Provides the `fanterm` CLI for opening terminal sessions on managed
//! hosts and running commands across many hosts through the engine's
//! HTTP polling API.

pub mod client;
pub mod commands;
pub mod output;
