//! Multi-host command fan-out

mod executor;

pub use executor::FanoutExecutor;
