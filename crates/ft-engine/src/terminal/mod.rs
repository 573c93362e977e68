//! Polling terminal sessions

mod buffer;
mod cleanup;
mod completion;
mod registry;
mod single_flight;

pub use buffer::OutputBuffer;
pub use cleanup::{run_idle_sweep, sweep_once};
pub use registry::{TerminalRegistry, TerminalSession};
pub use single_flight::SingleFlight;
