//! Outer process supervisor: launch the worker, relay termination signals,
//! and force kill it if it overstays the shutdown window.

mod probe;
mod process;
mod runner;
mod signals;
mod types;

#[cfg(test)]
mod tests;

pub use probe::{HttpStatusProbe, OutstandingProbe};
pub use process::{Liveness, ProcessHandle};
pub use runner::Supervisor;
pub use signals::forward_os_signals;
pub use types::{status_code, ExitOutcome, SupervisorState, TermSignal, WaitOutcome};
