//! In-process shutdown sequencing: stop intake, drain in-flight work, run
//! the cleanup chain.

mod cleanup;
mod readiness;
mod shutdown;
mod signals;
mod state;
mod tracker;
mod types;


pub use cleanup::{CleanupRegistry, CleanupStep};
pub use readiness::Readiness;
pub use shutdown::ShutdownCoordinator;
pub use tracker::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use types::{
    DrainOutcome, ShutdownReason, ShutdownReport, ShutdownState, StepOutcome, StepReport,
};
