pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod supervisor;

#[cfg(feature = "http")]
pub mod http;

pub use config::{LameduckConfig, ServerConfig, ShutdownConfig, SupervisorConfig};
pub use coordinator::{
    CleanupRegistry, CleanupStep, ConnectionGuard, ConnectionId, ConnectionTracker, DrainOutcome,
    Readiness, ShutdownCoordinator, ShutdownReason, ShutdownReport, ShutdownState, StepOutcome,
    StepReport,
};
pub use error::{LameduckError, Result};
pub use events::{EventBus, ShutdownEvent};
pub use logging::{init_logging, LogOptions};
pub use supervisor::{
    ExitOutcome, HttpStatusProbe, OutstandingProbe, ProcessHandle, Supervisor, SupervisorState,
    TermSignal,
};

#[cfg(feature = "http")]
pub use http::{router, HttpServer, ServerState};
