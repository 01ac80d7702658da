use super::{ShutdownCoordinator, ShutdownReason, ShutdownState};
use crate::error::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

impl ShutdownCoordinator {
    /// Listen for SIGTERM, SIGINT and SIGHUP and turn them into shutdown requests.
    ///
    /// The listener only calls [`request_shutdown`](Self::request_shutdown);
    /// the drain and cleanup work happens in [`run`](Self::run). The task ends
    /// once the coordinator reaches TERMINATED.
    #[cfg(unix)]
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        // Register synchronously so a signal arriving right after this call is not lost
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = sigterm.recv() => "SIGTERM",
                    Some(()) = sigint.recv() => "SIGINT",
                    Some(()) = sighup.recv() => "SIGHUP",
                    _ = coordinator.wait_for_state(ShutdownState::Terminated) => break,
                };

                info!("Received {} signal", name);
                coordinator.request_shutdown(ShutdownReason::Signal(name.to_string()));
            }
        });

        info!("Installed shutdown signal handlers for SIGTERM, SIGINT, SIGHUP");
        Ok(handle)
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            break;
                        }
                        info!("Received Ctrl+C");
                        coordinator.request_shutdown(ShutdownReason::Signal("CTRL_C".to_string()));
                    }
                    _ = coordinator.wait_for_state(ShutdownState::Terminated) => break,
                }
            }
        });

        Ok(handle)
    }
}
