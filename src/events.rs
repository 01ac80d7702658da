use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Lifecycle events emitted while a process shuts down
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ShutdownEvent {
    /// The first shutdown trigger was accepted
    ShutdownInitiated {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A trigger arrived while shutdown was already underway
    DuplicateSignal { reason: String },
    /// Readiness indicator changed
    ReadinessChanged { ready: bool },
    /// Periodic drain report
    DrainProgress {
        elapsed: Duration,
        remaining: Duration,
        outstanding: usize,
    },
    /// All in-flight work finished inside the drain budget
    DrainCompleted { elapsed: Duration },
    /// Drain budget ran out with work still outstanding
    DrainTimedOut { abandoned: usize, elapsed: Duration },
    /// Result of a single cleanup step
    CleanupStepResult {
        name: String,
        success: bool,
        detail: Option<String>,
        duration: Duration,
    },
    /// The coordinator reached its terminal state
    ShutdownComplete { elapsed: Duration, clean: bool },
    /// Supervisor-side progress while waiting for the worker
    ShutdownProgress {
        elapsed: Duration,
        remaining: Duration,
        outstanding: Option<usize>,
    },
    /// Supervisor escalated to SIGKILL
    ForcedKillTriggered { pid: u32 },
}

impl ShutdownEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ShutdownEvent::ShutdownInitiated { reason, .. } => {
                format!("Shutdown initiated: {}", reason)
            }
            ShutdownEvent::DuplicateSignal { reason } => {
                format!("Duplicate shutdown trigger ignored: {}", reason)
            }
            ShutdownEvent::ReadinessChanged { ready } => {
                format!("Readiness set to {}", if *ready { "ready" } else { "not ready" })
            }
            ShutdownEvent::DrainProgress {
                elapsed,
                remaining,
                outstanding,
            } => format!(
                "Draining: {} outstanding, {:.1}s elapsed, {:.1}s remaining",
                outstanding,
                elapsed.as_secs_f64(),
                remaining.as_secs_f64()
            ),
            ShutdownEvent::DrainCompleted { elapsed } => {
                format!("Drain completed in {:.1}s", elapsed.as_secs_f64())
            }
            ShutdownEvent::DrainTimedOut { abandoned, elapsed } => format!(
                "Drain timed out after {:.1}s, abandoning {} requests",
                elapsed.as_secs_f64(),
                abandoned
            ),
            ShutdownEvent::CleanupStepResult {
                name,
                success,
                detail,
                duration,
            } => format!(
                "Cleanup step '{}' {} in {:.2}s{}",
                name,
                if *success { "succeeded" } else { "failed" },
                duration.as_secs_f64(),
                detail
                    .as_ref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            ),
            ShutdownEvent::ShutdownComplete { elapsed, clean } => format!(
                "Shutdown complete in {:.1}s ({})",
                elapsed.as_secs_f64(),
                if *clean { "clean" } else { "degraded" }
            ),
            ShutdownEvent::ShutdownProgress {
                elapsed,
                remaining,
                outstanding,
            } => format!(
                "Waiting for worker: {:.0}s elapsed, {:.0}s remaining, outstanding {}",
                elapsed.as_secs_f64(),
                remaining.as_secs_f64(),
                outstanding
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            ShutdownEvent::ForcedKillTriggered { pid } => {
                format!("Forced kill sent to process {}", pid)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ShutdownEvent::ShutdownInitiated { .. } => "shutdown_initiated",
            ShutdownEvent::DuplicateSignal { .. } => "duplicate_signal",
            ShutdownEvent::ReadinessChanged { .. } => "readiness_changed",
            ShutdownEvent::DrainProgress { .. } => "drain_progress",
            ShutdownEvent::DrainCompleted { .. } => "drain_completed",
            ShutdownEvent::DrainTimedOut { .. } => "drain_timed_out",
            ShutdownEvent::CleanupStepResult { .. } => "cleanup_step_result",
            ShutdownEvent::ShutdownComplete { .. } => "shutdown_complete",
            ShutdownEvent::ShutdownProgress { .. } => "shutdown_progress",
            ShutdownEvent::ForcedKillTriggered { .. } => "forced_kill_triggered",
        }
    }
}

/// Broadcast bus for shutdown lifecycle events
///
/// Every published event is also logged, so the bus doubles as the structured
/// log stream even when nothing subscribes.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ShutdownEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownEvent> {
        self.sender.subscribe()
    }

    /// Log and publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: ShutdownEvent) -> usize {
        match &event {
            ShutdownEvent::ShutdownInitiated { reason, .. } => {
                info!(event = event.event_type(), reason = %reason, "Shutdown initiated");
            }
            ShutdownEvent::DuplicateSignal { reason } => {
                info!(
                    event = event.event_type(),
                    reason = %reason,
                    "Shutdown already in progress, ignoring trigger"
                );
            }
            ShutdownEvent::ReadinessChanged { ready } => {
                info!(event = event.event_type(), ready, "Readiness changed");
            }
            ShutdownEvent::DrainProgress {
                elapsed,
                remaining,
                outstanding,
            } => {
                info!(
                    event = event.event_type(),
                    elapsed_secs = elapsed.as_secs_f64(),
                    remaining_secs = remaining.as_secs_f64(),
                    outstanding,
                    "Draining in-flight requests"
                );
            }
            ShutdownEvent::DrainCompleted { elapsed } => {
                info!(
                    event = event.event_type(),
                    elapsed_secs = elapsed.as_secs_f64(),
                    "All in-flight requests completed"
                );
            }
            ShutdownEvent::DrainTimedOut { abandoned, elapsed } => {
                warn!(
                    event = event.event_type(),
                    abandoned,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Drain timeout reached, abandoning outstanding requests"
                );
            }
            ShutdownEvent::CleanupStepResult {
                name,
                success,
                detail,
                duration,
            } => {
                if *success {
                    info!(
                        event = event.event_type(),
                        step = %name,
                        duration_ms = duration.as_millis() as u64,
                        "Cleanup step succeeded"
                    );
                } else {
                    error!(
                        event = event.event_type(),
                        step = %name,
                        duration_ms = duration.as_millis() as u64,
                        error = detail.as_deref().unwrap_or("unknown"),
                        "Cleanup step failed"
                    );
                }
            }
            ShutdownEvent::ShutdownComplete { elapsed, clean } => {
                if *clean {
                    info!(
                        event = event.event_type(),
                        elapsed_secs = elapsed.as_secs_f64(),
                        "Graceful shutdown completed"
                    );
                } else {
                    warn!(
                        event = event.event_type(),
                        elapsed_secs = elapsed.as_secs_f64(),
                        "Shutdown completed with errors"
                    );
                }
            }
            ShutdownEvent::ShutdownProgress {
                elapsed,
                remaining,
                outstanding,
            } => {
                info!(
                    event = event.event_type(),
                    elapsed_secs = elapsed.as_secs(),
                    remaining_secs = remaining.as_secs(),
                    outstanding = ?outstanding,
                    "Waiting for worker to exit"
                );
            }
            ShutdownEvent::ForcedKillTriggered { pid } => {
                warn!(event = event.event_type(), pid, "Sending SIGKILL to worker");
            }
        }

        // No subscribers is the normal case outside of tests
        self.sender.send(event).unwrap_or_else(|_| {
            debug!("Shutdown event published without subscribers");
            0
        })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
