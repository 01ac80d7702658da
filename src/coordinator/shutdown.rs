use super::cleanup::{CleanupRegistry, CleanupStep};
use super::readiness::Readiness;
use super::state::StateCell;
use super::tracker::{ConnectionGuard, ConnectionTracker};
use super::{DrainOutcome, ShutdownReason, ShutdownReport, ShutdownState, StepReport};
use crate::config::ShutdownConfig;
use crate::error::{LameduckError, Result};
use crate::events::{EventBus, ShutdownEvent};
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Stand-in deadline for windows too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct ShutdownRequest {
    at: Instant,
    reason: ShutdownReason,
}

/// In-process shutdown sequencer.
///
/// Construct once at worker startup and share as `Arc<ShutdownCoordinator>`
/// with the request middleware, the health endpoint and the code that
/// registers cleanup steps. [`run`](Self::run) is the background task that
/// owns the state machine.
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    state: StateCell,
    readiness: Readiness,
    tracker: ConnectionTracker,
    cleanup: Mutex<Option<CleanupRegistry>>,
    request: Mutex<Option<ShutdownRequest>>,
    events: EventBus,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self::with_event_bus(config, EventBus::default())
    }

    pub fn with_event_bus(config: ShutdownConfig, events: EventBus) -> Self {
        let cleanup = CleanupRegistry::new(config.cleanup_timeout());
        Self {
            config,
            state: StateCell::new(),
            readiness: Readiness::new(true),
            tracker: ConnectionTracker::new(),
            cleanup: Mutex::new(Some(cleanup)),
            request: Mutex::new(None),
            events,
        }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn state(&self) -> ShutdownState {
        self.state.current()
    }

    /// Every state the coordinator has passed through, in order
    pub fn state_history(&self) -> Vec<ShutdownState> {
        self.state.history()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Resolve once the coordinator is at or past `target`
    pub async fn wait_for_state(&self, target: ShutdownState) {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = receiver.wait_for(|state| *state >= target).await;
    }

    /// True while new work should be routed here
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready() && self.state() == ShutdownState::Running
    }

    /// Register the current request with the drain logic
    pub fn connection_guard(&self) -> ConnectionGuard {
        self.tracker.guard()
    }

    /// Register a cleanup step using the default step timeout
    pub fn register_cleanup<F, Fut>(&self, name: impl Into<String>, action: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_cleanup_with_timeout(name, self.config.step_timeout(), action)
    }

    pub fn register_cleanup_with_timeout<F, Fut>(
        &self,
        name: impl Into<String>,
        timeout: Duration,
        action: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_step(CleanupStep::new(name, timeout, action))
    }

    pub fn register_step(&self, step: CleanupStep) -> Result<()> {
        if self.state() != ShutdownState::Running {
            return Err(LameduckError::invalid_state(format!(
                "cannot register cleanup step '{}' after shutdown has started",
                step.name()
            )));
        }

        let mut cleanup = self.cleanup.lock();
        match cleanup.as_mut() {
            Some(registry) => registry.register(step),
            None => Err(LameduckError::invalid_state(
                "cleanup chain has already run",
            )),
        }
    }

    /// Names of the registered cleanup steps, in execution order
    pub fn cleanup_steps(&self) -> Vec<String> {
        self.cleanup
            .lock()
            .as_ref()
            .map(|registry| registry.names())
            .unwrap_or_default()
    }

    /// The only trigger for RUNNING -> DRAINING.
    ///
    /// Cheap and non-blocking, safe to call from a signal listener. Returns
    /// true for the call that started the shutdown; later calls only log.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        let mut request = self.request.lock();
        if request.is_some() {
            drop(request);
            self.events.publish(ShutdownEvent::DuplicateSignal {
                reason: reason.to_string(),
            });
            return false;
        }

        *request = Some(ShutdownRequest {
            at: Instant::now(),
            reason: reason.clone(),
        });
        self.state
            .advance(ShutdownState::Running, ShutdownState::Draining);
        drop(request);

        self.events.publish(ShutdownEvent::ShutdownInitiated {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.request.lock().is_some()
    }

    fn requested_at(&self) -> Instant {
        self.request
            .lock()
            .as_ref()
            .map(|r| r.at)
            .unwrap_or_else(Instant::now)
    }

    /// Stop intake and wait for in-flight work, bounded by the drain budget.
    ///
    /// Moves DRAINING -> CLEANING_UP when the tracker is empty or the drain
    /// deadline (measured from the shutdown request) passes.
    pub async fn enter_draining(&self) -> Result<DrainOutcome> {
        if self.state() != ShutdownState::Draining {
            return Err(LameduckError::invalid_state(format!(
                "drain requires state DRAINING, found {}",
                self.state()
            )));
        }

        if self.readiness.set_ready(false) {
            self.events
                .publish(ShutdownEvent::ReadinessChanged { ready: false });
        }

        let outcome = if self.config.wait_for_connections {
            self.drain().await
        } else {
            info!(
                outstanding = self.tracker.outstanding(),
                "Not waiting for active connections"
            );
            DrainOutcome::Skipped
        };

        if !self
            .state
            .advance(ShutdownState::Draining, ShutdownState::CleaningUp)
        {
            return Err(LameduckError::invalid_state(
                "drain finished but state was advanced by someone else",
            ));
        }

        Ok(outcome)
    }

    async fn drain(&self) -> DrainOutcome {
        let requested_at = self.requested_at();
        let drain_timeout = self.config.drain_timeout();
        let deadline = requested_at
            .checked_add(drain_timeout)
            .unwrap_or_else(|| requested_at + FAR_FUTURE);

        let mut poll = interval(self.config.drain_poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let progress_every = self.config.progress_interval();
        let mut progress = interval_at(Instant::now() + progress_every, progress_every);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline_sleep = sleep_until(deadline);
        tokio::pin!(deadline_sleep);

        info!(
            outstanding = self.tracker.outstanding(),
            drain_timeout_secs = drain_timeout.as_secs(),
            "Draining in-flight requests"
        );

        loop {
            if self.tracker.is_idle() {
                let elapsed = requested_at.elapsed();
                self.events
                    .publish(ShutdownEvent::DrainCompleted { elapsed });
                return DrainOutcome::Drained { elapsed };
            }

            tokio::select! {
                _ = &mut deadline_sleep => {
                    let abandoned = self.tracker.outstanding();
                    if abandoned == 0 {
                        let elapsed = requested_at.elapsed();
                        self.events.publish(ShutdownEvent::DrainCompleted { elapsed });
                        return DrainOutcome::Drained { elapsed };
                    }
                    let elapsed = requested_at.elapsed();
                    if let Some(age) = self.tracker.oldest_age() {
                        warn!(oldest_request_secs = age.as_secs_f64(), "Oldest abandoned request");
                    }
                    self.events.publish(ShutdownEvent::DrainTimedOut { abandoned, elapsed });
                    return DrainOutcome::TimedOut { abandoned, elapsed };
                }
                _ = progress.tick() => {
                    let elapsed = requested_at.elapsed();
                    if let Some(age) = self.tracker.oldest_age() {
                        info!(oldest_request_secs = age.as_secs_f64(), "Oldest in-flight request");
                    }
                    self.events.publish(ShutdownEvent::DrainProgress {
                        elapsed,
                        remaining: drain_timeout.saturating_sub(elapsed),
                        outstanding: self.tracker.outstanding(),
                    });
                }
                _ = poll.tick() => {}
            }
        }
    }

    /// Run every registered cleanup step in order, then move to TERMINATED.
    ///
    /// Consumes the registry, so the chain can run at most once.
    pub async fn run_cleanup_chain(&self) -> Result<Vec<StepReport>> {
        if self.state() != ShutdownState::CleaningUp {
            return Err(LameduckError::invalid_state(format!(
                "cleanup requires state CLEANING_UP, found {}",
                self.state()
            )));
        }

        let registry = self
            .cleanup
            .lock()
            .take()
            .ok_or_else(|| LameduckError::invalid_state("cleanup chain has already run"))?;

        info!(steps = registry.len(), "Running cleanup chain");
        let reports = registry.run_chain(&self.events).await;

        self.state
            .advance(ShutdownState::CleaningUp, ShutdownState::Terminated);
        Ok(reports)
    }

    /// Background task owning the shutdown sequence.
    ///
    /// Waits for [`request_shutdown`](Self::request_shutdown), then drains,
    /// runs the cleanup chain and returns once TERMINATED is reached.
    pub async fn run(&self) -> Result<ShutdownReport> {
        self.wait_for_state(ShutdownState::Draining).await;

        let drain = self.enter_draining().await?;
        let steps = self.run_cleanup_chain().await?;

        let (reason, elapsed) = {
            let request = self.request.lock();
            match request.as_ref() {
                Some(r) => (r.reason.clone(), r.at.elapsed()),
                None => (
                    ShutdownReason::Requested("unknown".to_string()),
                    Duration::ZERO,
                ),
            }
        };

        let report = ShutdownReport {
            reason,
            drain,
            steps,
            elapsed,
        };

        self.events.publish(ShutdownEvent::ShutdownComplete {
            elapsed: report.elapsed,
            clean: report.is_clean(),
        });

        Ok(report)
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("ready", &self.readiness.is_ready())
            .field("tracker", &self.tracker)
            .finish()
    }
}
