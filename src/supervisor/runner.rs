use super::process::ProcessHandle;
use super::probe::OutstandingProbe;
use super::signals::forward_os_signals;
use super::{ExitOutcome, SupervisorState, TermSignal, WaitOutcome};
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::events::{EventBus, ShutdownEvent};
use chrono::Utc;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stand-in deadline for windows too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

const SIGNAL_CHANNEL_CAPACITY: usize = 16;
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs a worker as a child process and enforces an upper bound on how long
/// it may take to exit once a termination signal arrives.
pub struct Supervisor {
    config: SupervisorConfig,
    child: ProcessHandle,
    signals: mpsc::Receiver<TermSignal>,
    signals_open: bool,
    forwarder: Option<(CancellationToken, JoinHandle<()>)>,
    probe: Option<Box<dyn OutstandingProbe>>,
    events: EventBus,
    state: SupervisorState,
    history: Vec<SupervisorState>,
    shutdown_started: Option<Instant>,
    signals_received: usize,
}

impl Supervisor {
    /// Register OS signal handlers, then launch the worker.
    pub fn start(command: &[String], config: SupervisorConfig) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let handle = forward_os_signals(sender, cancel.clone())?;

        match Self::start_with_signals(command, config, receiver) {
            Ok(mut supervisor) => {
                supervisor.forwarder = Some((cancel, handle));
                Ok(supervisor)
            }
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    }

    /// Launch the worker with signals delivered through `signals` instead of
    /// the OS handlers.
    pub fn start_with_signals(
        command: &[String],
        config: SupervisorConfig,
        signals: mpsc::Receiver<TermSignal>,
    ) -> Result<Self> {
        let child = ProcessHandle::spawn(command)?;

        Ok(Self {
            config,
            child,
            signals,
            signals_open: true,
            forwarder: None,
            probe: None,
            events: EventBus::default(),
            state: SupervisorState::Active,
            history: vec![SupervisorState::Active],
            shutdown_started: None,
            signals_received: 0,
        })
    }

    pub fn with_probe(mut self, probe: impl OutstandingProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn state_history(&self) -> &[SupervisorState] {
        &self.history
    }

    pub fn signals_received(&self) -> usize {
        self.signals_received
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!(from = ?self.state, to = ?next, "Supervisor state change");
        self.state = next;
        self.history.push(next);
    }

    /// Handle a termination signal.
    ///
    /// The first signal starts the shutdown window. Every signal, including
    /// repeats, is relayed to the worker; repeats never move the deadline.
    pub fn on_signal(&mut self, sig: TermSignal) {
        self.signals_received += 1;
        let first = self.shutdown_started.is_none();

        if first {
            self.shutdown_started = Some(Instant::now());
            self.transition(SupervisorState::SignalReceived);
            self.events.publish(ShutdownEvent::ShutdownInitiated {
                reason: sig.name().to_string(),
                timestamp: Utc::now(),
            });
        } else {
            self.events.publish(ShutdownEvent::DuplicateSignal {
                reason: sig.name().to_string(),
            });
        }

        let pid = self.child.pid();
        match self.child.relay(sig) {
            Ok(true) => info!(pid, "Relayed {} to worker", sig),
            Ok(false) => debug!(pid, "Worker already exited, {} not relayed", sig),
            Err(e) => warn!(pid, "Failed to relay {} to worker: {}", sig, e),
        }

        if first {
            self.transition(SupervisorState::Waiting);
        }
    }

    /// Poll for worker exit until `window` has passed since the first signal.
    pub async fn wait_for_exit(&mut self, window: Duration) -> WaitOutcome {
        let started = *self.shutdown_started.get_or_insert_with(Instant::now);
        let deadline = started
            .checked_add(window)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let progress_every = self.config.progress_interval();
        let mut next_progress = started + progress_every;

        let mut poll = interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(status) = self.child.try_exit() {
                return WaitOutcome::Exited(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }

            if now >= next_progress {
                self.report_progress(now - started, deadline).await;
                while next_progress <= now {
                    next_progress += progress_every;
                }
            }

            tokio::select! {
                _ = poll.tick() => {}
                _ = sleep_until(deadline) => {}
                received = self.signals.recv(), if self.signals_open => {
                    self.handle_received(received);
                }
            }
        }
    }

    /// Publish a progress event. A slow status lookup is abandoned at
    /// `deadline` so it can never hold back escalation.
    async fn report_progress(&self, elapsed: Duration, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let outstanding = match &self.probe {
            Some(probe) => tokio::select! {
                counted = timeout(PROBE_TIMEOUT, probe.outstanding()) => counted.ok().flatten(),
                _ = sleep_until(deadline) => None,
            },
            None => None,
        };

        self.events.publish(ShutdownEvent::ShutdownProgress {
            elapsed,
            remaining,
            outstanding,
        });
    }

    fn handle_received(&mut self, received: Option<TermSignal>) {
        match received {
            Some(sig) => self.on_signal(sig),
            None => {
                debug!("Signal source closed");
                self.signals_open = false;
            }
        }
    }

    /// Send SIGKILL and give the kernel a short grace period to reap the worker.
    pub async fn escalate(&mut self) -> ExitOutcome {
        let started = self.shutdown_started.unwrap_or_else(Instant::now);
        let pid = self.child.pid();

        self.events
            .publish(ShutdownEvent::ForcedKillTriggered { pid });

        match self.child.force_kill() {
            Ok(true) => {}
            Ok(false) => debug!(pid, "Worker exited before SIGKILL was sent"),
            Err(e) => error!(pid, "Failed to send SIGKILL: {}", e),
        }

        let terminated = match timeout(self.config.kill_grace(), self.child.wait()).await {
            Ok(_) => true,
            Err(_) => {
                error!(
                    pid,
                    grace_secs = self.config.kill_grace_seconds,
                    "Worker still alive after SIGKILL, exiting anyway"
                );
                false
            }
        };

        let elapsed = started.elapsed();
        self.transition(SupervisorState::ForcedExit);
        self.events.publish(ShutdownEvent::ShutdownComplete {
            elapsed,
            clean: false,
        });

        ExitOutcome::Forced {
            terminated,
            elapsed,
        }
    }

    fn finish_graceful(&mut self, status: Option<ExitStatus>) -> ExitOutcome {
        let elapsed = self
            .shutdown_started
            .map(|started| started.elapsed())
            .unwrap_or_default();

        info!(
            pid = self.child.pid(),
            ?status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Worker exited gracefully"
        );

        self.transition(SupervisorState::GracefulExit);
        self.events.publish(ShutdownEvent::ShutdownComplete {
            elapsed,
            clean: true,
        });

        ExitOutcome::Graceful { status, elapsed }
    }

    /// Wait with no deadline, still relaying repeated signals
    async fn wait_unbounded(&mut self) -> Option<ExitStatus> {
        loop {
            tokio::select! {
                status = self.child.wait() => return status,
                received = self.signals.recv(), if self.signals_open => {
                    self.handle_received(received);
                }
            }
        }
    }

    /// Supervise the worker until it exits.
    pub async fn run(mut self) -> ExitOutcome {
        info!(
            pid = self.child.pid(),
            command = self.child.command(),
            timeout_secs = self.config.timeout_seconds,
            "Supervising worker"
        );

        while self.shutdown_started.is_none() {
            tokio::select! {
                received = self.signals.recv(), if self.signals_open => {
                    self.handle_received(received);
                }
                status = self.child.wait() => {
                    warn!(pid = self.child.pid(), ?status, "Worker exited without a shutdown signal");
                    return ExitOutcome::WorkerExited { status };
                }
            }
        }

        let window = self.config.timeout();
        info!(
            pid = self.child.pid(),
            timeout_secs = window.as_secs(),
            "Waiting for worker to shut down"
        );

        match self.wait_for_exit(window).await {
            WaitOutcome::Exited(status) => self.finish_graceful(status),
            WaitOutcome::TimedOut if self.config.force_kill => {
                warn!(
                    pid = self.child.pid(),
                    timeout_secs = window.as_secs(),
                    "Shutdown window elapsed, force killing worker"
                );
                self.escalate().await
            }
            WaitOutcome::TimedOut => {
                warn!(
                    pid = self.child.pid(),
                    timeout_secs = window.as_secs(),
                    "Shutdown window elapsed and force kill is disabled, waiting for worker"
                );
                let status = self.wait_unbounded().await;
                self.finish_graceful(status)
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.forwarder.take() {
            cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("pid", &self.child.pid())
            .field("state", &self.state)
            .field("signals_received", &self.signals_received)
            .finish()
    }
}
