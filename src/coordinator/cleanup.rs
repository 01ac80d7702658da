use super::{StepOutcome, StepReport};
use crate::error::{LameduckError, Result};
use crate::events::{EventBus, ShutdownEvent};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A named resource-release action with its own time limit
pub struct CleanupStep {
    name: String,
    timeout: Duration,
    action: CleanupAction,
}

impl CleanupStep {
    pub fn new<F, Fut>(name: impl Into<String>, timeout: Duration, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            timeout,
            action: Box::new(move || action().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the step on its own task so neither a panic nor a hang escapes
    async fn execute(self) -> StepReport {
        let started = Instant::now();
        let action = self.action;
        let mut handle = tokio::spawn(async move { action().await });

        let outcome = match timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => StepOutcome::Succeeded,
            Ok(Ok(Err(e))) => StepOutcome::Failed(format!("{:#}", e)),
            Ok(Err(join_error)) if join_error.is_panic() => {
                StepOutcome::Panicked(panic_message(join_error.into_panic()))
            }
            Ok(Err(join_error)) => StepOutcome::Failed(join_error.to_string()),
            Err(_) => {
                handle.abort();
                StepOutcome::TimedOut(self.timeout)
            }
        };

        StepReport {
            name: self.name,
            outcome,
            duration: started.elapsed(),
        }
    }
}

impl std::fmt::Debug for CleanupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStep")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Ordered cleanup steps sharing one time budget.
///
/// Registration refuses steps whose timeouts would overrun the budget, so a
/// full chain always finishes inside it.
#[derive(Debug)]
pub struct CleanupRegistry {
    steps: Vec<CleanupStep>,
    budget: Duration,
    committed: Duration,
}

impl CleanupRegistry {
    pub fn new(budget: Duration) -> Self {
        Self {
            steps: Vec::new(),
            budget,
            committed: Duration::ZERO,
        }
    }

    pub fn register(&mut self, step: CleanupStep) -> Result<()> {
        let remaining = self.remaining_budget();
        if step.timeout > remaining {
            return Err(LameduckError::CleanupBudget {
                step: step.name,
                requested: step.timeout,
                remaining,
            });
        }

        debug!(
            "Registered cleanup step '{}' (timeout {:?}, position {})",
            step.name,
            step.timeout,
            self.steps.len() + 1
        );
        self.committed += step.timeout;
        self.steps.push(step);
        Ok(())
    }

    pub fn remaining_budget(&self) -> Duration {
        self.budget.saturating_sub(self.committed)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Run every step once, in registration order, regardless of failures
    pub async fn run_chain(self, events: &EventBus) -> Vec<StepReport> {
        let total = self.steps.len();
        let mut reports = Vec::with_capacity(total);

        for (index, step) in self.steps.into_iter().enumerate() {
            info!("Running cleanup step {}/{}: {}", index + 1, total, step.name);
            let report = step.execute().await;

            events.publish(ShutdownEvent::CleanupStepResult {
                name: report.name.clone(),
                success: report.outcome.is_success(),
                detail: report.outcome.detail(),
                duration: report.duration,
            });
            reports.push(report);
        }

        reports
    }
}
