use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Coordinator lifecycle. Variants are ordered; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShutdownState {
    Running,
    Draining,
    CleaningUp,
    Terminated,
}

impl ShutdownState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownState::Running => "RUNNING",
            ShutdownState::Draining => "DRAINING",
            ShutdownState::CleaningUp => "CLEANING_UP",
            ShutdownState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered the shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Requested(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal {}", name),
            ShutdownReason::Requested(reason) => write!(f, "requested: {}", reason),
        }
    }
}

/// How the drain phase ended
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Outstanding work reached zero
    Drained { elapsed: Duration },
    /// Budget ran out; remaining requests are left to the transport layer
    TimedOut { abandoned: usize, elapsed: Duration },
    /// `wait_for_connections` is off
    Skipped,
}

impl DrainOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, DrainOutcome::TimedOut { .. })
    }
}

/// Result of one cleanup step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    TimedOut(Duration),
    Panicked(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            StepOutcome::Succeeded => None,
            StepOutcome::Failed(message) => Some(message.clone()),
            StepOutcome::TimedOut(limit) => Some(format!("timed out after {:?}", limit)),
            StepOutcome::Panicked(message) => Some(format!("panicked: {}", message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
    pub duration: Duration,
}

/// Summary returned once the coordinator reaches `Terminated`
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub drain: DrainOutcome,
    pub steps: Vec<StepReport>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// No abandoned requests and every cleanup step succeeded
    pub fn is_clean(&self) -> bool {
        !self.drain.is_timed_out() && self.steps.iter().all(|s| s.outcome.is_success())
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| !s.outcome.is_success())
    }
}
