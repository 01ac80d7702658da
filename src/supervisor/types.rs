use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Active,
    SignalReceived,
    Waiting,
    GracefulExit,
    ForcedExit,
}

/// Termination signals the supervisor accepts and relays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermSignal {
    Term,
    Int,
    Quit,
    Hup,
}

impl TermSignal {
    pub fn name(&self) -> &'static str {
        match self {
            TermSignal::Term => "SIGTERM",
            TermSignal::Int => "SIGINT",
            TermSignal::Quit => "SIGQUIT",
            TermSignal::Hup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    pub fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            TermSignal::Term => Signal::SIGTERM,
            TermSignal::Int => Signal::SIGINT,
            TermSignal::Quit => Signal::SIGQUIT,
            TermSignal::Hup => Signal::SIGHUP,
        }
    }
}

impl fmt::Display for TermSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of waiting for the worker inside the shutdown window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Worker exited; status is unknown if reaping failed
    Exited(Option<ExitStatus>),
    TimedOut,
}

/// How the supervised run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Worker exited inside the shutdown window
    Graceful {
        status: Option<ExitStatus>,
        elapsed: Duration,
    },
    /// Window elapsed and the worker was sent SIGKILL
    Forced { terminated: bool, elapsed: Duration },
    /// Worker exited before any shutdown signal arrived
    WorkerExited { status: Option<ExitStatus> },
}

impl ExitOutcome {
    /// Exit code for the supervisor process.
    ///
    /// Any completed shutdown is 0. A worker that exited on its own has its
    /// code passed through.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Graceful { .. } | ExitOutcome::Forced { .. } => 0,
            ExitOutcome::WorkerExited { status } => status.map(status_code).unwrap_or(1),
        }
    }
}

/// Shell-style exit code, 128 + signal number for signal deaths
pub fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
