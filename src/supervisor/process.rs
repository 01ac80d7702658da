use super::TermSignal;
use crate::error::{LameduckError, Result};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Exited(Option<ExitStatus>),
}

/// Supervisor-owned handle to the worker process
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    command: String,
    liveness: Liveness,
}

impl ProcessHandle {
    /// Launch `command[0]` with the remaining elements as arguments
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| LameduckError::system("no worker command given"))?;
        let rendered = command.join(" ");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| LameduckError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let pid = child
            .id()
            .ok_or_else(|| LameduckError::system("worker exited before its pid was read"))?;

        info!(pid, command = %rendered, "Worker started");

        Ok(Self {
            child,
            pid,
            command: rendered,
            liveness: Liveness::Alive,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    /// Non-blocking liveness check; reaps the child if it has exited
    pub fn try_exit(&mut self) -> Option<Option<ExitStatus>> {
        if let Liveness::Exited(status) = self.liveness {
            return Some(status);
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.mark_exited(Some(status));
                Some(Some(status))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(pid = self.pid, "Failed to poll worker status: {}", e);
                None
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Wait until the child exits. Cancel safe.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        if let Liveness::Exited(status) = self.liveness {
            return status;
        }

        match self.child.wait().await {
            Ok(status) => {
                self.mark_exited(Some(status));
                Some(status)
            }
            Err(e) => {
                warn!(pid = self.pid, "Failed to wait for worker: {}", e);
                self.mark_exited(None);
                None
            }
        }
    }

    fn mark_exited(&mut self, status: Option<ExitStatus>) {
        debug!(pid = self.pid, ?status, "Worker exited");
        self.liveness = Liveness::Exited(status);
    }

    /// Relay a termination signal.
    ///
    /// Returns `Ok(false)` when the worker is already gone.
    pub fn relay(&mut self, sig: TermSignal) -> Result<bool> {
        #[cfg(unix)]
        {
            self.send(sig.to_nix())
        }

        #[cfg(not(unix))]
        {
            let _ = sig;
            self.force_kill()
        }
    }

    /// Send SIGKILL. Returns `Ok(false)` when the worker is already gone.
    pub fn force_kill(&mut self) -> Result<bool> {
        #[cfg(unix)]
        {
            self.send(Signal::SIGKILL)
        }

        #[cfg(not(unix))]
        {
            if self.try_exit().is_some() {
                return Ok(false);
            }
            self.child
                .start_kill()
                .map(|()| true)
                .map_err(|e| LameduckError::signal(self.pid, e.to_string()))
        }
    }

    #[cfg(unix)]
    fn send(&mut self, sig: Signal) -> Result<bool> {
        // Never signal a reaped pid, it may already belong to another process
        if self.try_exit().is_some() {
            debug!(pid = self.pid, "Worker already exited, not sending {}", sig);
            return Ok(false);
        }

        match signal::kill(Pid::from_raw(self.pid as i32), sig) {
            Ok(()) => {
                debug!(pid = self.pid, "Sent {} to worker", sig);
                Ok(true)
            }
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(LameduckError::signal(self.pid, e.to_string())),
        }
    }
}
