use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LameduckError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch worker '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error(
        "Cleanup step '{step}' needs {requested:?} but only {remaining:?} of the cleanup budget is left"
    )]
    CleanupBudget {
        step: String,
        requested: Duration,
        remaining: Duration,
    },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl LameduckError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn signal<S: Into<String>>(pid: u32, message: S) -> Self {
        Self::Signal {
            pid,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LameduckError>;
