//! Relay error types

use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Monitor already started")]
    AlreadyStarted,

    #[error("Monitor not started")]
    NotStarted,

    #[error("Stop called from a worker thread")]
    StopFromWorker,

    #[error("Stop called from inside an async runtime")]
    StopInAsyncContext,

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

/// Failure raised by a host callback, caught at the host boundary
#[derive(Error, Debug)]
pub enum HostCallbackError {
    #[error("{callback} failed: {error:#}")]
    Failed {
        callback: &'static str,
        error: anyhow::Error,
    },

    #[error("{callback} panicked: {message}")]
    Panicked {
        callback: &'static str,
        message: String,
    },
}

impl HostCallbackError {
    pub fn callback(&self) -> &'static str {
        match self {
            HostCallbackError::Failed { callback, .. } => callback,
            HostCallbackError::Panicked { callback, .. } => callback,
        }
    }
}
