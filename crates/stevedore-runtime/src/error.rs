//! Container runtime error types.

use thiserror::Error;

/// Result type alias for runtime client operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur talking to a host's container engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine answered with a non-2xx status; the body is the detail.
    #[error("container engine returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The engine could not be reached or the call failed in transit.
    #[error("container engine transport error: {0}")]
    Transport(bollard::errors::Error),

    /// The host's external port range is fully occupied.
    #[error("no free port on {host} in {low}-{high}")]
    NoFreePort { host: String, low: u16, high: u16 },
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::Api {
                status: status_code,
                message,
            },
            other => RuntimeError::Transport(other),
        }
    }
}
