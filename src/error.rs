//! Error types for individual user steps and whole-scenario aborts.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Coarse classification of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection refused, reset or timed out.
    Transport,
    /// The service answered, but not with what the step needed.
    Protocol,
    /// The step could not be attempted (missing token, no open connection).
    Precondition,
}

/// Failure of a single user's single lifecycle step.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed frame: {0}")]
    Codec(#[from] sonic_rs::Error),

    #[error("{0}")]
    Precondition(&'static str),
}

impl StepError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StepError::Http(e) if e.is_decode() || e.is_status() => ErrorClass::Protocol,
            StepError::Http(_) => ErrorClass::Transport,
            StepError::WebSocket(tungstenite::Error::Protocol(_))
            | StepError::WebSocket(tungstenite::Error::Http(_)) => ErrorClass::Protocol,
            StepError::WebSocket(_) => ErrorClass::Transport,
            StepError::Status { .. } | StepError::Codec(_) => ErrorClass::Protocol,
            StepError::Precondition(_) => ErrorClass::Precondition,
        }
    }
}

/// Anchor failure that ends a scenario before its dependent phases.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioAbort {
    #[error("scenario needs at least one user")]
    NoUsers,

    #[error("{failed} of {total} users could not log in")]
    LoginFailed { failed: usize, total: usize },

    #[error("room creator {username} could not log in")]
    AnchorLoginFailed { username: String },

    #[error("room creation failed")]
    RoomCreationFailed,
}
