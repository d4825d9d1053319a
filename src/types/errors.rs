//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Protocol
//! failures keep their own [`ConnError`] so the engine can classify them by
//! operation and cause.

use std::time::Duration;
use thiserror::Error;

use crate::conn::ConnError;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the worker client.
#[derive(Error, Debug)]
pub enum Error {
    /// The client stopped on request (caller `stop()` or external signal).
    #[error("client has quit")]
    Quit,

    /// `stop()` was called after the stop signal already fired.
    #[error("stop already requested")]
    AlreadyStopped,

    /// Protocol or connection failure reported by the broker connection.
    #[error(transparent)]
    Conn(#[from] ConnError),

    /// Validation errors (bad configuration, duplicate registrations).
    #[error("validation error: {0}")]
    Validation(String),

    /// In-flight workers did not finish within the configured drain timeout.
    #[error("drain timed out after {timeout:?} with {stuck} workers still running")]
    DrainTimeout {
        /// The configured drain timeout.
        timeout: Duration,
        /// Workers still running when the timeout fired.
        stuck: usize,
    },

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors (dialing, reading config files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the graceful-shutdown result of a run.
    pub fn is_quit(&self) -> bool {
        matches!(self, Error::Quit)
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Quit => "quit",
            Error::AlreadyStopped => "already_stopped",
            Error::Conn(_) => "connection",
            Error::Validation(_) => "validation",
            Error::DrainTimeout { .. } => "drain_timeout",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
