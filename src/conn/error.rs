//! Connection-level errors.
//!
//! Every failure carries the [`Op`] it happened in and a [`Cause`]. The engine
//! relies on both: only a reservation that timed out or hit a deadline counts
//! as "nothing ready"; everything else is fatal for the connection.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Protocol operation a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Reserve,
    Delete,
    Release,
    Bury,
    Watch,
    Ignore,
    Use,
    Put,
    Quit,
}

impl Op {
    /// The protocol command name.
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Reserve => "reserve-with-timeout",
            Op::Delete => "delete",
            Op::Release => "release",
            Op::Bury => "bury",
            Op::Watch => "watch",
            Op::Ignore => "ignore",
            Op::Use => "use",
            Op::Put => "put",
            Op::Quit => "quit",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a connection failure.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum Cause {
    /// No job became ready within the reservation timeout.
    #[error("timeout")]
    TimedOut,

    /// A job reserved by this connection is about to exceed its TTR.
    #[error("deadline soon")]
    DeadlineSoon,

    #[error("not found")]
    NotFound,

    #[error("buried")]
    Buried,

    #[error("not ignored")]
    NotIgnored,

    #[error("expected CRLF")]
    ExpectedCrlf,

    #[error("job too big")]
    JobTooBig,

    #[error("draining")]
    Draining,

    #[error("out of memory")]
    OutOfMemory,

    #[error("internal error")]
    InternalError,

    #[error("bad format")]
    BadFormat,

    #[error("unknown command")]
    UnknownCommand,

    /// The server replied with something the client does not understand.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The connection was closed by this client.
    #[error("connection closed")]
    Closed,

    /// Transport failure (EOF, reset, ...).
    #[error("{0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Cause {
    fn from(err: std::io::Error) -> Self {
        Cause::Io(Arc::new(err))
    }
}

/// A failed protocol operation.
#[derive(Error, Debug, Clone)]
#[error("{op}: {cause}")]
pub struct ConnError {
    pub op: Op,
    #[source]
    pub cause: Cause,
}

impl ConnError {
    pub fn new(op: Op, cause: impl Into<Cause>) -> Self {
        Self {
            op,
            cause: cause.into(),
        }
    }

    /// True when a reservation found nothing ready. Any other failure,
    /// including these causes on a different operation, is fatal.
    pub fn is_timeout_or_deadline(&self) -> bool {
        self.op == Op::Reserve && matches!(self.cause, Cause::TimedOut | Cause::DeadlineSoon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_timeout_and_deadline_are_transient() {
        assert!(ConnError::new(Op::Reserve, Cause::TimedOut).is_timeout_or_deadline());
        assert!(ConnError::new(Op::Reserve, Cause::DeadlineSoon).is_timeout_or_deadline());
    }

    #[test]
    fn test_other_reserve_causes_are_fatal() {
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(!ConnError::new(Op::Reserve, eof).is_timeout_or_deadline());
        assert!(!ConnError::new(Op::Reserve, Cause::Closed).is_timeout_or_deadline());
        assert!(!ConnError::new(Op::Reserve, Cause::InternalError).is_timeout_or_deadline());
    }

    #[test]
    fn test_timeout_on_other_operation_is_fatal() {
        assert!(!ConnError::new(Op::Watch, Cause::TimedOut).is_timeout_or_deadline());
        assert!(!ConnError::new(Op::Delete, Cause::DeadlineSoon).is_timeout_or_deadline());
    }

    #[test]
    fn test_display_names_operation() {
        let err = ConnError::new(Op::Release, Cause::NotFound);
        assert_eq!(err.to_string(), "release: not found");
    }
}
