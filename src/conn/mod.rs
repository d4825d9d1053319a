//! Broker connection boundary.
//!
//! The engine only needs four operations from a broker: reserve a job from
//! one tube without waiting, delete it, release it, and close the
//! connection. [`Connection`] captures that boundary; [`BeanstalkConn`]
//! speaks the beanstalkd text protocol and [`MemoryBroker`] keeps jobs in
//! process.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::types::JobId;

pub mod beanstalk;
pub mod codec;
mod error;
pub mod memory;

pub use beanstalk::BeanstalkConn;
pub use error::{Cause, ConnError, Op};
pub use memory::MemoryBroker;

/// Priority used when a job is released without a caller-chosen priority.
/// Lower values are more urgent.
pub const DEFAULT_PRIORITY: u32 = 1024;

/// Time-to-run used by `put` when the caller does not choose one.
pub const DEFAULT_TTR: Duration = Duration::from_secs(60);

/// A job claimed by a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserved {
    pub id: JobId,
    pub body: Bytes,
}

/// One broker connection, shared by the scan loop and every worker task.
///
/// Implementations must be safe to call from several tasks at once; each
/// call is one request/response round trip.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    /// Reserve a job from `tube` only, waiting at most `timeout`.
    async fn reserve(&self, tube: &str, timeout: Duration) -> Result<Reserved, ConnError>;

    /// Remove a job permanently.
    async fn delete(&self, id: JobId) -> Result<(), ConnError>;

    /// Put a reserved job back into its tube, ready again after `delay`.
    async fn release(&self, id: JobId, priority: u32, delay: Duration) -> Result<(), ConnError>;

    /// Close the connection. Later calls fail with [`Cause::Closed`].
    async fn close(&self) -> Result<(), ConnError>;
}
