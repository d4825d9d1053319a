//! Reserved jobs and their completion actions.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::conn::{ConnError, Connection};
use crate::types::JobId;

/// One reserved unit of work.
///
/// A job belongs to the connection that reserved it and the tube it came
/// from. Exactly one of [`Job::delete`] or [`Job::release`] should be called;
/// a second completion is passed to the broker, which reports the job as not
/// found.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    body: Bytes,
    tube: Arc<str>,
    conn: Arc<dyn Connection>,
}

impl Job {
    pub fn new(conn: Arc<dyn Connection>, tube: impl Into<Arc<str>>, id: JobId, body: Bytes) -> Self {
        Self {
            id,
            body,
            tube: tube.into(),
            conn,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Tube the job was reserved from.
    pub fn tube(&self) -> &str {
        &self.tube
    }

    /// Remove the job from the broker; processing succeeded.
    pub async fn delete(&self) -> Result<(), ConnError> {
        self.conn.delete(self.id).await
    }

    /// Return the job to its tube, reservable again after `delay`.
    pub async fn release(&self, priority: u32, delay: Duration) -> Result<(), ConnError> {
        self.conn.release(self.id, priority, delay).await
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("tube", &self.tube)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{Cause, MemoryBroker, MockConnection, Op};
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_delete_and_release_target_own_id() {
        let mut conn = MockConnection::new();
        conn.expect_delete()
            .with(eq(JobId::new(11)))
            .times(1)
            .returning(|_| Ok(()));
        conn.expect_release()
            .with(eq(JobId::new(11)), eq(7), eq(Duration::from_secs(3)))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let job = Job::new(Arc::new(conn), "emails", JobId::new(11), Bytes::from_static(b"hi"));
        job.delete().await.unwrap();
        job.release(7, Duration::from_secs(3)).await.unwrap();
        assert_eq!(job.tube(), "emails");
        assert_eq!(&job.body()[..], b"hi");
    }

    #[tokio::test]
    async fn test_second_completion_propagates_protocol_error() {
        let broker = MemoryBroker::new();
        broker.put("t", "x", 0, Duration::ZERO).await;
        let conn: Arc<dyn Connection> = Arc::new(broker.connect());
        let reserved = conn.reserve("t", Duration::ZERO).await.unwrap();
        let job = Job::new(conn, "t", reserved.id, reserved.body);

        job.delete().await.unwrap();
        let err = job.delete().await.unwrap_err();
        assert_eq!(err.op, Op::Delete);
        assert!(matches!(err.cause, Cause::NotFound));
        let err = job.release(0, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err.cause, Cause::NotFound));
    }

    #[test]
    fn test_debug_omits_body() {
        let job = Job::new(
            Arc::new(MockConnection::new()),
            "t",
            JobId::new(1),
            Bytes::from_static(b"secret"),
        );
        let rendered = format!("{:?}", job);
        assert!(rendered.contains("body_len: 6"));
        assert!(!rendered.contains("secret"));
    }
}
