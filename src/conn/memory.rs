//! In-process broker.
//!
//! [`MemoryBroker`] keeps tubes of jobs in memory with beanstalk semantics
//! for the operations the engine uses: priority ordering, delayed release,
//! `NOT_FOUND` for finished jobs, and reserved jobs returning to ready when
//! the reserving connection closes. Each [`MemoryConn`] is one client
//! connection to the shared broker state.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::conn::{Cause, ConnError, Connection, Op, Reserved};
use crate::types::JobId;

/// Interval between readiness checks while a reservation waits.
const RESERVE_POLL: Duration = Duration::from_millis(5);

/// Reservation attempts kept in the log; older entries are dropped.
pub const RESERVATION_LOG_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Ready,
    Reserved { by: u64 },
}

#[derive(Debug)]
struct StoredJob {
    tube: String,
    body: Bytes,
    priority: u32,
    ready_at: Instant,
    state: JobState,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    jobs: BTreeMap<JobId, StoredJob>,
    reserve_fault: Option<Cause>,
    reservations: VecDeque<(String, Option<JobId>)>,
}

impl State {
    fn record_reservation(&mut self, tube: &str, claimed: Option<JobId>) {
        if self.reservations.len() == RESERVATION_LOG_LEN {
            self.reservations.pop_front();
        }
        self.reservations.push_back((tube.to_string(), claimed));
    }

    fn next_ready(&self, tube: &str, now: Instant) -> Option<JobId> {
        self.jobs
            .iter()
            .filter(|(_, job)| {
                job.tube == tube && job.state == JobState::Ready && job.ready_at <= now
            })
            .min_by_key(|(id, job)| (job.priority, **id))
            .map(|(id, _)| *id)
    }
}

/// Shared in-memory broker state. Cloning yields another handle to the same
/// broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    next_conn: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection.
    pub fn connect(&self) -> MemoryConn {
        MemoryConn {
            id: self.next_conn.fetch_add(1, Ordering::Relaxed),
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert a job into `tube`, ready after `delay`.
    pub async fn put(&self, tube: &str, body: impl Into<Bytes>, priority: u32, delay: Duration) -> JobId {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = JobId::new(state.next_id);
        state.jobs.insert(
            id,
            StoredJob {
                tube: tube.to_string(),
                body: body.into(),
                priority,
                ready_at: Instant::now() + delay,
                state: JobState::Ready,
            },
        );
        id
    }

    /// Make every following reservation fail with `cause` until cleared.
    pub async fn fail_reserves_with(&self, cause: Option<Cause>) {
        self.state.lock().await.reserve_fault = cause;
    }

    /// Total jobs held by the broker, in any state.
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: JobId) -> bool {
        self.state.lock().await.jobs.contains_key(&id)
    }

    /// Jobs in `tube` that are ready now or after a delay.
    pub async fn ready_count(&self, tube: &str) -> usize {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .filter(|job| job.tube == tube && job.state == JobState::Ready)
            .count()
    }

    /// Jobs currently reserved by any connection.
    pub async fn reserved_count(&self) -> usize {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .filter(|job| matches!(job.state, JobState::Reserved { .. }))
            .count()
    }

    /// Recent reservation attempts in order (at most [`RESERVATION_LOG_LEN`]):
    /// the tube and the job it claimed.
    pub async fn reservations(&self) -> Vec<(String, Option<JobId>)> {
        self.state.lock().await.reservations.iter().cloned().collect()
    }
}

/// One client connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConn {
    id: u64,
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemoryConn {
    fn check_open(&self, op: Op) -> Result<(), ConnError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnError::new(op, Cause::Closed));
        }
        Ok(())
    }

    async fn try_reserve(&self, tube: &str) -> Result<Option<Reserved>, ConnError> {
        let mut state = self.broker.state.lock().await;
        if let Some(cause) = state.reserve_fault.clone() {
            return Err(ConnError::new(Op::Reserve, cause));
        }

        let claimed = state.next_ready(tube, Instant::now());
        state.record_reservation(tube, claimed);
        let Some(id) = claimed else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.state = JobState::Reserved { by: self.id };
        Ok(Some(Reserved {
            id,
            body: job.body.clone(),
        }))
    }
}

#[async_trait]
impl Connection for MemoryConn {
    async fn reserve(&self, tube: &str, timeout: Duration) -> Result<Reserved, ConnError> {
        self.check_open(Op::Reserve)?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_reserve(tube).await? {
                return Ok(job);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ConnError::new(Op::Reserve, Cause::TimedOut));
            }
            tokio::time::sleep(RESERVE_POLL.min(deadline - now)).await;
            self.check_open(Op::Reserve)?;
        }
    }

    async fn delete(&self, id: JobId) -> Result<(), ConnError> {
        self.check_open(Op::Delete)?;
        let mut state = self.broker.state.lock().await;
        let deletable = match state.jobs.get(&id) {
            Some(job) => match job.state {
                JobState::Ready => true,
                JobState::Reserved { by } => by == self.id,
            },
            None => false,
        };
        if !deletable {
            return Err(ConnError::new(Op::Delete, Cause::NotFound));
        }
        state.jobs.remove(&id);
        Ok(())
    }

    async fn release(&self, id: JobId, priority: u32, delay: Duration) -> Result<(), ConnError> {
        self.check_open(Op::Release)?;
        let mut state = self.broker.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.state == (JobState::Reserved { by: self.id }) => {
                job.state = JobState::Ready;
                job.priority = priority;
                job.ready_at = Instant::now() + delay;
                Ok(())
            }
            _ => Err(ConnError::new(Op::Release, Cause::NotFound)),
        }
    }

    async fn close(&self) -> Result<(), ConnError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.broker.state.lock().await;
        let now = Instant::now();
        for job in state.jobs.values_mut() {
            if job.state == (JobState::Reserved { by: self.id }) {
                job.state = JobState::Ready;
                job.ready_at = now;
            }
        }
        Ok(())
    }
}
