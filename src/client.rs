//! Reservation-and-dispatch engine.
//!
//! The engine alternates two phases until it stops:
//! ```text
//!   ┌──────────── scan ─────────────┐      ┌──── idle ────┐
//!   │ for tube in tubes (in order): │      │ sleep(poll)  │
//!   │   stop fired?  → quit         │ ───► │   or stop    │ ──┐
//!   │   no permit?   → next tube    │      │   → quit     │   │
//!   │   reserve(tube, 0)            │      └──────────────┘   │
//!   │     job   → spawn worker      │ ◄───────────────────────┘
//!   │     empty → drop permit       │
//!   │     other → fatal             │
//!   └───────────────────────────────┘
//! ```
//! Admission is a semaphore of `max_concurrency` permits. A permit is taken
//! without waiting before each reservation, so a saturated pool skips tubes
//! instead of blocking the scan, and it travels with the job into the worker
//! task where it is released when the handler returns or panics.
//!
//! On every exit path the stop signal is fired, all workers (and the signal
//! bridge) are joined, and only then is the connection closed, so handlers
//! that are still running can complete or release their jobs.

use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

use crate::conn::{BeanstalkConn, ConnError, Connection};
use crate::handler::Routing;
use crate::job::Job;
use crate::signal::{self, OsSignals, ShutdownTrigger};
use crate::stop::StopSignal;
use crate::types::{ClientConfig, Error, Network, Result};

/// Reads one tube of the shared connection.
struct TubeReader {
    name: Arc<str>,
    conn: Arc<dyn Connection>,
}

impl TubeReader {
    /// Reserve from this tube without waiting.
    async fn reserve_now(&self) -> std::result::Result<Job, ConnError> {
        let reserved = self.conn.reserve(&self.name, Duration::ZERO).await?;
        Ok(Job::new(
            self.conn.clone(),
            self.name.clone(),
            reserved.id,
            reserved.body,
        ))
    }
}

/// A beanstalkd worker client.
///
/// A client runs once: its stop signal and admission pool belong to a
/// single engine lifetime. Share it behind an `Arc` to call [`Client::stop`]
/// from another task while [`Client::work`] runs.
pub struct Client {
    config: ClientConfig,
    routing: Arc<Routing>,
    stop: StopSignal,
    admission: Arc<Semaphore>,
    trigger: Arc<dyn ShutdownTrigger>,
}

impl Client {
    /// Build a client. Fails if the configuration cannot run.
    pub fn new(config: ClientConfig, routing: impl Into<Routing>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            admission: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            routing: Arc::new(routing.into()),
            stop: StopSignal::new(),
            trigger: Arc::new(OsSignals),
        })
    }

    /// Replace the external shutdown source (OS signals by default).
    pub fn with_shutdown_trigger(mut self, trigger: impl ShutdownTrigger + 'static) -> Self {
        self.trigger = Arc::new(trigger);
        self
    }

    /// A handle to this client's stop signal.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Request a graceful stop. The first call fires; later calls return
    /// [`Error::AlreadyStopped`].
    pub fn stop(&self) -> Result<()> {
        self.stop.fire()?;
        tracing::info!("shutdown_requested: stop()");
        Ok(())
    }

    /// Handlers currently running (admission permits held).
    pub fn active_workers(&self) -> usize {
        self.config.max_concurrency - self.admission.available_permits()
    }

    /// Dial the configured broker and process jobs until stopped.
    ///
    /// Always returns an error: [`Error::Quit`] after a requested stop,
    /// otherwise the failure that ended the run.
    pub async fn connect_and_work(&self) -> Error {
        match BeanstalkConn::connect_with(&self.config).await {
            Ok(conn) => self.work(Arc::new(conn)).await,
            Err(e) => {
                tracing::error!(
                    "connect_failed: network={}, addr={}, error={}",
                    self.config.network,
                    self.config.addr,
                    e
                );
                e
            }
        }
    }

    /// Process jobs from `conn` until stopped or the connection fails.
    ///
    /// Returns [`Error::Quit`] on a requested stop, the raw
    /// [`Error::Conn`] on a fatal reservation failure, and
    /// [`Error::DrainTimeout`] when a configured drain timeout cut a graceful
    /// stop short.
    pub async fn work(&self, conn: Arc<dyn Connection>) -> Error {
        let readers: Vec<TubeReader> = self
            .routing
            .tubes()
            .into_iter()
            .map(|name| TubeReader {
                name: name.into(),
                conn: conn.clone(),
            })
            .collect();

        tracing::info!(
            "client_started: tubes={:?}, max_concurrency={}, poll_interval={:?}",
            readers.iter().map(|r| &*r.name).collect::<Vec<_>>(),
            self.config.max_concurrency,
            self.config.poll_interval,
        );

        let tracker = TaskTracker::new();
        {
            let trigger = self.trigger.clone();
            let stop = self.stop.clone();
            tracker.spawn(async move { signal::bridge(trigger.as_ref(), &stop).await });
        }

        let outcome = self.scan(&readers, &tracker).await;

        // Every exit path fires the stop so the bridge returns.
        let _ = self.stop.fire();
        tracker.close();
        let drained = self.drain(&tracker).await;

        if let Err(e) = conn.close().await {
            tracing::debug!("connection_close_failed: {}", e);
        }

        match (outcome, drained) {
            (Error::Quit, Err(timeout)) => timeout,
            (outcome, _) => {
                tracing::info!("client_stopped: reason={}", outcome.as_label());
                outcome
            }
        }
    }

    async fn scan(&self, readers: &[TubeReader], tracker: &TaskTracker) -> Error {
        loop {
            for reader in readers {
                if self.stop.is_fired() {
                    return Error::Quit;
                }

                let Ok(permit) = self.admission.clone().try_acquire_owned() else {
                    continue;
                };

                match reader.reserve_now().await {
                    Ok(job) => self.spawn_worker(tracker, job, permit),
                    Err(e) if e.is_timeout_or_deadline() => drop(permit),
                    Err(e) => {
                        tracing::error!("reserve_failed: tube={}, error={}", reader.name, e);
                        let _ = self.stop.fire();
                        return Error::Conn(e);
                    }
                }
            }

            tokio::select! {
                _ = self.stop.fired() => return Error::Quit,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    fn spawn_worker(&self, tracker: &TaskTracker, job: Job, permit: OwnedSemaphorePermit) {
        tracing::debug!("job_reserved: tube={}, id={}", job.tube(), job.id());
        let routing = self.routing.clone();

        tracker.spawn(async move {
            let id = job.id();
            let tube = job.tube().to_string();
            if let Err(panic) = AssertUnwindSafe(routing.dispatch(job)).catch_unwind().await {
                tracing::error!(
                    "handler_panicked: tube={}, id={}, panic={}",
                    tube,
                    id,
                    panic_message(panic.as_ref())
                );
            }
            drop(permit);
        });
    }

    async fn drain(&self, tracker: &TaskTracker) -> Result<()> {
        let running = self.active_workers();
        if running > 0 {
            tracing::info!("draining: workers={}", running);
        }

        let result = match self.config.drain_timeout {
            None => {
                tracker.wait().await;
                Ok(())
            }
            Some(timeout) => match tokio::time::timeout(timeout, tracker.wait()).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    let stuck = self.active_workers();
                    tracing::warn!("drain_timeout: timeout={:?}, stuck={}", timeout, stuck);
                    Err(Error::DrainTimeout { timeout, stuck })
                }
            },
        };

        if running > 0 && result.is_ok() {
            tracing::info!("drain_complete: workers={}", running);
        }
        result
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("routing", &self.routing)
            .field("stopped", &self.stop.is_fired())
            .field("active_workers", &self.active_workers())
            .finish()
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Dial `addr` and process jobs with `routing` until stopped.
pub async fn connect_and_work(
    network: Network,
    addr: &str,
    poll_interval: Duration,
    max_concurrency: usize,
    routing: impl Into<Routing>,
) -> Error {
    let config = ClientConfig::new(network, addr)
        .with_poll_interval(poll_interval)
        .with_max_concurrency(max_concurrency);
    match Client::new(config, routing) {
        Ok(client) => client.connect_and_work().await,
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{Cause, MockConnection, Op};
    use crate::handler::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    fn noop_client(max: usize) -> Client {
        let config = ClientConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_max_concurrency(max);
        Client::new(config, handler_fn(|_job| async {}))
            .unwrap()
            .with_shutdown_trigger(CancellationToken::new())
    }

    #[test]
    fn test_new_rejects_zero_concurrency() {
        let config = ClientConfig::default().with_max_concurrency(0);
        let result = Client::new(config, handler_fn(|_job| async {}));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_stop_twice_reports_already_stopped() {
        let client = noop_client(1);
        client.stop().unwrap();
        assert!(matches!(client.stop(), Err(Error::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_non_timeout_reserve_error_is_fatal() {
        let mut conn = MockConnection::new();
        conn.expect_reserve()
            .times(1)
            .returning(|_, _| Err(ConnError::new(Op::Reserve, Cause::NotFound)));
        conn.expect_close().times(1).returning(|| Ok(()));

        let client = noop_client(1);
        let err = client.work(Arc::new(conn)).await;
        match err {
            Error::Conn(e) => {
                assert_eq!(e.op, Op::Reserve);
                assert!(matches!(e.cause, Cause::NotFound));
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        assert!(client.stop_signal().is_fired());
    }

    #[tokio::test]
    async fn test_timeout_on_wrong_operation_is_fatal() {
        let mut conn = MockConnection::new();
        conn.expect_reserve()
            .times(1)
            .returning(|_, _| Err(ConnError::new(Op::Watch, Cause::TimedOut)));
        conn.expect_close().times(1).returning(|| Ok(()));

        let err = noop_client(1).work(Arc::new(conn)).await;
        assert!(matches!(err, Error::Conn(ConnError { op: Op::Watch, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_deadline_keep_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut conn = MockConnection::new();
        {
            let calls = calls.clone();
            conn.expect_reserve().returning(move |tube, timeout| {
                assert_eq!(tube, "default");
                assert_eq!(timeout, Duration::ZERO);
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let cause = if n % 2 == 0 {
                    Cause::TimedOut
                } else {
                    Cause::DeadlineSoon
                };
                Err(ConnError::new(Op::Reserve, cause))
            });
        }
        conn.expect_close().times(1).returning(|| Ok(()));

        let client = Arc::new(noop_client(1));
        let stopper = {
            let client = client.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                client.stop().unwrap();
            })
        };

        let err = client.work(Arc::new(conn)).await;
        stopper.await.unwrap();
        assert!(err.is_quit());
        assert!(calls.load(Ordering::SeqCst) >= 5);
        assert_eq!(client.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_stopped_client_quits_without_reserving() {
        let mut conn = MockConnection::new();
        conn.expect_reserve().times(0);
        conn.expect_close().times(1).returning(|| Ok(()));

        let client = noop_client(1);
        client.stop().unwrap();
        assert!(client.work(Arc::new(conn)).await.is_quit());
    }

    #[tokio::test]
    async fn test_close_failure_does_not_mask_outcome() {
        let mut conn = MockConnection::new();
        conn.expect_reserve().returning(|_, _| {
            Err(ConnError::new(Op::Reserve, Cause::TimedOut))
        });
        conn.expect_close()
            .times(1)
            .returning(|| Err(ConnError::new(Op::Quit, Cause::Closed)));

        let client = noop_client(1);
        let token = CancellationToken::new();
        let client = Client {
            trigger: Arc::new(token.clone()),
            ..client
        };
        token.cancel();
        assert!(client.work(Arc::new(conn)).await.is_quit());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
