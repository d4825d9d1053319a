//! Job handlers and tube routing.
//!
//! A [`Handler`] processes one job. The engine accepts a [`Routing`], decided
//! when the client is built:
//! - [`Routing::Mux`]: a [`WorkMux`] mapping tube names to handlers; the
//!   engine reserves from every registered tube.
//! - [`Routing::Single`]: one handler bound to the `default` tube.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::conn::beanstalk::DEFAULT_TUBE;
use crate::conn::DEFAULT_PRIORITY;
use crate::job::Job;
use crate::types::{Error, Result};
use crate::validation::validate_tube_name;

/// Delay applied when a job arrives for a tube nobody handles.
pub const UNROUTED_RELEASE_DELAY: Duration = Duration::from_secs(1);

/// Processes reserved jobs.
///
/// The handler owns the job's outcome: it should call [`Job::delete`] or
/// [`Job::release`]. Nothing is reported back to the engine.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn work(&self, job: Job);
}

/// Adapts an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn work(&self, job: Job) {
        (self.0)(job).await
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn")
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(HandlerFn::new(f))
}

/// Routes jobs to handlers by tube name.
///
/// Tube names are unique; registering a name twice is rejected and the first
/// handler stays in place. [`WorkMux::tubes`] keeps registration order.
#[derive(Default)]
pub struct WorkMux {
    order: Vec<String>,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl WorkMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tube`.
    pub fn handle(&mut self, tube: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        let tube = tube.into();
        validate_tube_name(&tube)?;

        if self.handlers.contains_key(&tube) {
            return Err(Error::validation(format!(
                "handler already registered for tube: {}",
                tube
            )));
        }

        tracing::debug!("Registered handler for tube: {}", tube);
        self.order.push(tube.clone());
        self.handlers.insert(tube, handler);
        Ok(())
    }

    /// Register an async closure for `tube`.
    pub fn handle_fn<F, Fut>(&mut self, tube: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handle(tube, handler_fn(f))
    }

    /// Registered tube names, in registration order.
    pub fn tubes(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get(&self, tube: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(tube)
    }

    /// Hand `job` to the handler for its tube.
    ///
    /// A job for an unregistered tube is logged and released back to the
    /// broker after [`UNROUTED_RELEASE_DELAY`] rather than dropped.
    pub async fn dispatch(&self, job: Job) {
        match self.get(job.tube()) {
            Some(handler) => handler.work(job).await,
            None => {
                tracing::warn!(
                    "unrouted_job: tube={}, id={}, releasing",
                    job.tube(),
                    job.id()
                );
                if let Err(e) = job.release(DEFAULT_PRIORITY, UNROUTED_RELEASE_DELAY).await {
                    tracing::error!("unrouted_job_release_failed: id={}, error={}", job.id(), e);
                }
            }
        }
    }
}

impl fmt::Debug for WorkMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkMux").field("tubes", &self.order).finish()
    }
}

/// What the engine dispatches jobs to.
pub enum Routing {
    /// Per-tube handlers.
    Mux(WorkMux),
    /// One handler for the `default` tube.
    Single(Arc<dyn Handler>),
}

impl Routing {
    /// Tubes the engine reserves from. Never empty.
    pub fn tubes(&self) -> Vec<String> {
        match self {
            Routing::Mux(mux) if !mux.order.is_empty() => mux.tubes(),
            _ => vec![DEFAULT_TUBE.to_string()],
        }
    }

    pub async fn dispatch(&self, job: Job) {
        match self {
            Routing::Mux(mux) => mux.dispatch(job).await,
            Routing::Single(handler) => handler.work(job).await,
        }
    }
}

impl From<WorkMux> for Routing {
    fn from(mux: WorkMux) -> Self {
        Routing::Mux(mux)
    }
}

impl From<Arc<dyn Handler>> for Routing {
    fn from(handler: Arc<dyn Handler>) -> Self {
        Routing::Single(handler)
    }
}

impl fmt::Debug for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Routing::Mux(mux) => f.debug_tuple("Mux").field(mux).finish(),
            Routing::Single(_) => f.write_str("Single"),
        }
    }
}
