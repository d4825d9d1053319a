//! beanstalkd text-protocol connection.
//!
//! One [`BeanstalkConn`] wraps one byte stream. Every command is a single
//! request/response round trip performed under an async mutex, so the scan
//! loop and worker tasks can share the connection: a worker's `delete` simply
//! waits for the in-progress zero-timeout `reserve` to finish.
//!
//! Reservations target exactly one tube. Before reserving, the connection
//! watches that tube and ignores every other watched tube, which keeps one
//! busy tube from answering a reservation meant for another.
//!
//! The session is checked out of its slot for the whole round trip. If the
//! caller's future is dropped mid-exchange the session goes with it, and
//! later calls fail with [`Cause::Closed`] instead of reading a reply that
//! belongs to the abandoned command.
//!
//! A reserved job larger than `max_job_bytes` is skipped on the wire,
//! buried, and the reservation is retried.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::conn::codec::{self, Response};
use crate::conn::{Cause, ConnError, Connection, Op, Reserved, DEFAULT_PRIORITY};
use crate::types::{ClientConfig, JobId, Network, Result};

/// Tube every new beanstalkd connection watches and uses.
pub const DEFAULT_TUBE: &str = "default";

/// Any bidirectional byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

struct Session {
    stream: BufReader<Box<dyn Transport>>,
    watched: Vec<String>,
    using: String,
    max_job_bytes: u32,
}

impl Session {
    async fn round_trip(&mut self, op: Op, line: &str, body: Option<&[u8]>) -> std::result::Result<Response, ConnError> {
        codec::write_command(&mut self.stream, line, body)
            .await
            .map_err(|e| ConnError::new(op, e))?;
        let reply = codec::read_line(&mut self.stream)
            .await
            .map_err(|e| ConnError::new(op, e))?;
        codec::parse_response(&reply).map_err(|cause| ConnError::new(op, cause))
    }

    /// Make `tube` the only watched tube.
    async fn watch_only(&mut self, tube: &str) -> std::result::Result<(), ConnError> {
        if self.watched.len() == 1 && self.watched[0] == tube {
            return Ok(());
        }

        if !self.watched.iter().any(|t| t == tube) {
            match self.round_trip(Op::Watch, &format!("watch {}", tube), None).await? {
                Response::Watching(_) => self.watched.push(tube.to_string()),
                other => return Err(ConnError::new(Op::Watch, other.into_cause())),
            }
        }

        let others: Vec<String> = self.watched.iter().filter(|t| *t != tube).cloned().collect();
        for other in others {
            match self.round_trip(Op::Ignore, &format!("ignore {}", other), None).await? {
                Response::Watching(_) => self.watched.retain(|t| *t != other),
                resp => return Err(ConnError::new(Op::Ignore, resp.into_cause())),
            }
        }
        Ok(())
    }

    async fn use_tube(&mut self, tube: &str) -> std::result::Result<(), ConnError> {
        if self.using == tube {
            return Ok(());
        }
        match self.round_trip(Op::Use, &format!("use {}", tube), None).await? {
            Response::Using(name) if name == tube => {
                self.using = name;
                Ok(())
            }
            other => Err(ConnError::new(Op::Use, other.into_cause())),
        }
    }

    async fn reserve(&mut self, tube: &str, timeout: Duration) -> std::result::Result<Reserved, ConnError> {
        self.watch_only(tube).await?;

        let line = format!("reserve-with-timeout {}", timeout.as_secs());
        loop {
            match self.round_trip(Op::Reserve, &line, None).await? {
                Response::Reserved { id, bytes } if bytes > self.max_job_bytes as usize => {
                    codec::skip_body(&mut self.stream, bytes)
                        .await
                        .map_err(|e| ConnError::new(Op::Reserve, e))?;
                    tracing::warn!(
                        "oversized_job_buried: tube={}, id={}, bytes={}, limit={}",
                        tube,
                        id,
                        bytes,
                        self.max_job_bytes
                    );
                    self.bury(id, DEFAULT_PRIORITY).await?;
                }
                Response::Reserved { id, bytes } => {
                    let body = codec::read_body(&mut self.stream, bytes)
                        .await
                        .map_err(|e| ConnError::new(Op::Reserve, e))?;
                    return Ok(Reserved { id, body });
                }
                other => return Err(ConnError::new(Op::Reserve, other.into_cause())),
            }
        }
    }

    /// Bury a reserved job. A job that is already gone counts as done.
    async fn bury(&mut self, id: JobId, priority: u32) -> std::result::Result<(), ConnError> {
        match self.round_trip(Op::Bury, &format!("bury {} {}", id, priority), None).await? {
            Response::Buried | Response::NotFound => Ok(()),
            other => Err(ConnError::new(Op::Bury, other.into_cause())),
        }
    }

    async fn delete(&mut self, id: JobId) -> std::result::Result<(), ConnError> {
        match self.round_trip(Op::Delete, &format!("delete {}", id), None).await? {
            Response::Deleted => Ok(()),
            other => Err(ConnError::new(Op::Delete, other.into_cause())),
        }
    }

    async fn release(&mut self, id: JobId, priority: u32, delay: Duration) -> std::result::Result<(), ConnError> {
        let line = format!("release {} {} {}", id, priority, delay.as_secs());
        match self.round_trip(Op::Release, &line, None).await? {
            Response::Released => Ok(()),
            other => Err(ConnError::new(Op::Release, other.into_cause())),
        }
    }

    async fn put(
        &mut self,
        tube: &str,
        body: &[u8],
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> std::result::Result<JobId, ConnError> {
        if body.len() > self.max_job_bytes as usize {
            return Err(ConnError::new(Op::Put, Cause::JobTooBig));
        }
        self.use_tube(tube).await?;

        let line = format!(
            "put {} {} {} {}",
            priority,
            delay.as_secs(),
            ttr.as_secs().max(1),
            body.len()
        );
        match self.round_trip(Op::Put, &line, Some(body)).await? {
            Response::Inserted(id) => Ok(id),
            other => Err(ConnError::new(Op::Put, other.into_cause())),
        }
    }
}

/// Return a checked-out session to its slot unless its stream can no longer
/// be trusted to be in sync.
fn check_in<T>(
    slot: &mut Option<Session>,
    session: Session,
    result: &std::result::Result<T, ConnError>,
) {
    if let Err(err) = result {
        if matches!(err.cause, Cause::Io(_) | Cause::UnexpectedResponse(_)) {
            tracing::debug!("beanstalk_session_discarded: op={}, cause={}", err.op, err.cause);
            return;
        }
    }
    *slot = Some(session);
}

/// A beanstalkd connection over TCP, a Unix socket, or any [`Transport`].
pub struct BeanstalkConn {
    session: Mutex<Option<Session>>,
}

impl BeanstalkConn {
    /// Wrap an already-open stream.
    pub fn new<T: Transport + 'static>(stream: T) -> Self {
        Self::with_max_job_bytes(stream, ClientConfig::default().max_job_bytes)
    }

    /// Wrap an already-open stream, capping job bodies at `max_job_bytes`.
    pub fn with_max_job_bytes<T: Transport + 'static>(stream: T, max_job_bytes: u32) -> Self {
        let stream: Box<dyn Transport> = Box::new(stream);
        Self {
            session: Mutex::new(Some(Session {
                stream: BufReader::new(stream),
                watched: vec![DEFAULT_TUBE.to_string()],
                using: DEFAULT_TUBE.to_string(),
                max_job_bytes,
            })),
        }
    }

    /// Dial `addr` over `network`.
    pub async fn connect(network: Network, addr: &str) -> Result<Self> {
        Self::connect_with_limit(network, addr, ClientConfig::default().max_job_bytes).await
    }

    /// Dial the broker named by a client configuration.
    pub async fn connect_with(config: &ClientConfig) -> Result<Self> {
        Self::connect_with_limit(config.network, &config.addr, config.max_job_bytes).await
    }

    async fn connect_with_limit(network: Network, addr: &str, max_job_bytes: u32) -> Result<Self> {
        match network {
            Network::Tcp => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                tracing::debug!("beanstalk_connected: network=tcp, addr={}", addr);
                Ok(Self::with_max_job_bytes(stream, max_job_bytes))
            }
            #[cfg(unix)]
            Network::Unix => {
                let stream = tokio::net::UnixStream::connect(addr).await?;
                tracing::debug!("beanstalk_connected: network=unix, addr={}", addr);
                Ok(Self::with_max_job_bytes(stream, max_job_bytes))
            }
            #[cfg(not(unix))]
            Network::Unix => Err(crate::types::Error::validation(
                "unix sockets are not supported on this platform",
            )),
        }
    }

    /// Insert a job into `tube`.
    pub async fn put(
        &self,
        tube: &str,
        body: &[u8],
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> std::result::Result<JobId, ConnError> {
        let mut guard = self.session.lock().await;
        let mut session = guard
            .take()
            .ok_or_else(|| ConnError::new(Op::Put, Cause::Closed))?;
        let result = session.put(tube, body, priority, delay, ttr).await;
        check_in(&mut guard, session, &result);
        result
    }
}

impl fmt::Debug for BeanstalkConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanstalkConn").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for BeanstalkConn {
    async fn reserve(&self, tube: &str, timeout: Duration) -> std::result::Result<Reserved, ConnError> {
        let mut guard = self.session.lock().await;
        let mut session = guard
            .take()
            .ok_or_else(|| ConnError::new(Op::Reserve, Cause::Closed))?;
        let result = session.reserve(tube, timeout).await;
        check_in(&mut guard, session, &result);
        result
    }

    async fn delete(&self, id: JobId) -> std::result::Result<(), ConnError> {
        let mut guard = self.session.lock().await;
        let mut session = guard
            .take()
            .ok_or_else(|| ConnError::new(Op::Delete, Cause::Closed))?;
        let result = session.delete(id).await;
        check_in(&mut guard, session, &result);
        result
    }

    async fn release(&self, id: JobId, priority: u32, delay: Duration) -> std::result::Result<(), ConnError> {
        let mut guard = self.session.lock().await;
        let mut session = guard
            .take()
            .ok_or_else(|| ConnError::new(Op::Release, Cause::Closed))?;
        let result = session.release(id, priority, delay).await;
        check_in(&mut guard, session, &result);
        result
    }

    async fn close(&self) -> std::result::Result<(), ConnError> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };
        codec::write_command(&mut session.stream, "quit", None)
            .await
            .map_err(|e| ConnError::new(Op::Quit, e))?;
        session
            .stream
            .shutdown()
            .await
            .map_err(|e| ConnError::new(Op::Quit, e))?;
        Ok(())
    }
}
