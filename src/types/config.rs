//! Configuration structures.
//!
//! Configuration is loaded from a JSON file, then overridden from
//! `TUBEWORKER_*` environment variables, then (in the binary) from flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::types::{Error, Result};
use crate::validation::{validate_non_empty, validate_positive};

/// Global client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Worker client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(network) = lookup("TUBEWORKER_NETWORK") {
            self.client.network = network.parse()?;
        }
        if let Some(addr) = lookup("TUBEWORKER_ADDR") {
            self.client.addr = addr;
        }
        if let Some(interval) = lookup("TUBEWORKER_POLL_INTERVAL") {
            self.client.poll_interval = humantime::parse_duration(&interval).map_err(|e| {
                Error::validation(format!("TUBEWORKER_POLL_INTERVAL: {}", e))
            })?;
        }
        if let Some(max) = lookup("TUBEWORKER_MAX_CONCURRENCY") {
            self.client.max_concurrency = max.parse().map_err(|e| {
                Error::validation(format!("TUBEWORKER_MAX_CONCURRENCY: {}", e))
            })?;
        }
        if let Some(timeout) = lookup("TUBEWORKER_DRAIN_TIMEOUT") {
            self.client.drain_timeout = if timeout.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(humantime::parse_duration(&timeout).map_err(|e| {
                    Error::validation(format!("TUBEWORKER_DRAIN_TIMEOUT: {}", e))
                })?)
            };
        }
        if let Some(limit) = lookup("TUBEWORKER_MAX_JOB_BYTES") {
            self.client.max_job_bytes = limit.parse().map_err(|e| {
                Error::validation(format!("TUBEWORKER_MAX_JOB_BYTES: {}", e))
            })?;
        }
        if let Some(format) = lookup("TUBEWORKER_LOG_FORMAT") {
            self.observability.json_logs = format.eq_ignore_ascii_case("json");
        }
        Ok(())
    }
}

/// Transport used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "tcp4" | "tcp6" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(Error::validation(format!("unsupported network: {}", other))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => f.write_str("tcp"),
            Network::Unix => f.write_str("unix"),
        }
    }
}

/// Worker client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Transport kind.
    pub network: Network,

    /// Broker address (`host:port` for tcp, a socket path for unix).
    pub addr: String,

    /// How long to sleep after a full pass over all tubes.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum number of jobs processed at once.
    pub max_concurrency: usize,

    /// Upper bound on the shutdown drain. `None` waits for every handler.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Option<Duration>,

    /// Largest job body accepted from or sent to the broker.
    pub max_job_bytes: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            addr: "127.0.0.1:11300".to_string(),
            poll_interval: Duration::from_millis(100),
            max_concurrency: 1,
            drain_timeout: None,
            max_job_bytes: 65_535,
        }
    }
}

impl ClientConfig {
    pub fn new(network: Network, addr: impl Into<String>) -> Self {
        Self {
            network,
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_non_empty(&self.addr, "addr")?;
        validate_positive(self.max_concurrency as u64, "max_concurrency")?;
        validate_positive(u64::from(self.max_job_bytes), "max_job_bytes")?;
        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
