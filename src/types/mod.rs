//! Core types for the worker client.
//!
//! - **IDs**: broker-assigned job identifiers
//! - **Errors**: application error types with thiserror derives
//! - **Config**: client and observability configuration

mod config;
mod errors;
mod ids;

pub use config::{ClientConfig, Config, Network, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::JobId;
