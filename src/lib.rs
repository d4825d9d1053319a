//! # tubeworker - beanstalkd worker pool client
//!
//! Reserves jobs from one or more beanstalkd tubes over a single connection
//! and runs them on a bounded pool of concurrent handlers:
//! - Non-blocking multi-tube scanning with a fixed poll interval
//! - Admission control: at most `max_concurrency` handlers at once
//! - Per-tube routing through [`WorkMux`], or one handler for `default`
//! - Graceful stop from [`Client::stop`] or OS signals, draining running
//!   handlers before the connection is closed
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────┐
//!   OS signals  →  │             Client               │
//!   stop()      →  │  ┌──────────┐   ┌─────────────┐  │      ┌──────────┐
//!                  │  │   scan   │ → │  admission  │  │  ──► │ handlers │
//!                  │  │  tubes   │   │  semaphore  │  │      │ (tasks)  │
//!                  │  └──────────┘   └─────────────┘  │      └──────────┘
//!                  │        │ reserve / delete / release         │
//!                  └────────┼─────────────────────────┘          │
//!                           ▼                                    ▼
//!                   Connection (beanstalkd text protocol, or in-memory)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod conn;
pub mod handler;
pub mod job;
pub mod signal;
pub mod stop;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use client::{connect_and_work, Client};
pub use conn::{BeanstalkConn, Connection, MemoryBroker, DEFAULT_PRIORITY, DEFAULT_TTR};
pub use handler::{handler_fn, Handler, Routing, WorkMux};
pub use job::Job;
pub use stop::StopSignal;
pub use types::{ClientConfig, Config, Error, JobId, Network, Result};
