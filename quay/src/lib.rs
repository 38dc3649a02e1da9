//! Quay - a durable, Postgres-backed work queue.
//!
//! Producers push typed messages; workers pull batches, run them, and report
//! success or failure. A failed job is retried until it has failed
//! `max_attempts` times, after which it stays in the store as `Failed`.
//!
//! # Core Concepts
//!
//! - **Message**: the closed set of payloads a queue carries, written as an
//!   enum implementing [`Message`] with one [`MessageType`] struct per variant.
//!   A [`MessageRegistry`] lists the accepted types and decodes stored rows.
//!
//! - **Store**: the [`JobStore`] trait holds all job state. The
//!   [`PostgresJobStore`](persistence::PostgresJobStore) claims rows with
//!   `FOR UPDATE SKIP LOCKED`, so concurrent workers never share a job.
//!
//! - **Queue**: [`Queue`] is the engine: `push`, `pull`, `complete`, `fail`,
//!   `clear`, plus inspection and stale-job recovery.
//!
//! - **Runtime**: [`Worker`](runtime::Worker) runs a pull-execute-acknowledge
//!   loop with a [`JobHandler`](runtime::JobHandler); [`WorkerPool`](runtime::WorkerPool)
//!   and [`Reaper`](runtime::Reaper) cover the common deployment shape.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL persistence support via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use quay::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct SendEmail { to: String }
//!
//! impl MessageType for SendEmail {
//!     const NAME: &'static str = "SendEmail";
//! }
//!
//! enum Msg { SendEmail(SendEmail) }
//! // impl From<SendEmail> for Msg, impl Message for Msg ...
//!
//! let registry = MessageRegistry::<Msg>::new().register::<SendEmail>();
//! let queue = Queue::new(registry, store, QueueConfig::default())?;
//! queue.push(&Msg::SendEmail(SendEmail { to: "a@b.c".into() })).await?;
//! ```

/// Configuration structures for queue and persistence settings.
pub mod config;

/// Error types for the queue engine and storage backends.
pub mod error;

/// Job identifiers, statuses and row types.
pub mod job;

/// Message codec and type registry.
pub mod message;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides the PostgreSQL-backed implementation
/// of the job store when the `postgres` feature is enabled.
pub mod persistence;

/// The queue engine.
pub mod queue;

/// Worker loop, worker pools and the stale-job reaper.
pub mod runtime;

/// Storage abstraction.
///
/// The `store` module defines the [`JobStore`] trait every backend
/// implements, along with [`StatusCounts`] and [`ReapOutcome`].
pub mod store;

/// Tracing spans and structured events.
pub mod telemetry;

pub use config::*;
pub use error::*;
pub use job::*;
pub use message::*;
pub use queue::*;
pub use store::*;
