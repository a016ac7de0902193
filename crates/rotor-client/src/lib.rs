//! # rotor-client
//!
//! Query execution over time-rotated table shards.
//!
//! Instead of expiring rows one by one, a rotated table family periodically
//! switches writes to a fresh table ("shard") and lets old shards age out.
//! This crate decides which shards a query must read, dispatches one request
//! per shard concurrently and merges the per-shard results:
//!
//! - **Rotation**: current shard and recency order from the wall clock
//! - **Resolution**: how many of the most recent shards to read, with
//!   expiration shrink and clock skew tolerance
//! - **Binding**: single-use binders holding positional values and
//!   consistency overrides
//! - **Execution**: single-shard fast path and concurrent fan-out with
//!   decoding on a dedicated worker pool
//! - **Merging**: collect-all, first-present and at-most-one
//!
//! Preparing statements, managing sessions and mapping rows to domain types
//! are left to the embedder through the traits in [`driver`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rotor_client::{FanOutExecutor, ShardedQuery, WorkerPool};
//! use rotor_common::RotationConfig;
//!
//! let executor = Arc::new(FanOutExecutor::with_shared_pool(session)?);
//! let query = ShardedQuery::builder("SELECT * FROM events WHERE key = ?", EventMapper, executor)
//!     .slots(["key"])
//!     .statements(prepared_per_shard)
//!     .rotation(RotationConfig::new(3, Duration::from_secs(3600)))
//!     .build()?;
//!
//! let mut binder = query.binder();
//! binder.bind(0, "user-42")?;
//! let events = binder.execute_async_and_map().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;

/// Driver seams.
pub mod driver;

/// Rotation state providers.
pub mod rotation;

/// Shard set resolution.
pub mod resolver;

/// Per-invocation parameter binding.
pub mod binder;

/// Result merge strategies.
pub mod merge;

/// Fan-out execution and the worker pool.
pub mod executor;

/// Query definitions.
pub mod query;

// Re-exports
pub use binder::QueryBinder;
pub use driver::{
    BoundStatement, DriverFuture, DriverSession, PreparedStatement, PreparedStatementProvider,
    RawRows, RowMapper,
};
pub use error::{BackendError, ClientError, ClientResult, ErrorCode};
pub use executor::{ExecutorStats, FanOutExecutor, PendingResult, WorkerPool};
pub use merge::FirstPresentMode;
pub use query::{ExecutionOptions, ShardedQuery, ShardedQueryBuilder};
pub use resolver::{RangePolicy, ShardRange, ShardResolver};
pub use rotation::{RotationInfoProvider, StaticRotation, WallClockRotation};
