//! Engine-wide constants for rotor.

use std::time::Duration;

// =============================================================================
// Rotation Constants
// =============================================================================

/// Default padding applied to expiration comparisons to absorb clock drift
/// between the client and the source of rotation timestamps.
pub const DEFAULT_CLOCK_SKEW_MARGIN: Duration = Duration::from_secs(1);

/// Number of shards consulted by the optimal range policy: the current shard
/// plus the previous one, which covers a single rotation boundary crossing.
pub const OPTIMAL_SHARD_RANGE: usize = 2;

/// Raw shard id meaning "rotation disabled". Mapped to shard 0 when a
/// statement is materialized.
pub const NO_ROTATION_TID: i32 = -1;

/// Default rotation period (1 day).
pub const DEFAULT_ROTATION_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Executor Constants
// =============================================================================

/// Default number of worker threads used for decoding and merging.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default name prefix for worker threads.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "rotor-worker";
