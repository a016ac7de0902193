//! Shard set resolution.
//!
//! Given a [`RotationState`] and a [`RangePolicy`], the resolver decides
//! which shards a multi-shard query must consult. The result is always a
//! prefix of the state's recency order, most recent shard first; the merge
//! strategies depend on that ordering.

use std::time::Duration;

use rotor_common::config::RotationConfig;
use rotor_common::constants::{DEFAULT_CLOCK_SKEW_MARGIN, OPTIMAL_SHARD_RANGE};
use rotor_common::types::{RotationState, ShardId};

use crate::error::{ClientError, ClientResult};

/// How many of the most recent shards to consult before expiration shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardRange {
    /// An explicit number of shards.
    Fixed(usize),
    /// The current and the previous shard.
    #[default]
    Optimal,
    /// The `query_range` of the rotation configuration.
    FromRotationConfig,
}

/// Range policy of one query definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePolicy {
    /// Base range.
    pub range: ShardRange,
    /// Range configured on the rotation, read by [`ShardRange::FromRotationConfig`].
    pub configured_range: Option<usize>,
    /// Drop the oldest shard once the current one outlived the expiration period.
    pub use_expiration_shrink: bool,
    /// Expiration period of the table family.
    pub expiration_period: Option<Duration>,
}

impl RangePolicy {
    /// Creates a policy without expiration shrink.
    pub fn new(range: ShardRange) -> Self {
        Self {
            range,
            configured_range: None,
            use_expiration_shrink: false,
            expiration_period: None,
        }
    }

    /// Creates a policy reading the configured range and expiration period
    /// from a rotation configuration.
    pub fn from_config(
        range: ShardRange,
        use_expiration_shrink: bool,
        config: &RotationConfig,
    ) -> Self {
        Self {
            range,
            configured_range: config.query_range,
            use_expiration_shrink,
            expiration_period: config.expiration_period,
        }
    }

    /// Enables expiration shrink.
    #[must_use]
    pub fn with_expiration_shrink(mut self, expiration_period: Duration) -> Self {
        self.use_expiration_shrink = true;
        self.expiration_period = Some(expiration_period);
        self
    }

    /// Returns the range before expiration shrink.
    pub fn base_range(&self) -> ClientResult<usize> {
        let n = match self.range {
            ShardRange::Fixed(n) => n,
            ShardRange::Optimal => OPTIMAL_SHARD_RANGE,
            ShardRange::FromRotationConfig => self.configured_range.ok_or_else(|| {
                ClientError::config("range must be set in the rotation configuration")
            })?,
        };
        if n == 0 {
            return Err(ClientError::config("range must be positive"));
        }
        Ok(n)
    }

    /// Checks the policy without a rotation state.
    pub fn validate(&self) -> ClientResult<()> {
        self.base_range()?;
        if self.use_expiration_shrink && self.expiration_period.is_none() {
            return Err(ClientError::config(
                "expiration shrink requires an expiration period",
            ));
        }
        Ok(())
    }
}

/// Resolves execution plans.
///
/// The clock skew margin is fixed at construction so tests can run with a
/// deterministic margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardResolver {
    clock_skew_margin: Duration,
}

impl Default for ShardResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_SKEW_MARGIN)
    }
}

impl ShardResolver {
    /// Creates a resolver with the given clock skew margin.
    pub fn new(clock_skew_margin: Duration) -> Self {
        Self { clock_skew_margin }
    }

    /// Returns the clock skew margin.
    pub fn clock_skew_margin(&self) -> Duration {
        self.clock_skew_margin
    }

    /// Returns the number of shards to query.
    ///
    /// Shrinks by exactly one shard once expired; expiration periods spanning
    /// several rotation periods are not modelled.
    pub fn resolve_range(&self, state: &RotationState, policy: &RangePolicy) -> ClientResult<usize> {
        let mut n = policy.base_range()?;
        if policy.use_expiration_shrink {
            let expiration = policy.expiration_period.ok_or_else(|| {
                ClientError::config("expiration shrink requires an expiration period")
            })?;
            if state.elapsed_in_current() >= expiration.saturating_add(self.clock_skew_margin) {
                n -= 1;
            }
        }
        if n == 0 {
            return Err(ClientError::config("range must be positive"));
        }
        Ok(n.min(state.num_shards()))
    }

    /// Returns the shards to query, most recent first.
    pub fn resolve_shard_set(
        &self,
        state: &RotationState,
        policy: &RangePolicy,
    ) -> ClientResult<Vec<ShardId>> {
        let n = self.resolve_range(state, policy)?;
        Ok(state.ordered_shard_ids()[..n].to_vec())
    }
}
