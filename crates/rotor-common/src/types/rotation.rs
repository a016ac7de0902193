//! Rotation state of a sharded table family.

use std::collections::HashSet;
use std::time::Duration;

use super::ShardId;

/// Point-in-time view of a table rotation.
///
/// A `RotationState` has no identity of its own: it is derived from the
/// rotation configuration and the wall clock every time a query needs it.
///
/// Invariants, checked on construction:
/// - `num_shards >= 1`
/// - `ordered_shard_ids.len() == num_shards`, each id `< num_shards`, no duplicates
/// - `ordered_shard_ids[0] == current_shard`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationState {
    num_shards: usize,
    current_shard: ShardId,
    elapsed_in_current: Duration,
    rotation_period: Duration,
    ordered_shard_ids: Vec<ShardId>,
}

impl RotationState {
    /// Creates a state whose recency order walks backwards from the current
    /// shard: `current, current - 1, ...` modulo `num_shards`.
    pub fn new(
        num_shards: usize,
        current_shard: ShardId,
        elapsed_in_current: Duration,
        rotation_period: Duration,
    ) -> Result<Self, String> {
        if num_shards == 0 {
            return Err("num_shards must be at least 1".to_string());
        }
        let current = current_shard
            .table_index()
            .filter(|&index| !current_shard.is_no_rotation() && index < num_shards)
            .ok_or_else(|| format!("current shard {current_shard} out of range 0..{num_shards}"))?;
        let ordered = (0..num_shards)
            .map(|step| ShardId::from_index((current + num_shards - step) % num_shards))
            .collect();
        Self::with_ordered_ids(num_shards, ordered, elapsed_in_current, rotation_period)
    }

    /// Creates a state from an explicit recency order. The first id is the
    /// current shard.
    pub fn with_ordered_ids(
        num_shards: usize,
        ordered_shard_ids: Vec<ShardId>,
        elapsed_in_current: Duration,
        rotation_period: Duration,
    ) -> Result<Self, String> {
        if num_shards == 0 {
            return Err("num_shards must be at least 1".to_string());
        }
        if ordered_shard_ids.len() != num_shards {
            return Err(format!(
                "expected {} ordered shard ids, got {}",
                num_shards,
                ordered_shard_ids.len()
            ));
        }
        let mut seen = HashSet::with_capacity(num_shards);
        for id in &ordered_shard_ids {
            match id.table_index() {
                Some(index) if !id.is_no_rotation() && index < num_shards => {}
                _ => return Err(format!("shard id {id} out of range 0..{num_shards}")),
            }
            if !seen.insert(*id) {
                return Err(format!("shard id {id} listed twice"));
            }
        }
        Ok(Self {
            num_shards,
            current_shard: ordered_shard_ids[0],
            elapsed_in_current,
            rotation_period,
            ordered_shard_ids,
        })
    }

    /// Returns the number of shards in the rotation.
    #[must_use]
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Returns the shard currently receiving writes.
    #[must_use]
    pub fn current_shard(&self) -> ShardId {
        self.current_shard
    }

    /// Returns how long the current shard has been active.
    #[must_use]
    pub fn elapsed_in_current(&self) -> Duration {
        self.elapsed_in_current
    }

    /// Returns the rotation period.
    #[must_use]
    pub fn rotation_period(&self) -> Duration {
        self.rotation_period
    }

    /// Returns all shard ids, most recent first.
    #[must_use]
    pub fn ordered_shard_ids(&self) -> &[ShardId] {
        &self.ordered_shard_ids
    }
}
