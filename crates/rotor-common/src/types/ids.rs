//! Shard identifier type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::NO_ROTATION_TID;

/// Shard identifier - the rotation id ("tid") of one time-bucketed table.
///
/// Valid shard ids are non-negative and smaller than the number of shards in
/// the rotation. The sentinel [`ShardId::NO_ROTATION`] means rotation is
/// disabled and addresses the single table at index 0.
///
/// # Example
///
/// ```rust
/// use rotor_common::types::ShardId;
///
/// assert_eq!(ShardId::new(3).table_index(), Some(3));
/// assert_eq!(ShardId::NO_ROTATION.table_index(), Some(0));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ShardId(i32);

impl ShardId {
    /// Sentinel for "rotation disabled".
    pub const NO_ROTATION: Self = Self(NO_ROTATION_TID);

    /// The first shard.
    pub const FIRST: Self = Self(0);

    /// Creates a new `ShardId` from a raw rotation id.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw rotation id.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns true if this is the "rotation disabled" sentinel.
    #[inline]
    #[must_use]
    pub const fn is_no_rotation(self) -> bool {
        self.0 == NO_ROTATION_TID
    }

    /// Returns the index into the prepared statement table.
    ///
    /// The sentinel maps to 0; any other negative id has no table.
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> Option<usize> {
        if self.0 == NO_ROTATION_TID {
            Some(0)
        } else if self.0 < 0 {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    /// Creates a shard id from a table index.
    #[inline]
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(i32::try_from(index).unwrap_or(i32::MAX))
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_no_rotation() {
            write!(f, "ShardId(NO_ROTATION)")
        } else {
            write!(f, "ShardId({})", self.0)
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ShardId {
    #[inline]
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

impl From<ShardId> for i32 {
    #[inline]
    fn from(id: ShardId) -> Self {
        id.0
    }
}
