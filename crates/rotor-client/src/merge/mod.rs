//! Merging of per-shard results.
//!
//! Every function here consumes per-shard results in plan order, most
//! recent shard first.

use crate::error::{ClientError, ClientResult};

/// How a first-present query walks the shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstPresentMode {
    /// Query one shard at a time and stop at the first hit. Lower backend
    /// load, higher latency.
    #[default]
    Sequential,
    /// Query every shard concurrently, then scan in recency order.
    Parallel,
}

/// Concatenates every shard's rows in recency order.
///
/// Rows present in several shards are kept once per shard.
pub fn collect_all<T>(per_shard: Vec<Vec<T>>) -> Vec<T> {
    let total = per_shard.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    for rows in per_shard {
        merged.extend(rows);
    }
    merged
}

/// Returns the first value in recency order.
///
/// Shards are decoded lazily: nothing after the first non-empty shard is
/// pulled from the iterator.
pub fn first_present<T, I>(per_shard: I) -> ClientResult<Option<T>>
where
    I: IntoIterator<Item = ClientResult<Vec<T>>>,
{
    for rows in per_shard {
        if let Some(first) = rows?.into_iter().next() {
            return Ok(Some(first));
        }
    }
    Ok(None)
}

/// Returns the single value across all shards, if any.
///
/// More than one value is a rotation overlap problem and fails with
/// [`ClientError::CardinalityViolation`].
pub fn at_most_one<T>(query: &str, per_shard: Vec<Vec<T>>) -> ClientResult<Option<T>> {
    let count: usize = per_shard.iter().map(Vec::len).sum();
    if count > 1 {
        return Err(ClientError::CardinalityViolation {
            query: query.to_string(),
            count,
        });
    }
    Ok(per_shard.into_iter().flatten().next())
}
