//! Parameter binding for one query invocation.
//!
//! A [`QueryBinder`] holds the positional values and per-call overrides of a
//! single logical invocation. Bindings are frozen once the first execution
//! starts. Two binders are never equal unless they are the same invocation,
//! whatever values they hold.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rotor_common::types::{ConsistencyLevel, ShardId, Value};

use crate::driver::{BoundStatement, RawRows, RowMapper};
use crate::error::{ClientError, ClientResult};
use crate::executor::PendingResult;
use crate::query::{check_shard, ShardedQuery};

static INVOCATION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Bindings and overrides of one query invocation.
pub struct QueryBinder<M: RowMapper> {
    /// Unique invocation id.
    id: u64,
    /// Query definition.
    query: Arc<ShardedQuery<M>>,
    /// Bound values, aligned with the query's slots.
    values: Vec<Value>,
    /// Consistency override.
    consistency: Option<ConsistencyLevel>,
    /// Serial consistency override.
    serial_consistency: Option<ConsistencyLevel>,
    /// Explicit single-shard target.
    pinned_shard: Option<ShardId>,
    /// Set by the first execution call.
    executed: AtomicBool,
}

impl<M: RowMapper> QueryBinder<M> {
    pub(crate) fn new(query: Arc<ShardedQuery<M>>) -> Self {
        let values = vec![Value::Null; query.slots().len()];
        let pinned_shard = query.options().pinned_shard;
        Self {
            id: INVOCATION_SEQ.fetch_add(1, Ordering::Relaxed),
            query,
            values,
            consistency: None,
            serial_consistency: None,
            pinned_shard,
            executed: AtomicBool::new(false),
        }
    }

    /// Returns the invocation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the query definition.
    pub fn query(&self) -> &Arc<ShardedQuery<M>> {
        &self.query
    }

    /// Binds a value to a slot.
    pub fn bind(&mut self, slot: usize, value: impl Into<Value>) -> ClientResult<&mut Self> {
        self.ensure_mutable()?;
        let len = self.values.len();
        let target = self.values.get_mut(slot).ok_or_else(|| {
            ClientError::Configuration(format!("slot index {slot} out of range 0..{len}"))
        })?;
        *target = value.into();
        Ok(self)
    }

    /// Binds a value to a slot by name.
    pub fn bind_named(&mut self, name: &str, value: impl Into<Value>) -> ClientResult<&mut Self> {
        self.ensure_mutable()?;
        let slot = self
            .query
            .slot_index(name)
            .ok_or_else(|| ClientError::Configuration(format!("unknown parameter {name}")))?;
        self.bind(slot, value)
    }

    /// Overrides the consistency level.
    pub fn with_consistency(&mut self, level: ConsistencyLevel) -> ClientResult<&mut Self> {
        self.ensure_mutable()?;
        self.consistency = Some(level);
        Ok(self)
    }

    /// Overrides the serial consistency level. Only serial levels are valid.
    pub fn with_serial_consistency(&mut self, level: ConsistencyLevel) -> ClientResult<&mut Self> {
        self.ensure_mutable()?;
        if !level.is_serial() {
            return Err(ClientError::Configuration(format!(
                "{level} is not a serial consistency level"
            )));
        }
        self.serial_consistency = Some(level);
        Ok(self)
    }

    /// Targets a single shard, bypassing rotation resolution.
    pub fn pin_shard(&mut self, shard: ShardId) -> ClientResult<&mut Self> {
        self.ensure_mutable()?;
        check_shard(shard, self.query.num_shards())?;
        self.pinned_shard = Some(shard);
        Ok(self)
    }

    /// Returns a copy of the bound values.
    pub fn param_values(&self) -> Vec<Value> {
        self.values.clone()
    }

    /// Returns the consistency override.
    pub fn consistency(&self) -> Option<ConsistencyLevel> {
        self.consistency
    }

    /// Returns the serial consistency override.
    pub fn serial_consistency(&self) -> Option<ConsistencyLevel> {
        self.serial_consistency
    }

    /// Returns the pinned shard.
    pub fn pinned_shard(&self) -> Option<ShardId> {
        self.pinned_shard
    }

    /// Returns true once an execution call has been made.
    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    /// Builds the statement for `shard` with every value and override applied.
    pub fn materialize(&self, shard: ShardId) -> ClientResult<BoundStatement> {
        let statements = self.query.statements();
        let index = shard
            .table_index()
            .filter(|&i| i < statements.len())
            .ok_or_else(|| {
                ClientError::Configuration(format!(
                    "no prepared statement for shard {shard} (have {})",
                    statements.len()
                ))
            })?;
        let statement = statements
            .statement(index)
            .ok_or_else(|| ClientError::Configuration(format!("missing statement {index}")))?;

        let mut bound = statement.bind(ShardId::from_index(index), self.values.clone())?;
        if let Some(level) = self.consistency {
            bound.set_consistency(level);
        }
        if let Some(level) = self.serial_consistency {
            bound.set_serial_consistency(level);
        }
        Ok(bound)
    }

    /// Builds the statement for the pinned shard, or for the single table of
    /// a non-rotating family.
    pub fn bound_statement(&self) -> ClientResult<BoundStatement> {
        self.materialize(self.pinned_shard.unwrap_or(ShardId::NO_ROTATION))
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Executes against a single shard, blocking the calling thread.
    ///
    /// Fails with [`ClientError::Unsupported`] when the query would have to
    /// read several shards.
    pub fn execute(&self) -> ClientResult<RawRows> {
        self.freeze();
        self.query.executor().execute(self)
    }

    /// Executes against a single shard without blocking.
    pub fn execute_async(&self) -> PendingResult<RawRows> {
        self.freeze();
        self.query.executor().execute_async(self)
    }

    /// Reads every shard in range and returns all decoded rows.
    pub fn execute_async_and_map(&self) -> PendingResult<Vec<M::Item>> {
        self.freeze();
        self.query.executor().execute_async_and_map(self)
    }

    /// Returns the first decoded row in recency order.
    pub fn execute_async_and_map_one(&self) -> PendingResult<Option<M::Item>> {
        self.freeze();
        self.query.executor().execute_async_and_map_one(self)
    }

    /// Returns the only decoded row across shards; more than one is an error.
    pub fn execute_async_and_map_at_most_one(&self) -> PendingResult<Option<M::Item>> {
        self.freeze();
        self.query.executor().execute_async_and_map_at_most_one(self)
    }

    fn freeze(&self) {
        self.executed.store(true, Ordering::Release);
    }

    fn ensure_mutable(&self) -> ClientResult<()> {
        if self.is_executed() {
            return Err(ClientError::AlreadyExecuted);
        }
        Ok(())
    }
}

impl<M: RowMapper> PartialEq for QueryBinder<M> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<M: RowMapper> Eq for QueryBinder<M> {}

impl<M: RowMapper> Hash for QueryBinder<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<M: RowMapper> std::fmt::Debug for QueryBinder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBinder")
            .field("id", &self.id)
            .field("query", &self.query.query())
            .field("values", &self.values)
            .field("consistency", &self.consistency)
            .field("serial_consistency", &self.serial_consistency)
            .field("pinned_shard", &self.pinned_shard)
            .field("executed", &self.is_executed())
            .finish()
    }
}
