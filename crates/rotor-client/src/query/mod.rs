//! Query definitions.
//!
//! A [`ShardedQuery`] is built once per statement of a table family and
//! hands out a fresh single-use [`QueryBinder`] for every invocation.

use std::sync::Arc;

use rotor_common::config::RotationConfig;
use rotor_common::types::{RotationState, ShardId};

use crate::binder::QueryBinder;
use crate::driver::{PreparedStatementProvider, RowMapper};
use crate::error::{ClientError, ClientResult};
use crate::executor::FanOutExecutor;
use crate::merge::FirstPresentMode;
use crate::resolver::{RangePolicy, ShardRange, ShardResolver};
use crate::rotation::{RotationInfoProvider, WallClockRotation};

/// Per-query execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionOptions {
    /// Base shard range for multi-shard reads.
    pub range: ShardRange,
    /// Drop the oldest shard once the current one outlived the expiration period.
    pub use_expiration_shrink: bool,
    /// How first-present reads walk the shards.
    pub first_present: FirstPresentMode,
    /// Shard every invocation targets unless the binder overrides it.
    pub pinned_shard: Option<ShardId>,
}

impl ExecutionOptions {
    /// Creates default options: optimal range, no shrink, sequential
    /// first-present, no pinned shard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base range.
    #[must_use]
    pub fn range(mut self, range: ShardRange) -> Self {
        self.range = range;
        self
    }

    /// Enables or disables expiration shrink.
    #[must_use]
    pub fn expiration_shrink(mut self, enabled: bool) -> Self {
        self.use_expiration_shrink = enabled;
        self
    }

    /// Sets the first-present mode.
    #[must_use]
    pub fn first_present(mut self, mode: FirstPresentMode) -> Self {
        self.first_present = mode;
        self
    }

    /// Pins every invocation to one shard.
    #[must_use]
    pub fn pinned_shard(mut self, shard: ShardId) -> Self {
        self.pinned_shard = Some(shard);
        self
    }
}

/// A statement against a rotated table family, ready to be bound.
pub struct ShardedQuery<M: RowMapper> {
    query: Arc<str>,
    slots: Vec<String>,
    statements: Arc<dyn PreparedStatementProvider>,
    upsert: bool,
    mapper: Arc<M>,
    rotation: Arc<dyn RotationInfoProvider>,
    num_shards: usize,
    resolver: ShardResolver,
    policy: RangePolicy,
    options: ExecutionOptions,
    executor: Arc<FanOutExecutor>,
}

impl<M: RowMapper> ShardedQuery<M> {
    /// Starts building a query definition.
    pub fn builder(
        query: impl Into<Arc<str>>,
        mapper: M,
        executor: Arc<FanOutExecutor>,
    ) -> ShardedQueryBuilder<M> {
        ShardedQueryBuilder {
            query: query.into(),
            slots: Vec::new(),
            statements: None,
            upsert: false,
            mapper,
            rotation_config: RotationConfig::default(),
            rotation: None,
            options: ExecutionOptions::default(),
            executor,
        }
    }

    /// Creates a binder for one invocation.
    pub fn binder(self: &Arc<Self>) -> QueryBinder<M> {
        QueryBinder::new(Arc::clone(self))
    }

    /// Returns the query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns the parameter slot names.
    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    /// Returns the slot index of a parameter name.
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s == name)
    }

    /// Returns true for write statements.
    pub fn is_upsert(&self) -> bool {
        self.upsert
    }

    /// Returns the number of shards in the rotation.
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Returns the execution options.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Returns the range policy.
    pub fn range_policy(&self) -> &RangePolicy {
        &self.policy
    }

    pub(crate) fn statements(&self) -> &dyn PreparedStatementProvider {
        self.statements.as_ref()
    }

    pub(crate) fn mapper(&self) -> &Arc<M> {
        &self.mapper
    }

    pub(crate) fn executor(&self) -> &FanOutExecutor {
        &self.executor
    }

    /// Computes the rotation state from the wall clock.
    pub fn rotation_state(&self) -> ClientResult<RotationState> {
        self.rotation.rotation_state()
    }

    /// Resolves the multi-shard execution plan for the current time.
    pub fn execution_plan(&self) -> ClientResult<Vec<ShardId>> {
        let state = self.rotation_state()?;
        self.resolver.resolve_shard_set(&state, &self.policy)
    }
}

impl<M: RowMapper> std::fmt::Debug for ShardedQuery<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedQuery")
            .field("query", &self.query)
            .field("slots", &self.slots)
            .field("upsert", &self.upsert)
            .field("num_shards", &self.num_shards)
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for [`ShardedQuery`].
pub struct ShardedQueryBuilder<M: RowMapper> {
    query: Arc<str>,
    slots: Vec<String>,
    statements: Option<Arc<dyn PreparedStatementProvider>>,
    upsert: bool,
    mapper: M,
    rotation_config: RotationConfig,
    rotation: Option<Arc<dyn RotationInfoProvider>>,
    options: ExecutionOptions,
    executor: Arc<FanOutExecutor>,
}

impl<M: RowMapper> ShardedQueryBuilder<M> {
    /// Sets the named parameter slots, in positional order.
    #[must_use]
    pub fn slots<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.slots = slots.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the prepared statement table.
    #[must_use]
    pub fn statements(mut self, statements: impl PreparedStatementProvider) -> Self {
        self.statements = Some(Arc::new(statements));
        self
    }

    /// Marks the statement as a write against the current shard.
    #[must_use]
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Sets the rotation configuration of the table family.
    #[must_use]
    pub fn rotation(mut self, config: RotationConfig) -> Self {
        self.rotation_config = config;
        self
    }

    /// Replaces the wall-clock rotation provider.
    #[must_use]
    pub fn rotation_provider(mut self, provider: Arc<dyn RotationInfoProvider>) -> Self {
        self.rotation = Some(provider);
        self
    }

    /// Sets the execution options.
    #[must_use]
    pub fn options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the definition.
    pub fn build(self) -> ClientResult<Arc<ShardedQuery<M>>> {
        let config = self.rotation_config;
        config.validate().map_err(ClientError::Configuration)?;

        let rotation: Arc<dyn RotationInfoProvider> = match self.rotation {
            Some(provider) => provider,
            None => Arc::new(WallClockRotation::new(config.clone())?),
        };
        let num_shards = config.num_shards;
        if rotation.num_shards() != num_shards {
            return Err(ClientError::Configuration(format!(
                "rotation provider reports {} shards, configuration has {}",
                rotation.num_shards(),
                num_shards
            )));
        }

        let statements = self
            .statements
            .ok_or_else(|| ClientError::config("no prepared statements"))?;
        if statements.len() != num_shards {
            return Err(ClientError::Configuration(format!(
                "expected {} prepared statements, got {}",
                num_shards,
                statements.len()
            )));
        }
        for index in 0..num_shards {
            let expected = statements.statement(index).map(|s| s.param_count());
            if expected != Some(self.slots.len()) {
                return Err(ClientError::Configuration(format!(
                    "statement {} does not take {} parameters",
                    index,
                    self.slots.len()
                )));
            }
        }

        if let Some(shard) = self.options.pinned_shard {
            check_shard(shard, num_shards)?;
        }

        let policy =
            RangePolicy::from_config(self.options.range, self.options.use_expiration_shrink, &config);
        if num_shards > 1 && !self.upsert && self.options.pinned_shard.is_none() {
            policy.validate()?;
        }

        Ok(Arc::new(ShardedQuery {
            query: self.query,
            slots: self.slots,
            statements,
            upsert: self.upsert,
            mapper: Arc::new(self.mapper),
            rotation,
            num_shards,
            resolver: ShardResolver::new(config.clock_skew_margin),
            policy,
            options: self.options,
            executor: self.executor,
        }))
    }
}

/// Checks that `shard` addresses a table of a rotation with `num_shards` shards.
pub(crate) fn check_shard(shard: ShardId, num_shards: usize) -> ClientResult<()> {
    match shard.table_index() {
        Some(index) if index < num_shards => Ok(()),
        _ => Err(ClientError::Configuration(format!(
            "shard {shard} out of range 0..{num_shards}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rotor_common::types::Value;
    use tokio::runtime::Handle;

    use super::*;
    use crate::driver::{
        BoundStatement, DriverFuture, DriverSession, PreparedStatement, RawRows,
    };
    use crate::error::BackendError;
    use crate::executor::WorkerPool;
    use crate::rotation::StaticRotation;

    struct NoopSession;

    impl DriverSession for NoopSession {
        fn execute(&self, _statement: BoundStatement) -> Result<RawRows, BackendError> {
            Ok(RawRows::empty())
        }

        fn execute_async(&self, _statement: BoundStatement) -> DriverFuture {
            Box::pin(async { Ok(RawRows::empty()) })
        }
    }

    struct Texts;

    impl RowMapper for Texts {
        type Item = String;

        fn decode_many(&self, rows: RawRows) -> ClientResult<Vec<String>> {
            Ok(rows
                .rows
                .iter()
                .filter_map(|r| r.first().and_then(Value::as_str).map(str::to_string))
                .collect())
        }
    }

    fn executor() -> Arc<FanOutExecutor> {
        Arc::new(FanOutExecutor::new(
            Arc::new(NoopSession),
            WorkerPool::from_handle(Handle::current()),
        ))
    }

    fn statements(n: usize, params: usize) -> Vec<PreparedStatement> {
        (0..n)
            .map(|i| PreparedStatement::new(format!("SELECT v FROM t_{i} WHERE k = ?"), params))
            .collect()
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_build_valid_query() {
        let query = ShardedQuery::builder("SELECT v FROM t WHERE k = ?", Texts, executor())
            .slots(["k"])
            .statements(statements(3, 1))
            .rotation(RotationConfig::new(3, HOUR))
            .build()
            .unwrap();
        assert_eq!(query.num_shards(), 3);
        assert_eq!(query.slot_index("k"), Some(0));
        assert_eq!(query.slot_index("x"), None);
        assert!(!query.is_upsert());
        assert_eq!(query.range_policy().range, ShardRange::Optimal);
        assert_eq!(query.execution_plan().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_statement_count_must_match_rotation() {
        let err = ShardedQuery::builder("q", Texts, executor())
            .slots(["k"])
            .statements(statements(2, 1))
            .rotation(RotationConfig::new(3, HOUR))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_param_count_must_match_slots() {
        let err = ShardedQuery::builder("q", Texts, executor())
            .slots(["k", "v"])
            .statements(statements(1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_statements() {
        let err = ShardedQuery::builder("q", Texts, executor()).build().unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_provider_must_match_config() {
        let state = RotationState::new(2, ShardId::FIRST, Duration::ZERO, HOUR).unwrap();
        let err = ShardedQuery::builder("q", Texts, executor())
            .statements(statements(3, 0))
            .rotation(RotationConfig::new(3, HOUR))
            .rotation_provider(Arc::new(StaticRotation::new(state)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_pinned_shard_out_of_range() {
        let err = ShardedQuery::builder("q", Texts, executor())
            .statements(statements(3, 0))
            .rotation(RotationConfig::new(3, HOUR))
            .options(ExecutionOptions::new().pinned_shard(ShardId::new(3)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_invalid_range_policy_rejected_for_reads() {
        let build = |upsert| {
            ShardedQuery::builder("q", Texts, executor())
                .statements(statements(3, 0))
                .rotation(RotationConfig::new(3, HOUR))
                .upsert(upsert)
                .options(ExecutionOptions::new().range(ShardRange::FromRotationConfig))
                .build()
        };
        assert!(build(false).is_err());
        // Writes never fan out, so the read range is irrelevant.
        assert!(build(true).is_ok());
    }
}
