//! Shard selection, dispatch and merging.
//!
//! The [`FanOutExecutor`] decides whether an invocation targets a single
//! shard or fans out over the resolved execution plan. Fan-out requests are
//! all issued on the caller's thread, in plan order, before anything is
//! awaited; awaiting, decoding and merging then run on the [`WorkerPool`].

mod pool;

pub use pool::{PendingResult, WorkerPool};

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use rotor_common::types::ShardId;
use tracing::{debug, warn};

use crate::binder::QueryBinder;
use crate::driver::{BoundStatement, DriverFuture, DriverSession, RawRows, RowMapper};
use crate::error::{ClientError, ClientResult};
use crate::merge::{self, FirstPresentMode};

/// Statistics about executor usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Invocations served by one shard.
    pub single_shard_executions: u64,
    /// Invocations fanned out over a resolved plan.
    pub fan_out_executions: u64,
    /// Requests handed to the driver.
    pub shard_requests: u64,
    /// At-most-one reads that found more than one row.
    pub cardinality_violations: u64,
    /// Requests that failed in the driver.
    pub backend_failures: u64,
}

/// Statements an invocation will send.
enum Plan {
    /// The single-shard fast path.
    Single(BoundStatement),
    /// One statement per resolved shard, most recent first.
    FanOut(Vec<BoundStatement>),
}

impl Plan {
    fn into_statements(self) -> Vec<BoundStatement> {
        match self {
            Plan::Single(statement) => vec![statement],
            Plan::FanOut(statements) => statements,
        }
    }
}

/// Executes bound queries against a driver session.
pub struct FanOutExecutor {
    /// Driver session.
    session: Arc<dyn DriverSession>,
    /// Pool running waits, decoding and merging.
    pool: WorkerPool,
    /// Statistics.
    stats: Arc<RwLock<ExecutorStats>>,
}

impl FanOutExecutor {
    /// Creates an executor.
    pub fn new(session: Arc<dyn DriverSession>, pool: WorkerPool) -> Self {
        Self {
            session,
            pool,
            stats: Arc::new(RwLock::new(ExecutorStats::default())),
        }
    }

    /// Creates an executor on the process-wide worker pool.
    pub fn with_shared_pool(session: Arc<dyn DriverSession>) -> ClientResult<Self> {
        Ok(Self::new(session, WorkerPool::shared()?))
    }

    /// Returns the worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Returns executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.read().clone()
    }

    // =========================================================================
    // Single shard
    // =========================================================================

    /// Executes on the calling thread. Only valid for single-shard invocations.
    pub fn execute<M: RowMapper>(&self, binder: &QueryBinder<M>) -> ClientResult<RawRows> {
        let statement = self
            .single_statement(binder)?
            .ok_or_else(|| unsupported(binder.query().query()))?;
        record_request(&self.stats);
        self.session
            .execute(statement)
            .map_err(|e| backend_failure(&self.stats, e))
    }

    /// Dispatches a single-shard invocation and returns without waiting.
    pub fn execute_async<M: RowMapper>(&self, binder: &QueryBinder<M>) -> PendingResult<RawRows> {
        let statement = match self.single_statement(binder) {
            Ok(Some(statement)) => statement,
            Ok(None) => return PendingResult::failed(unsupported(binder.query().query())),
            Err(e) => return PendingResult::failed(e),
        };
        let request = self.dispatch(statement);
        let stats = Arc::clone(&self.stats);
        self.pool
            .submit(async move { request.await.map_err(|e| backend_failure(&stats, e)) })
    }

    // =========================================================================
    // Mapped
    // =========================================================================

    /// Reads every planned shard and concatenates the decoded rows.
    pub fn execute_async_and_map<M: RowMapper>(
        &self,
        binder: &QueryBinder<M>,
    ) -> PendingResult<Vec<M::Item>> {
        let plan = match self.plan(binder) {
            Ok(plan) => plan,
            Err(e) => return PendingResult::failed(e),
        };
        self.dispatch_and_merge(binder, plan.into_statements(), |mapper, per_shard| {
            let decoded = per_shard
                .into_iter()
                .map(|rows| mapper.decode_many(rows))
                .collect::<ClientResult<Vec<_>>>()?;
            Ok(merge::collect_all(decoded))
        })
    }

    /// Returns the first decoded row in recency order.
    pub fn execute_async_and_map_one<M: RowMapper>(
        &self,
        binder: &QueryBinder<M>,
    ) -> PendingResult<Option<M::Item>> {
        let plan = match self.plan(binder) {
            Ok(plan) => plan,
            Err(e) => return PendingResult::failed(e),
        };
        match (plan, binder.query().options().first_present) {
            (Plan::Single(statement), _) => {
                self.dispatch_and_merge(binder, vec![statement], |mapper, per_shard| {
                    match per_shard.into_iter().next() {
                        Some(rows) => mapper.decode_optional(rows),
                        None => Ok(None),
                    }
                })
            }
            (Plan::FanOut(statements), FirstPresentMode::Parallel) => {
                self.dispatch_and_merge(binder, statements, |mapper, per_shard| {
                    merge::first_present(per_shard.into_iter().map(|rows| mapper.decode_many(rows)))
                })
            }
            (Plan::FanOut(statements), FirstPresentMode::Sequential) => {
                self.first_present_sequential(binder, statements)
            }
        }
    }

    /// Returns the only decoded row across the planned shards.
    ///
    /// Every shard is read and fully decoded; more than one row in total
    /// fails with [`ClientError::CardinalityViolation`].
    pub fn execute_async_and_map_at_most_one<M: RowMapper>(
        &self,
        binder: &QueryBinder<M>,
    ) -> PendingResult<Option<M::Item>> {
        let plan = match self.plan(binder) {
            Ok(plan) => plan,
            Err(e) => return PendingResult::failed(e),
        };
        let query = binder.query().query().to_string();
        let stats = Arc::clone(&self.stats);
        self.dispatch_and_merge(binder, plan.into_statements(), move |mapper, per_shard| {
            let decoded = per_shard
                .into_iter()
                .map(|rows| mapper.decode_many(rows))
                .collect::<ClientResult<Vec<_>>>()?;
            merge::at_most_one(&query, decoded).map_err(|e| {
                if let ClientError::CardinalityViolation { count, .. } = &e {
                    warn!("\"{}\" returned {} rows across shards, expected at most one", query, count);
                    stats.write().cardinality_violations += 1;
                }
                e
            })
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Applies the single-shard precedence: a non-rotating family, then a
    /// pinned shard, then the current shard for writes.
    fn single_shard<M: RowMapper>(&self, binder: &QueryBinder<M>) -> ClientResult<Option<ShardId>> {
        let query = binder.query();
        if query.num_shards() == 1 {
            return Ok(Some(ShardId::FIRST));
        }
        if let Some(shard) = binder.pinned_shard() {
            return Ok(Some(shard));
        }
        if query.is_upsert() {
            return Ok(Some(query.rotation_state()?.current_shard()));
        }
        Ok(None)
    }

    fn single_statement<M: RowMapper>(
        &self,
        binder: &QueryBinder<M>,
    ) -> ClientResult<Option<BoundStatement>> {
        let Some(shard) = self.single_shard(binder)? else {
            return Ok(None);
        };
        let statement = binder.materialize(shard)?;
        debug!("\"{}\" query from single shard {}", binder.query().query(), shard);
        self.stats.write().single_shard_executions += 1;
        Ok(Some(statement))
    }

    fn plan<M: RowMapper>(&self, binder: &QueryBinder<M>) -> ClientResult<Plan> {
        if let Some(statement) = self.single_statement(binder)? {
            return Ok(Plan::Single(statement));
        }
        let shards = binder.query().execution_plan()?;
        let statements = shards
            .iter()
            .map(|&shard| binder.materialize(shard))
            .collect::<ClientResult<Vec<_>>>()?;
        debug!(
            "\"{}\" fetch from shards {}",
            binder.query().query(),
            join_shards(&shards)
        );
        self.stats.write().fan_out_executions += 1;
        Ok(Plan::FanOut(statements))
    }

    fn dispatch(&self, statement: BoundStatement) -> DriverFuture {
        record_request(&self.stats);
        self.session.execute_async(statement)
    }

    /// Issues every statement, then waits for all of them on the pool and
    /// merges the raw rows in plan order.
    fn dispatch_and_merge<M, T, F>(
        &self,
        binder: &QueryBinder<M>,
        statements: Vec<BoundStatement>,
        merge: F,
    ) -> PendingResult<T>
    where
        M: RowMapper,
        T: Send + 'static,
        F: FnOnce(&M, Vec<RawRows>) -> ClientResult<T> + Send + 'static,
    {
        let requests: Vec<DriverFuture> = statements
            .into_iter()
            .map(|statement| self.dispatch(statement))
            .collect();
        let mapper = Arc::clone(binder.query().mapper());
        let stats = Arc::clone(&self.stats);
        self.pool.submit(async move {
            let per_shard = receive_all(requests, &stats).await?;
            merge(mapper.as_ref(), per_shard)
        })
    }

    /// Walks the plan one shard at a time, stopping at the first row.
    fn first_present_sequential<M: RowMapper>(
        &self,
        binder: &QueryBinder<M>,
        statements: Vec<BoundStatement>,
    ) -> PendingResult<Option<M::Item>> {
        let session = Arc::clone(&self.session);
        let mapper = Arc::clone(binder.query().mapper());
        let stats = Arc::clone(&self.stats);
        self.pool.submit(async move {
            for statement in statements {
                record_request(&stats);
                let rows = session
                    .execute_async(statement)
                    .await
                    .map_err(|e| backend_failure(&stats, e))?;
                if let Some(item) = mapper.decode_optional(rows)? {
                    return Ok(Some(item));
                }
            }
            Ok(None)
        })
    }
}

impl std::fmt::Debug for FanOutExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutExecutor")
            .field("pool", &self.pool)
            .field("stats", &*self.stats.read())
            .finish()
    }
}

/// Awaits every request and reports the first failure in plan order.
async fn receive_all(
    requests: Vec<DriverFuture>,
    stats: &RwLock<ExecutorStats>,
) -> ClientResult<Vec<RawRows>> {
    let results = join_all(requests).await;
    let failures = results.iter().filter(|r| r.is_err()).count() as u64;
    if failures > 0 {
        stats.write().backend_failures += failures;
    }
    results
        .into_iter()
        .map(|r| r.map_err(ClientError::Backend))
        .collect()
}

fn record_request(stats: &RwLock<ExecutorStats>) {
    stats.write().shard_requests += 1;
}

fn backend_failure(stats: &RwLock<ExecutorStats>, error: crate::error::BackendError) -> ClientError {
    stats.write().backend_failures += 1;
    ClientError::Backend(error)
}

fn unsupported(query: &str) -> ClientError {
    ClientError::Unsupported(format!(
        "\"{query}\" spans several shards and does not support merging results; \
         use execute_async_and_map*"
    ))
}

fn join_shards(shards: &[ShardId]) -> String {
    shards
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
