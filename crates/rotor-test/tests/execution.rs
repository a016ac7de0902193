//! End-to-end execution tests against the in-memory driver.
//!
//! These cover shard selection, concurrent dispatch, error propagation and
//! binder lifecycle.

use std::error::Error as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rotor_client::{
    ClientError, ClientResult, ExecutionOptions, FanOutExecutor, FirstPresentMode, RawRows,
    RotationInfoProvider, RowMapper, ShardRange, ShardedQuery, WorkerPool,
};
use rotor_common::config::{EngineConfig, ExecutorConfig};
use rotor_common::types::{ConsistencyLevel, RotationState, ShardId};
use rotor_common::RotationConfig;
use rotor_test::{
    executor, init_tracing, insert_statements, select_statements, static_rotation, Event,
    EventMapper, MemoryDriver,
};
use tokio::time::Instant;

const HOUR: Duration = Duration::from_secs(3600);
const SELECT: &str = "SELECT key, payload FROM events WHERE key = ?";

/// Rotation provider whose clock is always unavailable.
struct BrokenClock;

impl RotationInfoProvider for BrokenClock {
    fn num_shards(&self) -> usize {
        1
    }

    fn rotation_state_at(&self, _now: SystemTime) -> ClientResult<RotationState> {
        Err(ClientError::Configuration("clock unavailable".to_string()))
    }
}

/// Event mapper recording the name of every thread it decodes on.
#[derive(Clone, Default)]
struct ThreadRecordingMapper {
    threads: Arc<Mutex<Vec<String>>>,
}

impl RowMapper for ThreadRecordingMapper {
    type Item = Event;

    fn decode_many(&self, rows: RawRows) -> ClientResult<Vec<Event>> {
        let name = std::thread::current().name().unwrap_or("<unnamed>").to_string();
        self.threads.lock().push(name);
        EventMapper.decode_many(rows)
    }
}

fn three_shard_query(
    driver: &MemoryDriver,
    options: ExecutionOptions,
) -> Arc<ShardedQuery<EventMapper>> {
    ShardedQuery::builder(SELECT, EventMapper, executor(driver))
        .slots(["key"])
        .statements(select_statements("events", 3))
        .rotation(RotationConfig::new(3, HOUR))
        .rotation_provider(static_rotation(3, 2, Duration::from_secs(60), HOUR))
        .options(options)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_single_shard_sync_execute_never_reads_rotation() {
    init_tracing();
    let driver = MemoryDriver::new(1);
    driver.insert(0, Event::new("k", "v"));
    let query = ShardedQuery::builder(SELECT, EventMapper, executor(&driver))
        .slots(["key"])
        .statements(select_statements("events", 1))
        .rotation_provider(Arc::new(BrokenClock))
        .build()
        .unwrap();

    let mut binder = query.binder();
    binder.bind(0, "k").unwrap();
    let rows = binder.execute().unwrap();
    assert_eq!(rows.row_count(), 1);
    assert_eq!(driver.dispatched_shards(), vec![0]);

    // Mapped reads take the same fast path.
    let events = query.binder().execute_async_and_map().await.unwrap();
    assert_eq!(events, vec![Event::new("k", "v")]);
}

#[tokio::test]
async fn test_multi_shard_sync_execute_is_unsupported() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    let query = three_shard_query(&driver, ExecutionOptions::new());

    let err = query.binder().execute().unwrap_err();
    assert!(matches!(err, ClientError::Unsupported(_)));
    assert!(driver.dispatched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_latency_bounded_by_slowest_shard() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    driver.set_latency(0, Duration::from_millis(100));
    driver.set_latency(1, Duration::from_millis(300));
    driver.set_latency(2, Duration::from_millis(200));
    let query = three_shard_query(&driver, ExecutionOptions::new().range(ShardRange::Fixed(3)));

    let start = Instant::now();
    let pending = query.binder().execute_async_and_map();
    // Every request is issued before the caller awaits anything.
    assert_eq!(driver.dispatched_shards(), vec![2, 1, 0]);
    pending.await.unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    assert_eq!(driver.peak_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_first_present_is_serial() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    for shard in 0..3 {
        driver.set_latency(shard, Duration::from_millis(100));
    }
    let options = ExecutionOptions::new()
        .range(ShardRange::Fixed(3))
        .first_present(FirstPresentMode::Sequential);
    let query = three_shard_query(&driver, options);

    let start = Instant::now();
    let found = query.binder().execute_async_and_map_one().await.unwrap();
    assert!(found.is_none());
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(driver.peak_in_flight(), 1);
}

#[tokio::test]
async fn test_backend_failure_is_passed_through() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    driver.insert(2, Event::new("k", "v"));
    driver.fail_shard(1, "node down");
    let query = three_shard_query(&driver, ExecutionOptions::new());

    let mut binder = query.binder();
    binder.bind(0, "k").unwrap();
    let err = binder.execute_async_and_map().await.unwrap_err();

    assert!(matches!(err, ClientError::Backend(_)));
    assert_eq!(err.source().map(ToString::to_string), Some("node down".to_string()));
    // Never retried.
    assert_eq!(driver.dispatched_shards(), vec![2, 1]);
}

#[tokio::test]
async fn test_consistency_overrides_reach_every_shard() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    let query = three_shard_query(&driver, ExecutionOptions::new().range(ShardRange::Fixed(3)));

    let mut binder = query.binder();
    binder
        .bind(0, "k")
        .unwrap()
        .with_consistency(ConsistencyLevel::LocalQuorum)
        .unwrap()
        .with_serial_consistency(ConsistencyLevel::Serial)
        .unwrap();
    binder.execute_async_and_map().await.unwrap();

    let sent = driver.dispatched();
    assert_eq!(sent.len(), 3);
    for statement in sent {
        assert_eq!(statement.consistency, Some(ConsistencyLevel::LocalQuorum));
        assert_eq!(statement.serial_consistency, Some(ConsistencyLevel::Serial));
        assert_eq!(&*statement.query, format!("SELECT key, payload FROM events_{} WHERE key = ?", statement.shard));
    }

    // Without overrides the session default applies.
    let driver = MemoryDriver::new(3);
    let query = three_shard_query(&driver, ExecutionOptions::new());
    query.binder().execute_async_and_map().await.unwrap();
    assert!(driver.dispatched().iter().all(|s| s.consistency.is_none()));
}

#[tokio::test]
async fn test_upsert_writes_current_shard_only() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    let executor = executor(&driver);
    let rotation = static_rotation(3, 1, Duration::from_secs(60), HOUR);
    let insert = ShardedQuery::builder(
        "INSERT INTO events (key, payload) VALUES (?, ?)",
        EventMapper,
        Arc::clone(&executor),
    )
    .slots(["key", "payload"])
    .statements(insert_statements("events", 3))
    .rotation(RotationConfig::new(3, HOUR))
    .rotation_provider(rotation.clone())
    .upsert(true)
    .build()
    .unwrap();

    let mut binder = insert.binder();
    binder.bind_named("key", "k").unwrap().bind_named("payload", "v").unwrap();
    binder.execute().unwrap();

    assert_eq!(driver.dispatched_shards(), vec![1]);
    assert_eq!(driver.rows(1), vec![Event::new("k", "v")]);
    assert!(driver.rows(0).is_empty());
    assert!(driver.rows(2).is_empty());

    let select = ShardedQuery::builder(SELECT, EventMapper, executor)
        .slots(["key"])
        .statements(select_statements("events", 3))
        .rotation(RotationConfig::new(3, HOUR))
        .rotation_provider(rotation)
        .build()
        .unwrap();
    let mut binder = select.binder();
    binder.bind(0, "k").unwrap();
    assert_eq!(
        binder.execute_async_and_map_one().await.unwrap(),
        Some(Event::new("k", "v"))
    );
}

#[tokio::test]
async fn test_pinned_shard_reads_one_table() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    driver.insert(0, Event::new("k", "archived"));
    driver.insert(2, Event::new("k", "live"));
    let query = three_shard_query(&driver, ExecutionOptions::new());

    let mut binder = query.binder();
    binder.bind(0, "k").unwrap().pin_shard(ShardId::new(0)).unwrap();
    let events = binder.execute_async_and_map().await.unwrap();
    assert_eq!(events, vec![Event::new("k", "archived")]);
    assert_eq!(driver.dispatched_shards(), vec![0]);

    // A definition-level pin applies to every binder.
    let driver = MemoryDriver::new(3);
    driver.insert(0, Event::new("k", "archived"));
    let query = three_shard_query(&driver, ExecutionOptions::new().pinned_shard(ShardId::new(0)));
    let mut binder = query.binder();
    binder.bind(0, "k").unwrap();
    assert_eq!(binder.execute().unwrap().row_count(), 1);
}

#[tokio::test]
async fn test_binder_is_single_use() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    let query = three_shard_query(&driver, ExecutionOptions::new());

    let mut binder = query.binder();
    binder.bind(0, "k").unwrap();
    let pending = binder.execute_async_and_map();
    assert!(binder.is_executed());

    let err = binder.bind(0, "other").unwrap_err();
    assert!(matches!(err, ClientError::AlreadyExecuted));
    assert!(pending.await.unwrap().is_empty());
    assert_eq!(driver.dispatched()[0].values, binder.param_values());
}

#[test]
fn test_dedicated_pool_from_config_blocking_wait() {
    init_tracing();
    let config: EngineConfig = serde_json::from_str(
        r#"{
            "rotation": { "num_shards": 3, "rotation_period": "1h", "query_range": 3 },
            "executor": { "worker_threads": 2, "thread_name": "rotor-decode" }
        }"#,
    )
    .unwrap();
    config.validate().unwrap();

    let driver = MemoryDriver::new(3);
    for shard in 0..3 {
        driver.insert(shard, Event::new("k", format!("v{shard}")));
    }
    let pool = WorkerPool::new(&config.executor).unwrap();
    let executor = Arc::new(FanOutExecutor::new(driver.session(), pool));
    let query = ShardedQuery::builder(SELECT, EventMapper, Arc::clone(&executor))
        .slots(["key"])
        .statements(select_statements("events", 3))
        .rotation(config.rotation.clone())
        .options(ExecutionOptions::new().range(ShardRange::FromRotationConfig))
        .build()
        .unwrap();

    let mut binder = query.binder();
    binder.bind(0, "k").unwrap();
    let mut events = binder.execute_async_and_map().wait().unwrap();
    events.sort();
    assert_eq!(
        events,
        vec![Event::new("k", "v0"), Event::new("k", "v1"), Event::new("k", "v2")]
    );

    let stats = executor.stats();
    assert_eq!(stats.fan_out_executions, 1);
    assert_eq!(stats.shard_requests, 3);
    assert_eq!(stats.backend_failures, 0);
    assert!(executor.pool().is_dedicated());
    assert_eq!(executor.pool().name(), "rotor-decode");
}

#[test]
fn test_decoding_runs_on_worker_threads() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    for shard in 0..3 {
        driver.insert(shard, Event::new("k", format!("v{shard}")));
    }
    let pool = WorkerPool::new(&ExecutorConfig::default().worker_threads(2).thread_name("rotor-map"))
        .unwrap();
    let executor = Arc::new(FanOutExecutor::new(driver.session(), pool));
    let mapper = ThreadRecordingMapper::default();
    let threads = Arc::clone(&mapper.threads);
    let query = ShardedQuery::builder(SELECT, mapper, executor)
        .slots(["key"])
        .statements(select_statements("events", 3))
        .rotation(RotationConfig::new(3, HOUR))
        .rotation_provider(static_rotation(3, 2, Duration::from_secs(60), HOUR))
        .options(
            ExecutionOptions::new()
                .range(ShardRange::Fixed(3))
                .first_present(FirstPresentMode::Parallel),
        )
        .build()
        .unwrap();

    let mut binder = query.binder();
    binder.bind(0, "k").unwrap();
    assert_eq!(binder.execute_async_and_map().wait().unwrap().len(), 3);
    let mut binder = query.binder();
    binder.bind(0, "k").unwrap();
    assert!(binder.execute_async_and_map_one().wait().unwrap().is_some());

    let caller = std::thread::current().name().map(str::to_string);
    let threads = threads.lock().clone();
    assert!(threads.len() >= 4, "{threads:?}");
    for name in &threads {
        assert!(name.starts_with("rotor-map-"), "decoded on {name}");
        assert_ne!(Some(name), caller.as_ref());
    }
}

#[test]
fn test_pending_result_outlives_dropped_query() {
    init_tracing();
    let driver = MemoryDriver::new(3);
    for shard in 0..3 {
        driver.insert(shard, Event::new("k", format!("v{shard}")));
        driver.set_latency(shard, Duration::from_millis(50));
    }

    let pending = {
        let pool = WorkerPool::new(&ExecutorConfig::default().worker_threads(1)).unwrap();
        let executor = Arc::new(FanOutExecutor::new(driver.session(), pool));
        let query = ShardedQuery::builder(SELECT, EventMapper, executor)
            .slots(["key"])
            .statements(select_statements("events", 3))
            .rotation(RotationConfig::new(3, HOUR))
            .rotation_provider(static_rotation(3, 0, Duration::from_secs(60), HOUR))
            .options(ExecutionOptions::new().range(ShardRange::Fixed(3)))
            .build()
            .unwrap();
        let mut binder = query.binder();
        binder.bind(0, "k").unwrap();
        binder.execute_async_and_map()
    };

    let events = pending.wait().unwrap();
    assert_eq!(
        events,
        vec![Event::new("k", "v0"), Event::new("k", "v2"), Event::new("k", "v1")]
    );
}
