//! # rotor-test
//!
//! Test support and integration tests for rotor.
//!
//! This crate contains:
//! - An in-memory driver session holding one table per shard
//! - A row mapper for the test event table
//! - Fixtures for rotation state and prepared statement tables
//! - Integration tests under `tests/`

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rotor_client::{
    BackendError, BoundStatement, ClientError, ClientResult, DriverFuture, DriverSession,
    FanOutExecutor, PreparedStatement, RawRows, RowMapper, StaticRotation, WorkerPool,
};
use rotor_common::types::{RotationState, ShardId, Value};
use tokio::runtime::Handle;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Columns of the event table.
pub const EVENT_COLUMNS: [&str; 2] = ["key", "payload"];

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rotor_client=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A row of the event table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event {
    /// Partition key.
    pub key: String,
    /// Payload.
    pub payload: String,
}

impl Event {
    /// Creates an event.
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// Decodes event table rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventMapper;

impl RowMapper for EventMapper {
    type Item = Event;

    fn decode_many(&self, rows: RawRows) -> ClientResult<Vec<Event>> {
        let key = column(&rows, "key")?;
        let payload = column(&rows, "payload")?;
        rows.rows
            .iter()
            .map(|row| {
                let text = |index: usize| {
                    row.get(index)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| malformed(format!("column {index} is not text")))
                };
                Ok(Event {
                    key: text(key)?,
                    payload: text(payload)?,
                })
            })
            .collect()
    }
}

fn column(rows: &RawRows, name: &str) -> ClientResult<usize> {
    rows.column_index(name)
        .ok_or_else(|| malformed(format!("missing column {name}")))
}

fn malformed(message: String) -> ClientError {
    ClientError::Backend(message.into())
}

/// One table of the in-memory store.
#[derive(Debug, Default)]
struct Table {
    rows: Vec<Event>,
    latency: Duration,
    failure: Option<String>,
}

struct DriverInner {
    tables: RwLock<Vec<Table>>,
    dispatched: Mutex<Vec<BoundStatement>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// In-memory driver session with one event table per shard.
///
/// `INSERT` statements store `(key, payload)` in the addressed table; every
/// other statement reads it, filtered by the first bound value unless that
/// value is null. Requests are recorded when issued, not when completed.
#[derive(Clone)]
pub struct MemoryDriver {
    inner: Arc<DriverInner>,
}

impl MemoryDriver {
    /// Creates a driver with `num_shards` empty tables.
    pub fn new(num_shards: usize) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                tables: RwLock::new((0..num_shards).map(|_| Table::default()).collect()),
                dispatched: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns the driver as a session.
    pub fn session(&self) -> Arc<dyn DriverSession> {
        Arc::new(self.clone())
    }

    /// Stores an event in a shard's table.
    pub fn insert(&self, shard: usize, event: Event) {
        if let Some(table) = self.inner.tables.write().get_mut(shard) {
            table.rows.push(event);
        }
    }

    /// Delays every response of a shard.
    pub fn set_latency(&self, shard: usize, latency: Duration) {
        if let Some(table) = self.inner.tables.write().get_mut(shard) {
            table.latency = latency;
        }
    }

    /// Makes every request to a shard fail.
    pub fn fail_shard(&self, shard: usize, message: impl Into<String>) {
        if let Some(table) = self.inner.tables.write().get_mut(shard) {
            table.failure = Some(message.into());
        }
    }

    /// Returns the rows stored in a shard's table.
    pub fn rows(&self, shard: usize) -> Vec<Event> {
        self.inner
            .tables
            .read()
            .get(shard)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Returns every statement issued so far, in issue order.
    pub fn dispatched(&self) -> Vec<BoundStatement> {
        self.inner.dispatched.lock().clone()
    }

    /// Returns the shard of every statement issued so far.
    pub fn dispatched_shards(&self) -> Vec<i32> {
        self.inner
            .dispatched
            .lock()
            .iter()
            .map(|s| s.shard.as_i32())
            .collect()
    }

    /// Returns the largest number of requests observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Records a request and computes its answer from the current table.
    fn issue(&self, statement: BoundStatement) -> (Duration, Result<RawRows, BackendError>) {
        let index = statement.shard.table_index().unwrap_or(0);
        debug!("memory driver: {} on shard {}", statement.query, statement.shard);
        self.inner.dispatched.lock().push(statement.clone());

        let mut tables = self.inner.tables.write();
        let Some(table) = tables.get_mut(index) else {
            return (Duration::ZERO, Err(format!("no table for shard {}", statement.shard).into()));
        };
        if let Some(message) = &table.failure {
            return (table.latency, Err(message.clone().into()));
        }

        let answer = if statement.query.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            let text = |i: usize| {
                statement
                    .values
                    .get(i)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            table.rows.push(Event::new(text(0), text(1)));
            RawRows::empty()
        } else {
            let key = statement.values.first().filter(|v| !v.is_null());
            let rows = table
                .rows
                .iter()
                .filter(|e| key.map_or(true, |k| k.as_str() == Some(e.key.as_str())))
                .map(|e| vec![Value::from(e.key.as_str()), Value::from(e.payload.as_str())])
                .collect();
            RawRows::new(EVENT_COLUMNS.iter().map(|c| c.to_string()).collect(), rows)
        };
        (table.latency, Ok(answer))
    }
}

impl DriverSession for MemoryDriver {
    fn execute(&self, statement: BoundStatement) -> Result<RawRows, BackendError> {
        let (latency, answer) = self.issue(statement);
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        answer
    }

    fn execute_async(&self, statement: BoundStatement) -> DriverFuture {
        let (latency, answer) = self.issue(statement);
        let inner = Arc::clone(&self.inner);
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            answer
        }
        .boxed()
    }
}

/// Prepared `SELECT key, payload ... WHERE key = ?` statements, one per shard.
pub fn select_statements(table: &str, num_shards: usize) -> Vec<PreparedStatement> {
    (0..num_shards)
        .map(|i| PreparedStatement::new(format!("SELECT key, payload FROM {table}_{i} WHERE key = ?"), 1))
        .collect()
}

/// Prepared `INSERT (key, payload)` statements, one per shard.
pub fn insert_statements(table: &str, num_shards: usize) -> Vec<PreparedStatement> {
    (0..num_shards)
        .map(|i| {
            PreparedStatement::new(format!("INSERT INTO {table}_{i} (key, payload) VALUES (?, ?)"), 2)
        })
        .collect()
}

/// Rotation provider frozen at the given state.
pub fn static_rotation(
    num_shards: usize,
    current: i32,
    elapsed: Duration,
    rotation_period: Duration,
) -> Arc<StaticRotation> {
    let state = RotationState::new(num_shards, ShardId::new(current), elapsed, rotation_period)
        .unwrap_or_else(|e| panic!("invalid test rotation: {e}"));
    Arc::new(StaticRotation::new(state))
}

/// Executor over `driver` that runs its workers on the current runtime.
pub fn executor(driver: &MemoryDriver) -> Arc<FanOutExecutor> {
    Arc::new(FanOutExecutor::new(
        driver.session(),
        WorkerPool::from_handle(Handle::current()),
    ))
}
