//! Seams to the external driver.
//!
//! The engine never talks to the wire itself. It materializes
//! [`BoundStatement`]s from a [`PreparedStatementProvider`], hands them to a
//! [`DriverSession`] and decodes the returned [`RawRows`] through a
//! [`RowMapper`].

use std::sync::Arc;

use futures::future::BoxFuture;
use rotor_common::types::{ConsistencyLevel, ShardId, Value};

use crate::error::{BackendError, ClientError, ClientResult};

/// Future returned by [`DriverSession::execute_async`].
pub type DriverFuture = BoxFuture<'static, Result<RawRows, BackendError>>;

/// Session to the wide-column store.
///
/// Failures are opaque to the engine and are never retried by it.
pub trait DriverSession: Send + Sync + 'static {
    /// Executes a statement, blocking the calling thread.
    fn execute(&self, statement: BoundStatement) -> Result<RawRows, BackendError>;

    /// Issues a statement and returns a future for its rows.
    ///
    /// Implementations should send the request before returning; the engine
    /// calls this for every shard of a plan before awaiting any of them.
    fn execute_async(&self, statement: BoundStatement) -> DriverFuture;
}

/// Decodes raw rows into domain objects.
pub trait RowMapper: Send + Sync + 'static {
    /// Decoded domain object.
    type Item: Send + 'static;

    /// Decodes every row.
    fn decode_many(&self, rows: RawRows) -> ClientResult<Vec<Self::Item>>;

    /// Decodes the first row, if any.
    fn decode_optional(&self, rows: RawRows) -> ClientResult<Option<Self::Item>> {
        Ok(self.decode_many(rows)?.into_iter().next())
    }
}

/// Raw rows returned by the driver for one shard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    /// Column names.
    pub columns: Vec<String>,
    /// Row data, aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl RawRows {
    /// Creates a result set.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Creates an empty result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the position of a column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Gets a value by row number and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }
}

/// A statement compiled against one shard's table.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Statement text as prepared for the shard.
    query: Arc<str>,
    /// Number of positional parameters.
    param_count: usize,
}

impl PreparedStatement {
    /// Creates a prepared statement.
    pub fn new(query: impl Into<Arc<str>>, param_count: usize) -> Self {
        Self {
            query: query.into(),
            param_count,
        }
    }

    /// Returns the statement text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns the expected parameter count.
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Binds values positionally for `shard`.
    pub fn bind(&self, shard: ShardId, values: Vec<Value>) -> ClientResult<BoundStatement> {
        if values.len() != self.param_count {
            return Err(ClientError::Configuration(format!(
                "expected {} parameters, got {}",
                self.param_count,
                values.len()
            )));
        }
        Ok(BoundStatement {
            shard,
            query: Arc::clone(&self.query),
            values,
            consistency: None,
            serial_consistency: None,
        })
    }
}

/// Indexed table of prepared statements, one per shard id.
///
/// A non-rotating table family has a single entry at index 0.
pub trait PreparedStatementProvider: Send + Sync + 'static {
    /// Number of statements.
    fn len(&self) -> usize;

    /// Returns the statement for a table index.
    fn statement(&self, index: usize) -> Option<&PreparedStatement>;

    /// Returns true if the table is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PreparedStatementProvider for Vec<PreparedStatement> {
    fn len(&self) -> usize {
        <[PreparedStatement]>::len(self)
    }

    fn statement(&self, index: usize) -> Option<&PreparedStatement> {
        self.get(index)
    }
}

/// A statement with every parameter bound, addressed to one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    /// Target shard.
    pub shard: ShardId,
    /// Statement text.
    pub query: Arc<str>,
    /// Positional values.
    pub values: Vec<Value>,
    /// Consistency override.
    pub consistency: Option<ConsistencyLevel>,
    /// Serial consistency override.
    pub serial_consistency: Option<ConsistencyLevel>,
}

impl BoundStatement {
    /// Sets the consistency level.
    pub fn set_consistency(&mut self, level: ConsistencyLevel) {
        self.consistency = Some(level);
    }

    /// Sets the serial consistency level.
    pub fn set_serial_consistency(&mut self, level: ConsistencyLevel) {
        self.serial_consistency = Some(level);
    }
}
