//! Execution-handle collaborator: runs parameterized SQL on some connection.
//!
//! The engine never touches a driver directly; all blocking I/O happens
//! behind this trait. Transaction boundaries are the caller's concern.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;

/// One result row, column name to value.
pub type Row = serde_json::Map<String, Value>;

/// Per-row affected-count sentinel meaning "driver could not tell".
pub const UNKNOWN_ROW_COUNT: i64 = -1;

#[async_trait]
pub trait DbHandle: Send + Sync {
    /// Execute one DML statement; returns affected rows.
    async fn execute_one(&self, sql: &str, values: &[Value]) -> Result<i64, EngineError>;

    /// Execute the same statement once per value row; returns per-row affected
    /// counts, with [`UNKNOWN_ROW_COUNT`] where the driver cannot tell.
    async fn execute_batch(
        &self,
        sql: &str,
        value_rows: &[Vec<Value>],
    ) -> Result<Vec<i64>, EngineError>;

    /// Single-row insert that also retrieves generated key values for the
    /// named key columns.
    async fn insert_with_keys(
        &self,
        sql: &str,
        values: &[Value],
        key_columns: &[String],
    ) -> Result<(i64, Vec<Value>), EngineError>;

    /// Run a select and return all rows.
    async fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError>;

    /// True when the select returns at least one row.
    async fn exists(&self, sql: &str, values: &[Value]) -> Result<bool, EngineError>;
}
