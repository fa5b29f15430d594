//! PostgreSQL execution handle over sqlx.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgRow, PgTypeInfo, Postgres};
use sqlx::{Database, PgPool, Row as _};

use crate::error::EngineError;
use crate::handle::{DbHandle, Row};

/// A value that can be bound to a PostgreSQL query. Converts from
/// serde_json::Value. Strings bind verbatim; the `$n::cast` suffixes in the
/// synthesized SQL take care of server-side typing.
#[derive(Clone, Debug)]
enum BindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl BindValue {
    fn from_json(v: &Value) -> BindValue {
        match v {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::I64(i)
                } else {
                    BindValue::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => BindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => BindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for BindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            BindValue::Null => <Option<i32> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            BindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            BindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            BindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            BindValue::String(s) => {
                let s_ref: &str = s.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s_ref, buf)?
            }
            BindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }
}

impl sqlx::Type<Postgres> for BindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

/// Execution handle backed by a connection pool. Statements run one at a
/// time on pool connections; transaction boundaries, when needed, belong to
/// the caller's layer.
pub struct PgHandle {
    pool: PgPool,
}

impl PgHandle {
    pub fn new(pool: PgPool) -> Self {
        PgHandle { pool }
    }

    fn bind_all<'q>(
        sql: &'q str,
        values: &[Value],
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        let mut query = sqlx::query(sql);
        for v in values {
            query = query.bind(BindValue::from_json(v));
        }
        query
    }
}

#[async_trait]
impl DbHandle for PgHandle {
    async fn execute_one(&self, sql: &str, values: &[Value]) -> Result<i64, EngineError> {
        tracing::debug!(sql = %sql, params = ?values, "execute");
        let result = Self::bind_all(sql, values).execute(&self.pool).await?;
        Ok(result.rows_affected() as i64)
    }

    async fn execute_batch(
        &self,
        sql: &str,
        value_rows: &[Vec<Value>],
    ) -> Result<Vec<i64>, EngineError> {
        tracing::debug!(sql = %sql, rows = value_rows.len(), "execute batch");
        let mut counts = Vec::with_capacity(value_rows.len());
        for values in value_rows {
            let result = Self::bind_all(sql, values).execute(&self.pool).await?;
            counts.push(result.rows_affected() as i64);
        }
        Ok(counts)
    }

    async fn insert_with_keys(
        &self,
        sql: &str,
        values: &[Value],
        key_columns: &[String],
    ) -> Result<(i64, Vec<Value>), EngineError> {
        if key_columns.is_empty() {
            let affected = self.execute_one(sql, values).await?;
            return Ok((affected, Vec::new()));
        }
        let returning: Vec<String> = key_columns
            .iter()
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .collect();
        let sql = format!("{} RETURNING {}", sql, returning.join(", "));
        tracing::debug!(sql = %sql, params = ?values, "insert with keys");
        let row = Self::bind_all(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let keys = key_columns
                    .iter()
                    .map(|c| cell_to_value(&row, c))
                    .collect();
                Ok((1, keys))
            }
            None => Ok((0, Vec::new())),
        }
    }

    async fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError> {
        tracing::debug!(sql = %sql, params = ?values, "query");
        let rows = Self::bind_all(sql, values).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn exists(&self, sql: &str, values: &[Value]) -> Result<bool, EngineError> {
        tracing::debug!(sql = %sql, params = ?values, "exists");
        let row = Self::bind_all(sql, values)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    use sqlx::Column;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_values_preserve_strings_verbatim() {
        // uuid-shaped text must not be re-parsed and re-rendered
        let id = "123E4567-E89B-12D3-A456-426614174000";
        match BindValue::from_json(&json!(id)) {
            BindValue::String(s) => assert_eq!(s, id),
            other => panic!("expected a string bind, got {other:?}"),
        }
    }

    #[test]
    fn bind_values_map_json_kinds() {
        assert!(matches!(BindValue::from_json(&json!(null)), BindValue::Null));
        assert!(matches!(BindValue::from_json(&json!(true)), BindValue::Bool(true)));
        assert!(matches!(BindValue::from_json(&json!(7)), BindValue::I64(7)));
        assert!(matches!(BindValue::from_json(&json!(2.5)), BindValue::F64(_)));
        assert!(matches!(BindValue::from_json(&json!([1, 2])), BindValue::Json(_)));
    }
}
