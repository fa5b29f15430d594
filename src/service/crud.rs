//! Generic CRUD execution driven by record metadata.
//!
//! All SQL text comes pre-synthesized from the record (except partial
//! updates); this layer resolves input rows into positional parameter
//! arrays, runs them through the execution handle, and layers caching and
//! field-level encryption on top.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::RecordCache;
use crate::cipher::FieldCipher;
use crate::codes::CodeValidator;
use crate::error::EngineError;
use crate::field::ParseContext;
use crate::handle::{DbHandle, Row, UNKNOWN_ROW_COUNT};
use crate::messages::MessageCollector;
use crate::record::Record;
use crate::registry::ReadyModel;
use crate::sql::filter;

/// Reserved input carrying an explicit save action.
pub const SAVE_ACTION: &str = "_saveAction";

/// What a save should do with a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveAction {
    /// Decide between add and modify per row.
    Save,
    Add,
    Modify,
    Delete,
}

impl SaveAction {
    fn from_row(row: &Row, msgs: &mut MessageCollector) -> SaveAction {
        match row.get(SAVE_ACTION).and_then(Value::as_str) {
            None => SaveAction::Save,
            Some(token) => match token.to_ascii_lowercase().as_str() {
                "save" => SaveAction::Save,
                "add" => SaveAction::Add,
                "modify" => SaveAction::Modify,
                "delete" => SaveAction::Delete,
                other => {
                    msgs.add_error(SAVE_ACTION, format!("'{}' is not a save action", other));
                    SaveAction::Save
                }
            },
        }
    }
}

/// Per-call context: values for named runtime parameters, and the flag that
/// downgrades SQL write failures to "zero rows affected".
#[derive(Default)]
pub struct ServiceContext {
    pub runtime_params: Row,
    pub treat_error_as_no_action: bool,
}

impl ServiceContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// CRUD surface over a ready model. Collaborators are injected at
/// construction; absent ones degrade gracefully (no cache means a permanent
/// miss, no cipher means encrypted fields would fail loudly at use).
pub struct RecordService {
    pub(crate) model: Arc<ReadyModel>,
    pub(crate) cache: Option<Arc<dyn RecordCache>>,
    pub(crate) cipher: Option<Arc<dyn FieldCipher>>,
    pub(crate) codes: Option<Arc<dyn CodeValidator>>,
}

impl RecordService {
    pub fn new(model: Arc<ReadyModel>) -> Self {
        RecordService {
            model,
            cache: None,
            cipher: None,
            codes: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn RecordCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn FieldCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_codes(mut self, codes: Arc<dyn CodeValidator>) -> Self {
        self.codes = Some(codes);
        self
    }

    pub fn model(&self) -> &Arc<ReadyModel> {
        &self.model
    }

    pub(crate) fn parse_ctx<'a>(&'a self, ctx: &'a ServiceContext) -> ParseContext<'a> {
        ParseContext {
            runtime_params: Some(&ctx.runtime_params),
            codes: self.codes.as_ref().map(|c| c.as_ref()),
        }
    }

    /// Fetch one row by primary key; consults the cache first when the record
    /// allows it. Returns `None` when the key is invalid (messages say why)
    /// or no row matches.
    pub async fn read_one(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        keys: &Row,
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<Option<Row>, EngineError> {
        if !record.has_primary_key() {
            return Err(EngineError::NoPrimaryKey(record.name.clone()));
        }
        let pctx = self.parse_ctx(ctx);
        let Some(values) = record.primary_key_values(keys, &pctx, msgs) else {
            return Ok(None);
        };
        let cache_key = join_key_values(&values);
        if record.cacheable {
            if let Some(cache) = &self.cache {
                if let Some(Value::Object(row)) =
                    cache.get(&record.cache_primary(), Some(cache_key.as_str()))
                {
                    tracing::debug!(record = %record.name, key = %cache_key, "cache hit");
                    return Ok(Some(row));
                }
            }
        }
        tracing::debug!(sql = %record.sql.read, params = ?values, "query");
        let rows = handle.query(&record.sql.read, &values).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let mut row = self.decrypt_row(record, row)?;
        if !record.child_records_to_read.is_empty() {
            let mut rows = vec![row];
            self.read_children(handle, record, &mut rows, ctx, msgs).await?;
            row = rows.pop().unwrap_or_default();
        }
        if record.cacheable {
            if let Some(cache) = &self.cache {
                cache.put(
                    &record.cache_primary(),
                    Some(cache_key.as_str()),
                    Value::Object(row.clone()),
                );
            }
        }
        Ok(Some(row))
    }

    /// Fetch several rows by primary key. A single-column key is batched into
    /// one IN query; composite keys run one read per input row.
    pub async fn read_many(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        key_rows: &[Row],
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<Vec<Row>, EngineError> {
        if !record.has_primary_key() {
            return Err(EngineError::NoPrimaryKey(record.name.clone()));
        }
        let pctx = self.parse_ctx(ctx);
        let mut out = Vec::new();
        if record.primary_keys.len() == 1 && key_rows.len() > 1 {
            let key_field = &record.fields[record.primary_keys[0]];
            let mut values = Vec::new();
            for row in key_rows {
                if let Some(v) = record.primary_key_values(row, &pctx, msgs) {
                    values.extend(v);
                }
            }
            if values.is_empty() {
                return Ok(out);
            }
            let placeholders: Vec<String> = (1..=values.len())
                .map(|n| crate::sql::builder::placeholder(n, key_field))
                .collect();
            let sql = format!(
                "{} WHERE {} IN ({})",
                record.sql.filter_prefix,
                crate::config::quoted(&key_field.external_name),
                placeholders.join(", ")
            );
            tracing::debug!(sql = %sql, params = ?values, "query");
            out = handle.query(&sql, &values).await?;
        } else {
            for row in key_rows {
                let Some(values) = record.primary_key_values(row, &pctx, msgs) else {
                    continue;
                };
                tracing::debug!(sql = %record.sql.read, params = ?values, "query");
                out.extend(handle.query(&record.sql.read, &values).await?);
            }
        }
        let mut out = self.decrypt_rows(record, out)?;
        if !record.child_records_to_read.is_empty() {
            self.read_children(handle, record, &mut out, ctx, msgs).await?;
        }
        Ok(out)
    }

    /// Select rows matching whichever filter-capable fields carry input
    /// values; see the filter module for comparator and sort handling.
    pub async fn filter(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        inputs: &Row,
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<Vec<Row>, EngineError> {
        let pctx = self.parse_ctx(ctx);
        let clause = filter::build(record, inputs, &pctx, &self.model.engine, msgs)?;
        let sql = format!("{}{}", record.sql.filter_prefix, clause.sql);
        tracing::debug!(sql = %sql, params = ?clause.params, "query");
        let rows = handle.query(&sql, &clause.params).await?;
        let mut rows = self.decrypt_rows(record, rows)?;
        if !record.child_records_to_read.is_empty() {
            self.read_children(handle, record, &mut rows, ctx, msgs).await?;
        }
        Ok(rows)
    }

    /// Insert one row. Generated keys are retrieved and back-filled into the
    /// caller's row; declared child rows are saved after the parent.
    pub async fn insert(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        row: &mut Row,
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<i64, EngineError> {
        self.check_writable(record)?;
        let Some(sql) = record.sql.insert.clone() else {
            return Ok(0);
        };
        let before = msgs.len();
        record.validate_row(row, msgs);
        let values = self.write_params(record, &record.sql.insert_fields, row, ctx, msgs)?;
        if msgs.len() > before {
            return Ok(0);
        }
        let affected = if record.key_generated {
            tracing::debug!(sql = %sql, params = ?values, "insert with keys");
            let result = handle
                .insert_with_keys(&sql, &values, &record.sql.key_columns)
                .await;
            let (affected, keys) = self.absorb_write_error(result, ctx)?;
            for (field, key) in record.primary_key_fields().zip(keys) {
                row.insert(field.name.clone(), key);
            }
            affected
        } else {
            tracing::debug!(sql = %sql, params = ?values, "insert");
            let result = handle.execute_one(&sql, &values).await;
            self.absorb_plain_write_error(result, ctx)?
        };
        if affected > 0 && !record.child_records_to_save.is_empty() {
            self.save_children(handle, record, row, SaveAction::Add, ctx, msgs)
                .await?;
        }
        Ok(affected)
    }

    /// Batch insert. Returns the summed affected count, or `None` when any
    /// element reported an unknown count. Per-row generated keys are not
    /// retrieved on the batch path.
    pub async fn insert_many(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        rows: &[Row],
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<Option<u64>, EngineError> {
        self.check_writable(record)?;
        let Some(sql) = record.sql.insert.clone() else {
            return Ok(Some(0));
        };
        let mut value_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let before = msgs.len();
            record.validate_row(row, msgs);
            let values = self.write_params(record, &record.sql.insert_fields, row, ctx, msgs)?;
            if msgs.len() == before {
                value_rows.push(values);
            }
        }
        if value_rows.is_empty() {
            return Ok(Some(0));
        }
        tracing::debug!(sql = %sql, rows = value_rows.len(), "batch insert");
        let result = handle.execute_batch(&sql, &value_rows).await;
        let counts = match self.absorb_batch_write_error(result, ctx)? {
            Some(counts) => counts,
            None => return Ok(Some(0)),
        };
        Ok(sum_counts(&counts))
    }

    /// Update one row by primary key. Supports partial field sets; enforces
    /// the optimistic timestamp check when the record declares it.
    pub async fn update(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        row: &mut Row,
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<i64, EngineError> {
        self.check_writable(record)?;
        if !record.has_primary_key() {
            return Err(EngineError::NoPrimaryKey(record.name.clone()));
        }
        let before = msgs.len();
        record.validate_row(row, msgs);
        let present: HashSet<String> = record
            .sql
            .update_fields
            .iter()
            .filter(|name| row.get(name.as_str()).is_some_and(|v| !v.is_null()))
            .cloned()
            .collect();
        let (sql, bound_fields) = if present.len() == record.sql.update_fields.len() {
            match &record.sql.update {
                Some(sql) => (sql.clone(), record.sql.update_fields.clone()),
                None => return Ok(0),
            }
        } else {
            match record.update_sql_for(&present) {
                Some(pair) => pair,
                None => return Ok(0),
            }
        };
        let mut values = self.write_params(record, &bound_fields, row, ctx, msgs)?;
        let pctx = self.parse_ctx(ctx);
        let Some(key_values) = record.primary_key_values(row, &pctx, msgs) else {
            return Ok(0);
        };
        values.extend(key_values);
        if record.use_timestamp_check {
            values.push(timestamp_value(record, row)?);
        }
        if msgs.len() > before {
            return Ok(0);
        }
        tracing::debug!(sql = %sql, params = ?values, "update");
        let result = handle.execute_one(&sql, &values).await;
        let affected = self.absorb_plain_write_error(result, ctx)?;
        if affected == 0 && record.use_timestamp_check {
            return Err(EngineError::ConcurrentModification(record.name.clone()));
        }
        if affected > 0 {
            self.invalidate_caches(record, row);
            if !record.child_records_to_save.is_empty() {
                self.save_children(handle, record, row, SaveAction::Save, ctx, msgs)
                    .await?;
            }
        }
        Ok(affected)
    }

    /// Batch update using the full pre-synthesized statement.
    pub async fn update_many(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        rows: &[Row],
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<Option<u64>, EngineError> {
        self.check_writable(record)?;
        let Some(sql) = record.sql.update.clone() else {
            return Ok(Some(0));
        };
        let pctx = self.parse_ctx(ctx);
        let mut value_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let before = msgs.len();
            record.validate_row(row, msgs);
            let mut values =
                self.write_params(record, &record.sql.update_fields, row, ctx, msgs)?;
            let Some(key_values) = record.primary_key_values(row, &pctx, msgs) else {
                continue;
            };
            values.extend(key_values);
            if record.use_timestamp_check {
                values.push(timestamp_value(record, row)?);
            }
            if msgs.len() == before {
                value_rows.push(values);
            }
        }
        if value_rows.is_empty() {
            return Ok(Some(0));
        }
        tracing::debug!(sql = %sql, rows = value_rows.len(), "batch update");
        let result = handle.execute_batch(&sql, &value_rows).await;
        let counts = match self.absorb_batch_write_error(result, ctx)? {
            Some(counts) => counts,
            None => return Ok(Some(0)),
        };
        for row in rows {
            self.invalidate_caches(record, row);
        }
        Ok(sum_counts(&counts))
    }

    /// Delete one row by primary key. Declared save-along children are
    /// removed first so key constraints hold.
    pub async fn delete(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        row: &Row,
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<i64, EngineError> {
        self.check_writable(record)?;
        if !record.has_primary_key() {
            return Err(EngineError::NoPrimaryKey(record.name.clone()));
        }
        let Some(sql) = record.sql.delete.clone() else {
            return Ok(0);
        };
        let pctx = self.parse_ctx(ctx);
        let Some(values) = record.primary_key_values(row, &pctx, msgs) else {
            return Ok(0);
        };
        if !record.child_records_to_save.is_empty() {
            self.delete_children(handle, record, row, ctx).await?;
        }
        tracing::debug!(sql = %sql, params = ?values, "delete");
        let result = handle.execute_one(&sql, &values).await;
        let affected = self.absorb_plain_write_error(result, ctx)?;
        if affected > 0 {
            self.invalidate_caches(record, row);
        }
        Ok(affected)
    }

    /// Batch delete by primary key.
    pub async fn delete_many(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        rows: &[Row],
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<Option<u64>, EngineError> {
        self.check_writable(record)?;
        let Some(sql) = record.sql.delete.clone() else {
            return Ok(Some(0));
        };
        let pctx = self.parse_ctx(ctx);
        let mut value_rows = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(values) = record.primary_key_values(row, &pctx, msgs) {
                value_rows.push(values);
            }
        }
        if value_rows.is_empty() {
            return Ok(Some(0));
        }
        tracing::debug!(sql = %sql, rows = value_rows.len(), "batch delete");
        let result = handle.execute_batch(&sql, &value_rows).await;
        let counts = match self.absorb_batch_write_error(result, ctx)? {
            Some(counts) => counts,
            None => return Ok(Some(0)),
        };
        for row in rows {
            self.invalidate_caches(record, row);
        }
        Ok(sum_counts(&counts))
    }

    /// Save one row, resolving the intended action: the explicit
    /// `_saveAction` input wins; otherwise key presence decides for
    /// generated keys; otherwise an existence probe decides.
    pub async fn save_one(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        row: &mut Row,
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<(SaveAction, i64), EngineError> {
        let action = SaveAction::from_row(row, msgs);
        let resolved = match action {
            SaveAction::Save => self.resolve_save(handle, record, row, ctx).await?,
            explicit => explicit,
        };
        let affected = match resolved {
            SaveAction::Add => self.insert(handle, record, row, ctx, msgs).await?,
            SaveAction::Modify => self.update(handle, record, row, ctx, msgs).await?,
            SaveAction::Delete => self.delete(handle, record, row, ctx, msgs).await?,
            SaveAction::Save => unreachable!("resolved above"),
        };
        Ok((resolved, affected))
    }

    /// Save a batch of rows, each resolving its own action. Returns the
    /// summed affected count.
    pub async fn save_many(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        rows: &mut [Row],
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<i64, EngineError> {
        let mut total = 0;
        for row in rows.iter_mut() {
            let (_, affected) = self.save_one(handle, record, row, ctx, msgs).await?;
            total += affected;
        }
        Ok(total)
    }

    /// Key/value pairs from the designated list field, optionally constrained
    /// to one group. Cached read-through when the record allows it.
    pub async fn list(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        group: Option<&str>,
    ) -> Result<Vec<Row>, EngineError> {
        let (sql, params): (&str, Vec<Value>) = match (group, &record.sql.list_grouped) {
            (Some(g), Some(sql)) => (sql, vec![Value::String(g.to_string())]),
            (Some(_), None) => {
                return Err(EngineError::Design(
                    crate::error::DesignError::UnresolvedReference {
                        record: record.name.clone(),
                        reference: "no list group field declared".into(),
                    },
                ))
            }
            (None, _) => match &record.sql.list {
                Some(sql) => (sql, Vec::new()),
                None => {
                    return Err(EngineError::Design(
                        crate::error::DesignError::UnresolvedReference {
                            record: record.name.clone(),
                            reference: "no list field declared".into(),
                        },
                    ))
                }
            },
        };
        if record.cacheable {
            if let Some(cache) = &self.cache {
                if let Some(Value::Array(rows)) = cache.get(&record.cache_primary(), group) {
                    let rows = rows
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::Object(m) => Some(m),
                            _ => None,
                        })
                        .collect();
                    return Ok(rows);
                }
            }
        }
        tracing::debug!(sql = %sql, params = ?params, "list");
        let rows = handle.query(sql, &params).await?;
        let rows = self.decrypt_list_values(record, rows)?;
        if record.cacheable {
            if let Some(cache) = &self.cache {
                let cached: Vec<Value> = rows.iter().cloned().map(Value::Object).collect();
                cache.put(&record.cache_primary(), group, Value::Array(cached));
            }
        }
        Ok(rows)
    }

    /// Rows whose suggestion key starts with (or, with `match_anywhere`,
    /// contains) the typed text.
    pub async fn suggest(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        text: &str,
        match_anywhere: bool,
    ) -> Result<Vec<Row>, EngineError> {
        let Some(sql) = &record.sql.suggest else {
            return Err(EngineError::Design(
                crate::error::DesignError::UnresolvedReference {
                    record: record.name.clone(),
                    reference: "no suggestion key declared".into(),
                },
            ));
        };
        let escaped = self.model.engine.escape_like(text);
        let pattern = if match_anywhere {
            format!("%{}%", escaped)
        } else {
            format!("{}%", escaped)
        };
        let params = vec![Value::String(pattern)];
        tracing::debug!(sql = %sql, params = ?params, "suggest");
        let rows = handle.query(sql, &params).await?;
        self.decrypt_rows(record, rows)
    }

    async fn resolve_save(
        &self,
        handle: &dyn DbHandle,
        record: &Record,
        row: &Row,
        ctx: &ServiceContext,
    ) -> Result<SaveAction, EngineError> {
        if record.key_generated {
            let key_field = &record.fields[record.primary_keys[0]];
            let present = row.get(&key_field.name).is_some_and(|v| !v.is_null());
            return Ok(if present { SaveAction::Modify } else { SaveAction::Add });
        }
        if !record.has_primary_key() {
            return Err(EngineError::NoPrimaryKey(record.name.clone()));
        }
        let pctx = self.parse_ctx(ctx);
        let mut probe_msgs = MessageCollector::new();
        let Some(values) = record.primary_key_values(row, &pctx, &mut probe_msgs) else {
            // no key value supplied; this can only be a new row
            return Ok(SaveAction::Add);
        };
        let found = handle.exists(&record.sql.exists, &values).await?;
        Ok(if found { SaveAction::Modify } else { SaveAction::Add })
    }

    fn check_writable(&self, record: &Record) -> Result<(), EngineError> {
        if record.read_only {
            return Err(EngineError::ReadOnly(record.name.clone()));
        }
        Ok(())
    }

    /// Resolve the named fields from the row into a positional parameter
    /// array, encrypting flagged values on the way.
    fn write_params(
        &self,
        record: &Record,
        field_names: &[String],
        row: &Row,
        ctx: &ServiceContext,
        msgs: &mut MessageCollector,
    ) -> Result<Vec<Value>, EngineError> {
        let pctx = self.parse_ctx(ctx);
        let mut values = Vec::with_capacity(field_names.len());
        for name in field_names {
            let Some(field) = record.field(name) else {
                values.push(Value::Null);
                continue;
            };
            let parsed = field.parse_input(row.get(name), &pctx, msgs);
            let value = match parsed {
                Some(v) if field.encrypted => self.encrypt_value(v)?,
                Some(v) => v,
                None => Value::Null,
            };
            values.push(value);
        }
        Ok(values)
    }

    fn encrypt_value(&self, v: Value) -> Result<Value, EngineError> {
        let Some(cipher) = &self.cipher else {
            return Err(EngineError::Cipher("no cipher configured for encrypted field".into()));
        };
        match v {
            Value::String(s) => Ok(Value::String(cipher.encrypt(&s)?)),
            other => {
                let text = other.to_string();
                Ok(Value::String(cipher.encrypt(&text)?))
            }
        }
    }

    pub(crate) fn decrypt_row(&self, record: &Record, mut row: Row) -> Result<Row, EngineError> {
        if record.encrypted_fields.is_empty() {
            return Ok(row);
        }
        let Some(cipher) = &self.cipher else {
            return Err(EngineError::Cipher("no cipher configured for encrypted field".into()));
        };
        for &idx in &record.encrypted_fields {
            let name = &record.fields[idx].name;
            if let Some(Value::String(s)) = row.get(name) {
                let plain = cipher.decrypt(s)?;
                row.insert(name.clone(), Value::String(plain));
            }
        }
        Ok(row)
    }

    pub(crate) fn decrypt_rows(
        &self,
        record: &Record,
        rows: Vec<Row>,
    ) -> Result<Vec<Row>, EngineError> {
        if record.encrypted_fields.is_empty() {
            return Ok(rows);
        }
        rows.into_iter()
            .map(|row| self.decrypt_row(record, row))
            .collect()
    }

    /// The list projection aliases the designated field to `value`, so the
    /// generic row decryption cannot see it; decrypt that column directly
    /// when the designated field is encrypted.
    fn decrypt_list_values(
        &self,
        record: &Record,
        mut rows: Vec<Row>,
    ) -> Result<Vec<Row>, EngineError> {
        let encrypted = record
            .list_field
            .is_some_and(|idx| record.fields[idx].encrypted);
        if !encrypted {
            return Ok(rows);
        }
        let Some(cipher) = &self.cipher else {
            return Err(EngineError::Cipher("no cipher configured for encrypted field".into()));
        };
        for row in &mut rows {
            if let Some(Value::String(s)) = row.get("value") {
                let plain = cipher.decrypt(s)?;
                row.insert("value".to_string(), Value::String(plain));
            }
        }
        Ok(rows)
    }

    /// Invalidate this record's cache entries and those of every record
    /// registered to be notified of its changes, using the same group-key
    /// derivation as list caching.
    pub(crate) fn invalidate_caches(&self, record: &Record, row: &Row) {
        let Some(cache) = &self.cache else {
            return;
        };
        let group = record.group_key(row);
        cache.invalidate(&record.cache_primary(), group.as_deref());
        cache.invalidate(&record.cache_primary(), None);
        for sibling in &record.records_to_notify {
            if let Some(other) = self.model.record(sibling) {
                cache.invalidate(&other.cache_primary(), group.as_deref());
                cache.invalidate(&other.cache_primary(), None);
            }
        }
    }

    fn absorb_plain_write_error(
        &self,
        result: Result<i64, EngineError>,
        ctx: &ServiceContext,
    ) -> Result<i64, EngineError> {
        match result {
            Ok(n) => Ok(n),
            Err(e) if ctx.treat_error_as_no_action && is_sql_failure(&e) => {
                tracing::warn!(error = %e, "write failure treated as no-action");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn absorb_write_error(
        &self,
        result: Result<(i64, Vec<Value>), EngineError>,
        ctx: &ServiceContext,
    ) -> Result<(i64, Vec<Value>), EngineError> {
        match result {
            Ok(pair) => Ok(pair),
            Err(e) if ctx.treat_error_as_no_action && is_sql_failure(&e) => {
                tracing::warn!(error = %e, "write failure treated as no-action");
                Ok((0, Vec::new()))
            }
            Err(e) => Err(e),
        }
    }

    fn absorb_batch_write_error(
        &self,
        result: Result<Vec<i64>, EngineError>,
        ctx: &ServiceContext,
    ) -> Result<Option<Vec<i64>>, EngineError> {
        match result {
            Ok(counts) => Ok(Some(counts)),
            Err(e) if ctx.treat_error_as_no_action && is_sql_failure(&e) => {
                tracing::warn!(error = %e, "batch write failure treated as no-action");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// The row's current value for the timestamp-check field; callers require it
/// before attempting an optimistic update.
fn timestamp_value(record: &Record, row: &Row) -> Result<Value, EngineError> {
    let stamp_field = record
        .modified_at
        .map(|idx| &record.fields[idx])
        .ok_or_else(|| EngineError::MissingTimestamp(record.name.clone()))?;
    row.get(&stamp_field.name)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| EngineError::MissingTimestamp(record.name.clone()))
}

/// Only store-level failures are downgradable; usage and design errors are
/// never absorbed.
fn is_sql_failure(e: &EngineError) -> bool {
    matches!(e, EngineError::Db(_) | EngineError::Handle(_))
}

/// Sum per-row affected counts; `None` when any element is the unknown
/// sentinel.
fn sum_counts(counts: &[i64]) -> Option<u64> {
    let mut total: u64 = 0;
    for &c in counts {
        if c == UNKNOWN_ROW_COUNT {
            return None;
        }
        total += c.max(0) as u64;
    }
    Some(total)
}

pub(crate) fn join_key_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("|")
}
