//! Cascading parent/child operations: read-along, save-along, and
//! delete-with-parent, linked through the child's parent-key fields.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::config::quoted;
use crate::error::EngineError;
use crate::field::Field;
use crate::handle::{DbHandle, Row};
use crate::messages::MessageCollector;
use crate::record::Record;
use crate::sql::builder::placeholder;

use super::crud::{RecordService, SaveAction, ServiceContext};

/// Erased future breaking the parent-to-child save recursion: the single
/// save ops await `save_children`, which dispatches back into them.
type CascadeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

impl RecordService {
    /// Attach declared child row-sets to each parent row, filtered by the
    /// parent's key values mapped onto the child's parent-key fields. A
    /// single-key link over many parents batches into one IN query;
    /// composite keys run once per parent row.
    pub(crate) async fn read_children(
        &self,
        handle: &dyn DbHandle,
        parent: &Record,
        rows: &mut Vec<Row>,
        _ctx: &ServiceContext,
        _msgs: &mut MessageCollector,
    ) -> Result<(), EngineError> {
        for child_name in &parent.child_records_to_read {
            let Some(child) = self.model.record(child_name) else {
                continue;
            };
            if child.parent_keys.len() == 1 {
                self.read_children_single_key(handle, child, child_name, rows)
                    .await?;
            } else {
                self.read_children_composite_key(handle, child, child_name, rows)
                    .await?;
            }
        }
        Ok(())
    }

    async fn read_children_single_key(
        &self,
        handle: &dyn DbHandle,
        child: &Record,
        child_name: &str,
        rows: &mut Vec<Row>,
    ) -> Result<(), EngineError> {
        let link = &child.fields[child.parent_keys[0]];
        let parent_field = linked_parent_field(link);
        let mut key_values: Vec<Value> = Vec::new();
        for row in rows.iter() {
            if let Some(v) = row.get(parent_field) {
                if !v.is_null() && !key_values.contains(v) {
                    key_values.push(v.clone());
                }
            }
        }
        if key_values.is_empty() {
            for row in rows.iter_mut() {
                row.insert(child_name.to_string(), Value::Array(Vec::new()));
            }
            return Ok(());
        }
        let placeholders: Vec<String> = (1..=key_values.len())
            .map(|n| placeholder(n, link))
            .collect();
        let sql = format!(
            "{} WHERE {} IN ({})",
            child.sql.filter_prefix,
            quoted(&link.external_name),
            placeholders.join(", ")
        );
        tracing::debug!(sql = %sql, params = ?key_values, "read children");
        let child_rows = handle.query(&sql, &key_values).await?;
        let child_rows = self.decrypt_rows(child, child_rows)?;
        for row in rows.iter_mut() {
            let parent_value = row.get(parent_field).cloned().unwrap_or(Value::Null);
            let matching: Vec<Value> = child_rows
                .iter()
                .filter(|c| {
                    c.get(&link.name)
                        .is_some_and(|v| key_value_eq(v, &parent_value))
                })
                .cloned()
                .map(Value::Object)
                .collect();
            row.insert(child_name.to_string(), Value::Array(matching));
        }
        Ok(())
    }

    async fn read_children_composite_key(
        &self,
        handle: &dyn DbHandle,
        child: &Record,
        child_name: &str,
        rows: &mut Vec<Row>,
    ) -> Result<(), EngineError> {
        for row in rows.iter_mut() {
            let Some((clause, values)) = parent_key_clause(child, row) else {
                row.insert(child_name.to_string(), Value::Array(Vec::new()));
                continue;
            };
            let sql = format!("{} WHERE {}", child.sql.filter_prefix, clause);
            tracing::debug!(sql = %sql, params = ?values, "read children");
            let child_rows = handle.query(&sql, &values).await?;
            let child_rows = self.decrypt_rows(child, child_rows)?;
            row.insert(
                child_name.to_string(),
                Value::Array(child_rows.into_iter().map(Value::Object).collect()),
            );
        }
        Ok(())
    }

    /// Save declared child rows after their parent completed. Each child row
    /// inherits the parent's key values by direct column copy (including a
    /// freshly generated parent key), then runs its own save.
    pub(crate) fn save_children<'a>(
        &'a self,
        handle: &'a dyn DbHandle,
        parent: &'a Record,
        parent_row: &'a mut Row,
        action: SaveAction,
        ctx: &'a ServiceContext,
        msgs: &'a mut MessageCollector,
    ) -> CascadeFuture<'a> {
        Box::pin(async move {
            for child_name in &parent.child_records_to_save {
                let Some(child) = self.model.record(child_name) else {
                    continue;
                };
                let child = child.clone();
                let Some(supplied) = parent_row.get(child_name.as_str()) else {
                    continue;
                };
                let mut child_rows: Vec<Row> = match supplied {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_object().cloned())
                        .collect(),
                    Value::Object(single) => vec![single.clone()],
                    _ => continue,
                };
                for child_row in &mut child_rows {
                    for &idx in &child.parent_keys {
                        let link = &child.fields[idx];
                        let parent_field = linked_parent_field(link);
                        let value = parent_row.get(parent_field).cloned().unwrap_or(Value::Null);
                        child_row.insert(link.name.clone(), value);
                    }
                    match action {
                        SaveAction::Add => {
                            self.insert(handle, &child, child_row, ctx, msgs).await?;
                        }
                        SaveAction::Modify => {
                            self.update(handle, &child, child_row, ctx, msgs).await?;
                        }
                        SaveAction::Delete => {
                            self.delete(handle, &child, child_row, ctx, msgs).await?;
                        }
                        SaveAction::Save => {
                            self.save_one(handle, &child, child_row, ctx, msgs).await?;
                        }
                    }
                }
                parent_row.insert(
                    child_name.to_string(),
                    Value::Array(child_rows.into_iter().map(Value::Object).collect()),
                );
            }
            Ok(())
        })
    }

    /// Remove all child rows matching the parent key. A parent row without a
    /// key value means nothing to delete, not an error.
    pub(crate) async fn delete_children(
        &self,
        handle: &dyn DbHandle,
        parent: &Record,
        parent_row: &Row,
        ctx: &ServiceContext,
    ) -> Result<(), EngineError> {
        for child_name in &parent.child_records_to_save {
            let Some(child) = self.model.record(child_name) else {
                continue;
            };
            let Some((clause, values)) = parent_key_clause(child, parent_row) else {
                continue;
            };
            let sql = format!("DELETE FROM {} WHERE {}", child.qualified_table, clause);
            tracing::debug!(sql = %sql, params = ?values, "delete children");
            let result = handle.execute_one(&sql, &values).await;
            match result {
                Ok(_) => {}
                Err(e) if ctx.treat_error_as_no_action => {
                    tracing::warn!(error = %e, "child delete failure treated as no-action");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Name of the parent field a child parent-key links to; defaults to the
/// child field's own name.
fn linked_parent_field(link: &Field) -> &str {
    link.parent_field.as_deref().unwrap_or(&link.name)
}

/// AND-joined parent-key conditions with values taken from the parent row.
/// `None` when any linked value is missing.
fn parent_key_clause(child: &Record, parent_row: &Row) -> Option<(String, Vec<Value>)> {
    let mut parts = Vec::with_capacity(child.parent_keys.len());
    let mut values = Vec::with_capacity(child.parent_keys.len());
    for (i, &idx) in child.parent_keys.iter().enumerate() {
        let link = &child.fields[idx];
        let v = parent_row.get(linked_parent_field(link))?;
        if v.is_null() {
            return None;
        }
        parts.push(format!(
            "{} = {}",
            quoted(&link.external_name),
            placeholder(i + 1, link)
        ));
        values.push(v.clone());
    }
    Some((parts.join(" AND "), values))
}

/// Key equality across the JSON number/string boundary: child and parent
/// values may come back with different renderings from the driver.
fn key_value_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    key_text(a) == key_text(b)
}

fn key_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
