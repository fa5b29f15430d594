//! Record: the aggregate describing one table/view and its CRUD SQL.
//!
//! A record is assembled once during the readiness pass: fields are
//! classified, invariants checked, and all SQL text synthesized. It is
//! read-only afterwards and safe for unsynchronized concurrent use.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::config::{EngineConfig, RecordDef};
use crate::error::DesignError;
use crate::field::{AuditRole, Field, ParseContext};
use crate::handle::Row;
use crate::messages::MessageCollector;
use crate::sql::builder::{self, RecordSql, Synthesis};
use crate::types::ValueType;

#[derive(Clone, Debug)]
pub struct Record {
    pub name: String,
    pub module: Option<String>,
    pub table_name: String,
    /// Schema-qualified, quoted; used in all synthesized SQL.
    pub qualified_table: String,
    /// Declaration order; fixes SQL column order and parameter order.
    pub fields: Vec<Field>,
    field_index: HashMap<String, usize>,
    /// Ordered subsets, as indices into `fields`.
    pub primary_keys: Vec<usize>,
    pub parent_keys: Vec<usize>,
    pub encrypted_fields: Vec<usize>,
    pub created_by: Option<usize>,
    pub created_at: Option<usize>,
    pub modified_by: Option<usize>,
    pub modified_at: Option<usize>,
    pub key_generated: bool,
    /// Resolved sequence name when generated keys use one.
    pub sequence: Option<String>,
    pub use_timestamp_check: bool,
    pub cacheable: bool,
    pub ok_to_select_all: bool,
    pub read_only: bool,
    pub fixed_width_rows: bool,
    pub child_records_to_read: Vec<String>,
    pub child_records_to_save: Vec<String>,
    pub records_to_notify: Vec<String>,
    pub list_field: Option<usize>,
    pub list_group_field: Option<usize>,
    pub suggest_key_field: Option<usize>,
    pub suggest_output_fields: Vec<usize>,
    pub sql: RecordSql,
    has_inter_field_rules: bool,
}

impl Record {
    /// Assemble a record from its definition and already-resolved fields.
    /// Called by the registry once per record; all invariants of the
    /// definition are enforced here.
    pub(crate) fn assemble(
        def: &RecordDef,
        fields: Vec<Field>,
        engine: &EngineConfig,
    ) -> Result<Record, DesignError> {
        let name = def.name.clone();
        let mut field_index = HashMap::new();
        let mut column_names = HashSet::new();
        let mut primary_keys = Vec::new();
        let mut parent_keys = Vec::new();
        let mut encrypted_fields = Vec::new();
        let mut audit: [Option<usize>; 4] = [None; 4];

        for (idx, field) in fields.iter().enumerate() {
            if field_index.insert(field.name.clone(), idx).is_some() {
                return Err(DesignError::DuplicateField {
                    record: name,
                    field: field.name.clone(),
                });
            }
            let t = field.traits();
            if t.selectable && !column_names.insert(field.external_name.clone()) {
                return Err(DesignError::DuplicateColumn {
                    record: name,
                    column: field.external_name.clone(),
                });
            }
            if t.is_key {
                primary_keys.push(idx);
            }
            if t.is_parent_key {
                parent_keys.push(idx);
            }
            if field.encrypted {
                encrypted_fields.push(idx);
            }
            if let Some(role) = t.audit {
                let slot = match role {
                    AuditRole::CreatedBy => 0,
                    AuditRole::CreatedAt => 1,
                    AuditRole::ModifiedBy => 2,
                    AuditRole::ModifiedAt => 3,
                };
                if audit[slot].replace(idx).is_some() {
                    return Err(DesignError::DuplicateAuditRole {
                        record: name,
                        role: ["createdBy", "createdAt", "modifiedBy", "modifiedAt"][slot],
                        field: field.name.clone(),
                    });
                }
            }
        }

        if def.key_generated {
            let sole_numeric = primary_keys.len() == 1
                && fields[primary_keys[0]].data_type.value_type.is_numeric();
            if !sole_numeric {
                return Err(DesignError::GeneratedKeyShape { record: name });
            }
        }
        let modified_at = audit[3];
        if def.use_timestamp_check {
            let ok = modified_at
                .is_some_and(|idx| fields[idx].data_type.value_type == ValueType::Timestamp);
            if !ok {
                return Err(DesignError::TimestampCheckWithoutField { record: name });
            }
        }

        let table_name = def.table_name.clone().unwrap_or_else(|| name.clone());
        let qualified_table = engine.qualified_table(&table_name);
        let sequence = if def.key_generated && engine.use_sequences {
            Some(
                def.sequence
                    .clone()
                    .unwrap_or_else(|| engine.sequence_for(&table_name)),
            )
        } else {
            None
        };

        let designated = |field_name: &Option<String>| -> Result<Option<usize>, DesignError> {
            match field_name {
                None => Ok(None),
                Some(n) => field_index
                    .get(n)
                    .copied()
                    .map(Some)
                    .ok_or_else(|| DesignError::UnresolvedReference {
                        record: name.clone(),
                        reference: format!("designated field '{}' is not defined", n),
                    }),
            }
        };
        let list_field = designated(&def.list_field)?;
        let list_group_field = designated(&def.list_group_field)?;
        let suggest_key_field = designated(&def.suggest_key_field)?;
        let mut suggest_output_fields = Vec::new();
        for n in &def.suggest_output_fields {
            suggest_output_fields.push(*field_index.get(n).ok_or_else(|| {
                DesignError::UnresolvedReference {
                    record: name.clone(),
                    reference: format!("suggestion output field '{}' is not defined", n),
                }
            })?);
        }

        let has_inter_field_rules = fields.iter().any(Field::has_inter_field_rule);

        let sql = builder::synthesize(&Synthesis {
            record_name: &name,
            table: qualified_table.clone(),
            fields: &fields,
            primary_keys: &primary_keys,
            modified_at,
            key_generated: def.key_generated,
            sequence: sequence.clone(),
            use_timestamp_check: def.use_timestamp_check,
            list_field,
            list_group_field,
            suggest_key_field,
            suggest_output_fields: suggest_output_fields.clone(),
        });

        Ok(Record {
            name,
            module: def.module.clone(),
            table_name,
            qualified_table,
            fields,
            field_index,
            primary_keys,
            parent_keys,
            encrypted_fields,
            created_by: audit[0],
            created_at: audit[1],
            modified_by: audit[2],
            modified_at,
            key_generated: def.key_generated,
            sequence,
            use_timestamp_check: def.use_timestamp_check,
            cacheable: def.cacheable,
            ok_to_select_all: def.ok_to_select_all,
            read_only: def.read_only,
            fixed_width_rows: def.fixed_width_rows,
            child_records_to_read: def.child_records_to_read.clone(),
            child_records_to_save: def.child_records_to_save.clone(),
            records_to_notify: def.records_to_notify.clone(),
            list_field,
            list_group_field,
            suggest_key_field,
            suggest_output_fields,
            sql,
            has_inter_field_rules,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.field_index.get(name).map(|&idx| &self.fields[idx])
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    pub fn primary_key_fields(&self) -> impl Iterator<Item = &Field> {
        self.primary_keys.iter().map(|&idx| &self.fields[idx])
    }

    /// Cache key prefix identifying this record: `module.name` or plain name.
    pub fn cache_primary(&self) -> String {
        match &self.module {
            Some(m) => format!("{}.{}", m, self.name),
            None => self.name.clone(),
        }
    }

    /// Secondary cache key for a single-row read: primary-key values joined.
    pub fn row_cache_key(&self, row: &Row) -> Option<String> {
        let mut parts = Vec::with_capacity(self.primary_keys.len());
        for f in self.primary_key_fields() {
            let v = row.get(&f.name)?;
            if v.is_null() {
                return None;
            }
            parts.push(value_text(v));
        }
        Some(parts.join("|"))
    }

    /// Group key for list caching/invalidation, from the designated group
    /// field's value in `row`.
    pub fn group_key(&self, row: &Row) -> Option<String> {
        let idx = self.list_group_field?;
        let v = row.get(&self.fields[idx].name)?;
        if v.is_null() {
            return None;
        }
        Some(value_text(v))
    }

    /// Parse primary-key values from a row, in key order. Missing or invalid
    /// key values contribute messages and yield `None`.
    pub fn primary_key_values(
        &self,
        row: &Row,
        ctx: &ParseContext<'_>,
        msgs: &mut MessageCollector,
    ) -> Option<Vec<Value>> {
        let mut out = Vec::with_capacity(self.primary_keys.len());
        for f in self.primary_key_fields() {
            match f.parse_input(row.get(&f.name), ctx, msgs) {
                Some(v) => out.push(v),
                None => {
                    msgs.add_error(&f.name, format!("{} is required to identify a row", f.name));
                    return None;
                }
            }
        }
        Some(out)
    }

    /// Cross-field rules: conditionally-required, mutually-exclusive, and
    /// from/to range ordering. Skipped entirely when no field declares one.
    pub fn validate_row(&self, row: &Row, msgs: &mut MessageCollector) {
        if !self.has_inter_field_rules {
            return;
        }
        for field in &self.fields {
            let present = row.get(&field.name).is_some_and(|v| !v.is_null());
            if let Some(basis) = &field.based_on_field {
                let basis_present = row.get(basis).is_some_and(|v| !v.is_null());
                if basis_present && !present {
                    msgs.add_error(
                        &field.name,
                        format!("{} is required when {} is specified", field.name, basis),
                    );
                }
            }
            if let Some(other) = &field.other_field {
                let other_present = row.get(other).is_some_and(|v| !v.is_null());
                if present && other_present {
                    msgs.add_error(
                        &field.name,
                        format!("{} and {} cannot both be specified", field.name, other),
                    );
                }
            }
            if let Some(from) = &field.from_field {
                if let (Some(from_v), Some(to_v)) = (row.get(from), row.get(&field.name)) {
                    if !from_v.is_null() && !to_v.is_null() && compare_values(from_v, to_v) == std::cmp::Ordering::Greater {
                        msgs.add_error(
                            &field.name,
                            format!("{} must not be less than {}", field.name, from),
                        );
                    }
                }
            }
        }
    }

    /// Rebuild the update statement for a partial field set. WHERE-clause and
    /// timestamp handling are identical to the pre-synthesized form.
    pub fn update_sql_for(&self, present: &HashSet<String>) -> Option<(String, Vec<String>)> {
        builder::update_statement(
            &Synthesis {
                record_name: &self.name,
                table: self.qualified_table.clone(),
                fields: &self.fields,
                primary_keys: &self.primary_keys,
                modified_at: self.modified_at,
                key_generated: self.key_generated,
                sequence: self.sequence.clone(),
                use_timestamp_check: self.use_timestamp_check,
                list_field: self.list_field,
                list_group_field: self.list_group_field,
                suggest_key_field: self.suggest_key_field,
                suggest_output_fields: self.suggest_output_fields.clone(),
            },
            Some(present),
        )
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => value_text(a).cmp(&value_text(b)),
    }
}
