//! Builds parameterized SELECT, INSERT, UPDATE, DELETE text from field
//! metadata. Run once per record at readiness; the results are cached on the
//! record and reused verbatim (except the partial-update case, rebuilt per
//! call through [`update_statement`]).

use std::collections::HashSet;

use crate::config::quoted;
use crate::field::Field;

/// Inputs to synthesis: the record's resolved fields and flags.
pub struct Synthesis<'a> {
    pub record_name: &'a str,
    /// Schema-qualified, quoted table name.
    pub table: String,
    pub fields: &'a [Field],
    /// Indices into `fields`, in declaration order.
    pub primary_keys: &'a [usize],
    pub modified_at: Option<usize>,
    pub key_generated: bool,
    /// Fully resolved sequence name when generated keys use one.
    pub sequence: Option<String>,
    pub use_timestamp_check: bool,
    pub list_field: Option<usize>,
    pub list_group_field: Option<usize>,
    pub suggest_key_field: Option<usize>,
    pub suggest_output_fields: Vec<usize>,
}

/// All SQL text derived for one record.
#[derive(Clone, Debug)]
pub struct RecordSql {
    /// SELECT ... WHERE primary key. Bind pk values in key order.
    pub read: String,
    /// SELECT ... with no WHERE; filter conditions are appended per call.
    pub filter_prefix: String,
    /// SELECT 1 ... WHERE primary key (existence probe).
    pub exists: String,
    pub insert: Option<String>,
    /// Field names bound to the insert placeholders, in order.
    pub insert_fields: Vec<String>,
    pub update: Option<String>,
    /// Field names bound to the update SET placeholders, in order. Primary-key
    /// values follow, then the prior timestamp under timestamp check.
    pub update_fields: Vec<String>,
    pub delete: Option<String>,
    pub list: Option<String>,
    /// `list` constrained to one group-key value (bind the group value as $1).
    pub list_grouped: Option<String>,
    /// Suggestion query; bind the wildcard-wrapped text as $1.
    pub suggest: Option<String>,
    /// External names of generated key columns, for key retrieval on insert.
    pub key_columns: Vec<String>,
}

/// Column projection: every selectable field as `"column" AS "fieldName"`.
fn select_column_list(fields: &[Field]) -> String {
    fields
        .iter()
        .filter(|f| f.traits().selectable)
        .map(|f| format!("{} AS {}", quoted(&f.external_name), quoted(&f.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Typed placeholder: `$n` with a cast for non-text value types so string
/// bindings coerce correctly.
pub(crate) fn placeholder(n: usize, field: &Field) -> String {
    match field.data_type.value_type.pg_cast() {
        Some(cast) => format!("${}::{}", n, cast),
        None => format!("${}", n),
    }
}

/// Primary-key conditions joined by AND, numbering placeholders from `start`.
fn key_where(fields: &[Field], primary_keys: &[usize], start: usize) -> String {
    primary_keys
        .iter()
        .enumerate()
        .map(|(i, &idx)| {
            let f = &fields[idx];
            format!("{} = {}", quoted(&f.external_name), placeholder(start + i, f))
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub fn synthesize(s: &Synthesis<'_>) -> RecordSql {
    let cols = select_column_list(s.fields);
    let filter_prefix = format!("SELECT {} FROM {}", cols, s.table);
    let has_keys = !s.primary_keys.is_empty();

    let (read, exists) = if has_keys {
        let clause = key_where(s.fields, s.primary_keys, 1);
        (
            format!("{} WHERE {}", filter_prefix, clause),
            format!("SELECT 1 FROM {} WHERE {}", s.table, clause),
        )
    } else {
        (filter_prefix.clone(), String::new())
    };

    let (insert, insert_fields) = insert_statement(s);
    let (update, update_fields) = update_statement(s, None).unzip_or_default();
    let delete = has_keys.then(|| {
        format!(
            "DELETE FROM {} WHERE {}",
            s.table,
            key_where(s.fields, s.primary_keys, 1)
        )
    });

    let (list, list_grouped) = list_statements(s);
    let suggest = suggest_statement(s);

    let key_columns = if s.key_generated {
        s.primary_keys
            .iter()
            .map(|&idx| s.fields[idx].external_name.clone())
            .collect()
    } else {
        Vec::new()
    };

    RecordSql {
        read,
        filter_prefix,
        exists,
        insert,
        insert_fields,
        update,
        update_fields,
        delete,
        list,
        list_grouped,
        suggest,
        key_columns,
    }
}

fn insert_statement(s: &Synthesis<'_>) -> (Option<String>, Vec<String>) {
    let mut cols = Vec::new();
    let mut values = Vec::new();
    let mut bound = Vec::new();
    let mut n = 1;
    for f in s.fields {
        let t = f.traits();
        if !t.insertable {
            continue;
        }
        if t.is_key && s.key_generated {
            // sequence expression when configured; otherwise the column is
            // left out and the store's identity mechanism supplies the key
            if let Some(seq) = &s.sequence {
                cols.push(quoted(&f.external_name));
                values.push(format!("nextval('{}')", seq));
            }
            continue;
        }
        if t.timestamp_literal {
            cols.push(quoted(&f.external_name));
            values.push("NOW()".to_string());
            continue;
        }
        cols.push(quoted(&f.external_name));
        values.push(placeholder(n, f));
        bound.push(f.name.clone());
        n += 1;
    }
    if cols.is_empty() {
        return (None, bound);
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        s.table,
        cols.join(", "),
        values.join(", ")
    );
    (Some(sql), bound)
}

/// UPDATE text and the field names bound to its SET placeholders. With
/// `subset`, only fields named there contribute (partial update); WHERE and
/// timestamp handling are identical either way. Returns `None` when there is
/// no primary key or nothing to set.
pub fn update_statement(
    s: &Synthesis<'_>,
    subset: Option<&HashSet<String>>,
) -> Option<(String, Vec<String>)> {
    if s.primary_keys.is_empty() {
        return None;
    }
    let mut sets = Vec::new();
    let mut bound = Vec::new();
    let mut n = 1;
    for f in s.fields {
        if !f.is_updatable() {
            continue;
        }
        if f.traits().timestamp_literal {
            sets.push(format!("{} = NOW()", quoted(&f.external_name)));
            continue;
        }
        if let Some(subset) = subset {
            if !subset.contains(&f.name) {
                continue;
            }
        }
        sets.push(format!("{} = {}", quoted(&f.external_name), placeholder(n, f)));
        bound.push(f.name.clone());
        n += 1;
    }
    if bound.is_empty() {
        return None;
    }
    let mut clause = key_where(s.fields, s.primary_keys, n);
    n += s.primary_keys.len();
    if s.use_timestamp_check {
        let idx = s.modified_at?;
        let f = &s.fields[idx];
        clause.push_str(&format!(
            " AND {} = {}",
            quoted(&f.external_name),
            placeholder(n, f)
        ));
    }
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        s.table,
        sets.join(", "),
        clause
    );
    Some((sql, bound))
}

fn list_statements(s: &Synthesis<'_>) -> (Option<String>, Option<String>) {
    let Some(value_idx) = s.list_field else {
        return (None, None);
    };
    let Some(&key_idx) = s.primary_keys.first() else {
        return (None, None);
    };
    let key = &s.fields[key_idx];
    let value = &s.fields[value_idx];
    let projection = format!(
        "{} AS \"key\", {} AS \"value\"",
        quoted(&key.external_name),
        quoted(&value.external_name)
    );
    let base = format!(
        "SELECT {} FROM {} ORDER BY {}",
        projection,
        s.table,
        quoted(&value.external_name)
    );
    let grouped = s.list_group_field.map(|group_idx| {
        let g = &s.fields[group_idx];
        format!(
            "SELECT {} FROM {} WHERE {} = {} ORDER BY {}",
            projection,
            s.table,
            quoted(&g.external_name),
            placeholder(1, g),
            quoted(&value.external_name)
        )
    });
    (Some(base), grouped)
}

fn suggest_statement(s: &Synthesis<'_>) -> Option<String> {
    let key_idx = s.suggest_key_field?;
    let key = &s.fields[key_idx];
    let outputs = if s.suggest_output_fields.is_empty() {
        let mut idxs: Vec<usize> = s.primary_keys.to_vec();
        idxs.push(key_idx);
        idxs
    } else {
        s.suggest_output_fields.clone()
    };
    let projection = outputs
        .iter()
        .map(|&idx| {
            let f = &s.fields[idx];
            format!("{} AS {}", quoted(&f.external_name), quoted(&f.name))
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "SELECT {} FROM {} WHERE {} LIKE $1 ORDER BY {}",
        projection,
        s.table,
        quoted(&key.external_name),
        quoted(&key.external_name)
    ))
}

trait UnzipOrDefault {
    fn unzip_or_default(self) -> (Option<String>, Vec<String>);
}

impl UnzipOrDefault for Option<(String, Vec<String>)> {
    fn unzip_or_default(self) -> (Option<String>, Vec<String>) {
        match self {
            Some((sql, fields)) => (Some(sql), fields),
            None => (None, Vec::new()),
        }
    }
}
