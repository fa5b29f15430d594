//! Declarative record/field definitions matching the JSON config schema.

use serde::{Deserialize, Serialize};

use crate::types::ValueType;

/// What a field is for. Drives the role strategy table at readiness time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldRole {
    /// Ordinary persisted column.
    #[default]
    Data,
    PrimaryKey,
    /// Composite key column that is also the link to the parent record.
    PrimaryAndParentKey,
    ParentKey,
    CreatedBy,
    CreatedAt,
    ModifiedBy,
    ModifiedAt,
    /// Structural array of scalar values; not a column.
    ValueArray,
    /// Embedded child record; not a column.
    ChildRecord,
    /// Embedded array of child records; not a column.
    ChildRecordArray,
    /// Selected from a view but never written.
    ViewOnly,
    /// Input-only working field; never touches SQL.
    Temporary,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Column/parameter name in SQL; defaults to `name`.
    #[serde(default)]
    pub external_name: Option<String>,
    #[serde(default)]
    pub role: FieldRole,
    /// Name of a declared or built-in data type. Defaults to `_text`.
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    /// Named runtime parameter supplying a default when input is absent.
    #[serde(default)]
    pub default_param: Option<String>,
    /// Comma-separated enumerated values, each `value` or `value:label`.
    #[serde(default)]
    pub valid_values: Option<String>,
    /// Fixed width for flat-file text fields.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub encrypted: bool,
    /// Common-code set name checked through the CodeValidator collaborator.
    #[serde(default)]
    pub code_set: Option<String>,
    /// Written on insert, never on update.
    #[serde(default)]
    pub immutable: bool,
    /// This field is required whenever the named field has a value.
    #[serde(default)]
    pub based_on_field: Option<String>,
    /// This field and the named one are mutually exclusive.
    #[serde(default)]
    pub other_field: Option<String>,
    /// Range rule: this field is the "to" end; the named field is the "from" end.
    #[serde(default)]
    pub from_field: Option<String>,
    /// Defer data type / valid values / default to a field in another record.
    #[serde(default)]
    pub referred_record: Option<String>,
    #[serde(default)]
    pub referred_field: Option<String>,
    /// For parent-key roles: name of the linked field in the parent record.
    #[serde(default)]
    pub parent_field: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordDef {
    pub name: String,
    #[serde(default)]
    pub module: Option<String>,
    /// Table/view name; defaults to `name`.
    #[serde(default)]
    pub table_name: Option<String>,
    pub fields: Vec<FieldDef>,
    /// Primary key is supplied by a sequence or auto-increment.
    #[serde(default)]
    pub key_generated: bool,
    /// Explicit sequence name; defaults to the engine naming convention.
    #[serde(default)]
    pub sequence: Option<String>,
    /// Optimistic concurrency via the modifiedAt timestamp column.
    #[serde(default)]
    pub use_timestamp_check: bool,
    #[serde(default)]
    pub cacheable: bool,
    /// Allow a filter with no conditions (full-table select).
    #[serde(default)]
    pub ok_to_select_all: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Rows come from a fixed-width flat file rather than free-form text.
    #[serde(default)]
    pub fixed_width_rows: bool,
    #[serde(default)]
    pub child_records_to_read: Vec<String>,
    #[serde(default)]
    pub child_records_to_save: Vec<String>,
    /// Sibling records whose cache entries are invalidated when this one changes.
    #[serde(default)]
    pub records_to_notify: Vec<String>,
    /// Field whose value is returned by `list` (paired with the primary key).
    #[serde(default)]
    pub list_field: Option<String>,
    /// Optional grouping field for `list`.
    #[serde(default)]
    pub list_group_field: Option<String>,
    /// Field matched by `suggest`.
    #[serde(default)]
    pub suggest_key_field: Option<String>,
    /// Columns returned by `suggest`; defaults to the key field plus primary key.
    #[serde(default)]
    pub suggest_output_fields: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataTypeDef {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// All definitions in one struct for in-memory loading.
#[derive(Clone, Debug, Default)]
pub struct FullConfig {
    pub data_types: Vec<DataTypeDef>,
    pub records: Vec<RecordDef>,
}
