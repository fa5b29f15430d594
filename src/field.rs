//! Field: one attribute/column of a record, with parsing and validation.
//!
//! Role behavior is a strategy table computed once per role and consulted by
//! lookup, instead of branching on the role at every use site.

use serde_json::Value;

use crate::codes::CodeValidator;
use crate::config::{FieldDef, FieldRole};
use crate::error::DesignError;
use crate::handle::Row;
use crate::messages::MessageCollector;
use crate::types::DataType;

/// Which audit column a role contributes, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditRole {
    CreatedBy,
    CreatedAt,
    ModifiedBy,
    ModifiedAt,
}

/// Behavior descriptor for a field role.
#[derive(Clone, Copy, Debug)]
pub struct RoleTraits {
    /// Appears in the insert column list.
    pub insertable: bool,
    /// Appears in the update SET list.
    pub updatable: bool,
    /// Appears in select projections (i.e. is a real column).
    pub selectable: bool,
    /// Part of the primary key.
    pub is_key: bool,
    /// Links to the parent record's key.
    pub is_parent_key: bool,
    /// Value is taken from caller input; non-extractable fields always parse
    /// to absent.
    pub extractable: bool,
    /// Value is a literal timestamp expression in SQL, never a bound parameter.
    pub timestamp_literal: bool,
    pub audit: Option<AuditRole>,
}

const fn traits_of(role: FieldRole) -> RoleTraits {
    const fn t(
        insertable: bool,
        updatable: bool,
        selectable: bool,
        is_key: bool,
        is_parent_key: bool,
        extractable: bool,
        timestamp_literal: bool,
        audit: Option<AuditRole>,
    ) -> RoleTraits {
        RoleTraits {
            insertable,
            updatable,
            selectable,
            is_key,
            is_parent_key,
            extractable,
            timestamp_literal,
            audit,
        }
    }
    match role {
        FieldRole::Data => t(true, true, true, false, false, true, false, None),
        FieldRole::PrimaryKey => t(true, false, true, true, false, true, false, None),
        FieldRole::PrimaryAndParentKey => t(true, false, true, true, true, true, false, None),
        FieldRole::ParentKey => t(true, false, true, false, true, true, false, None),
        FieldRole::CreatedBy => {
            t(true, false, true, false, false, true, false, Some(AuditRole::CreatedBy))
        }
        FieldRole::CreatedAt => {
            t(true, false, true, false, false, false, true, Some(AuditRole::CreatedAt))
        }
        FieldRole::ModifiedBy => {
            t(true, true, true, false, false, true, false, Some(AuditRole::ModifiedBy))
        }
        FieldRole::ModifiedAt => {
            t(true, true, true, false, false, false, true, Some(AuditRole::ModifiedAt))
        }
        FieldRole::ValueArray => t(false, false, false, false, false, true, false, None),
        FieldRole::ChildRecord | FieldRole::ChildRecordArray => {
            t(false, false, false, false, false, false, false, None)
        }
        FieldRole::ViewOnly => t(false, false, true, false, false, false, false, None),
        FieldRole::Temporary => t(false, false, false, false, false, true, false, None),
    }
}

/// Everything parsing needs beyond the field itself: runtime parameter values
/// for named defaults, and the optional common-code collaborator.
#[derive(Clone, Copy, Default)]
pub struct ParseContext<'a> {
    pub runtime_params: Option<&'a Row>,
    pub codes: Option<&'a dyn CodeValidator>,
}

/// A fully resolved field. Immutable after the readiness pass: every derived
/// attribute here is computed exactly once.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub external_name: String,
    pub role: FieldRole,
    pub data_type: DataType,
    pub nullable: bool,
    pub required: bool,
    pub encrypted: bool,
    pub immutable: bool,
    pub width: Option<u32>,
    pub default_value: Option<Value>,
    pub default_param: Option<String>,
    /// Parsed enumerated values as ordered (value, label) pairs.
    pub valid_values: Option<Vec<(String, String)>>,
    pub code_set: Option<String>,
    pub based_on_field: Option<String>,
    pub other_field: Option<String>,
    pub from_field: Option<String>,
    /// For parent-key roles: name of the linked field in the parent record.
    pub parent_field: Option<String>,
}

impl Field {
    /// Build a resolved field from its definition. `referred` is the resolved
    /// field in another record this definition defers to, already readied by
    /// the registry; `data_type` is this field's own resolution, if any.
    pub fn from_def(
        def: &FieldDef,
        data_type: Option<DataType>,
        referred: Option<&Field>,
        record_name: &str,
    ) -> Result<Field, DesignError> {
        let data_type = match (data_type, referred) {
            (Some(dt), _) => dt,
            (None, Some(r)) => r.data_type.clone(),
            (None, None) => {
                return Err(DesignError::UnknownDataType {
                    record: record_name.to_string(),
                    field: def.name.clone(),
                    data_type: def.data_type.clone().unwrap_or_default(),
                })
            }
        };
        let valid_values = match (&def.valid_values, referred) {
            (Some(text), _) => Some(parse_valid_values(text)),
            (None, Some(r)) => r.valid_values.clone(),
            (None, None) => None,
        };
        let default_value = match &def.default_value {
            Some(text) => Some(data_type.parse_text(text).map_err(|e| {
                DesignError::UnresolvedReference {
                    record: record_name.to_string(),
                    reference: format!("default for field {}: {}", def.name, e),
                }
            })?),
            None => referred.and_then(|r| r.default_value.clone()),
        };
        Ok(Field {
            name: def.name.clone(),
            external_name: def.external_name.clone().unwrap_or_else(|| def.name.clone()),
            role: def.role,
            data_type,
            nullable: def.nullable,
            required: def.required,
            encrypted: def.encrypted,
            immutable: def.immutable,
            width: def.width,
            default_value,
            default_param: def.default_param.clone(),
            valid_values,
            code_set: def.code_set.clone(),
            based_on_field: def.based_on_field.clone(),
            other_field: def.other_field.clone(),
            from_field: def.from_field.clone(),
            parent_field: def.parent_field.clone(),
        })
    }

    pub fn traits(&self) -> RoleTraits {
        traits_of(self.role)
    }

    /// Appears in the update SET list: role allows it and the field is not
    /// marked immutable-after-insert.
    pub fn is_updatable(&self) -> bool {
        self.traits().updatable && !self.immutable
    }

    /// Declares at least one cross-field rule.
    pub fn has_inter_field_rule(&self) -> bool {
        self.based_on_field.is_some() || self.other_field.is_some() || self.from_field.is_some()
    }

    /// Parse a value from caller input, applying the default resolution order:
    /// explicit input, named runtime parameter, static default, absent. A
    /// required field with no value contributes a validation message. Returns
    /// `None` for absent; never fails for ordinary bad input.
    pub fn parse_input(
        &self,
        input: Option<&Value>,
        ctx: &ParseContext<'_>,
        msgs: &mut MessageCollector,
    ) -> Option<Value> {
        if !self.traits().extractable {
            return None;
        }
        let supplied = match input {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        };
        let from_param = supplied.or_else(|| {
            self.default_param
                .as_deref()
                .and_then(|p| ctx.runtime_params.and_then(|params| params.get(p)))
        });
        let candidate = match from_param {
            Some(v) => Some(v.clone()),
            None => self.default_value.clone(),
        };
        let Some(candidate) = candidate else {
            if self.required {
                msgs.add_error(&self.name, format!("{} is required", self.name));
            }
            return None;
        };
        if self.role == FieldRole::ValueArray {
            return self.parse_array(&candidate, msgs);
        }
        self.parse_one(&candidate, ctx, msgs)
    }

    /// Parse a textual value (e.g. from a flat-file row or query string).
    pub fn parse_text(
        &self,
        raw: &str,
        ctx: &ParseContext<'_>,
        msgs: &mut MessageCollector,
    ) -> Option<Value> {
        self.parse_one(&Value::String(raw.to_string()), ctx, msgs)
    }

    /// Parse a structural array-of-value input; every element must parse.
    pub fn parse_array(&self, input: &Value, msgs: &mut MessageCollector) -> Option<Value> {
        let Value::Array(items) = input else {
            msgs.add_error(&self.name, format!("{} must be an array", self.name));
            return None;
        };
        let ctx = ParseContext::default();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.parse_one(item, &ctx, msgs)?);
        }
        Some(Value::Array(out))
    }

    fn parse_one(
        &self,
        v: &Value,
        ctx: &ParseContext<'_>,
        msgs: &mut MessageCollector,
    ) -> Option<Value> {
        let parsed = match self.data_type.parse_object(v) {
            Ok(p) => p,
            Err(e) => {
                msgs.add_error(&self.name, e);
                return None;
            }
        };
        if let Some(width) = self.width {
            if let Value::String(s) = &parsed {
                if s.len() > width as usize {
                    msgs.add_error(
                        &self.name,
                        format!("{} must fit in {} characters", self.name, width),
                    );
                    return None;
                }
            }
        }
        if let Some(values) = &self.valid_values {
            let as_text = value_as_text(&parsed);
            if !values.iter().any(|(val, _)| *val == as_text) {
                msgs.add_error(&self.name, format!("'{}' is not a valid value", as_text));
                return None;
            }
        }
        if let Some(code_set) = &self.code_set {
            if let Some(codes) = ctx.codes {
                if !codes.is_valid(code_set, &value_as_text(&parsed)) {
                    msgs.add_error(
                        &self.name,
                        format!("'{}' is not a valid {} code", value_as_text(&parsed), code_set),
                    );
                    return None;
                }
            }
        }
        Some(parsed)
    }
}

/// "a:Label A,b:Label B" or bare "a,b" into ordered (value, label) pairs.
fn parse_valid_values(text: &str) -> Vec<(String, String)> {
    text.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| match part.split_once(':') {
            Some((v, label)) => (v.trim().to_string(), label.trim().to_string()),
            None => (part.trim().to_string(), part.trim().to_string()),
        })
        .collect()
}

fn value_as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
