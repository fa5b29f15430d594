//! Per-call WHERE construction from whichever filter-capable fields have
//! input values, plus optional ORDER BY from reserved inputs.

use serde_json::Value;

use crate::config::{quoted, EngineConfig};
use crate::error::EngineError;
use crate::field::ParseContext;
use crate::handle::Row;
use crate::messages::MessageCollector;
use crate::record::Record;

/// Companion input overriding the comparator for a field: `{field}$cmp`.
pub const COMPARATOR_SUFFIX: &str = "$cmp";
/// Companion input carrying the second operand of `between`: `{field}$to`.
pub const TO_SUFFIX: &str = "$to";
/// Reserved input naming the sort field.
pub const SORT_COLUMN: &str = "_sortColumn";
/// Reserved input: "asc" (default) or "desc".
pub const SORT_ORDER: &str = "_sortOrder";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    Like,
    StartsWith,
    InList,
}

impl Comparator {
    pub fn parse(token: &str) -> Option<Comparator> {
        Some(match token {
            "=" => Comparator::Eq,
            "!=" => Comparator::Ne,
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            "><" => Comparator::Between,
            "~" => Comparator::Like,
            "^" => Comparator::StartsWith,
            "@" => Comparator::InList,
            _ => return None,
        })
    }

    fn sql_op(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            _ => unreachable!("multi-operand comparators render their own SQL"),
        }
    }
}

/// The dynamic tail of a filter query: starts with `" WHERE ..."`, may end
/// with an ORDER BY. Parameters are numbered from $1 (the filter prefix binds
/// nothing).
#[derive(Debug)]
pub struct FilterClause {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Build the WHERE (+ ORDER BY) tail for `record` from caller inputs. Bad
/// field values go to the collector and contribute no condition; a filter
/// that ends up with no conditions is gated by `ok_to_select_all`.
pub fn build(
    record: &Record,
    inputs: &Row,
    ctx: &ParseContext<'_>,
    engine: &EngineConfig,
    msgs: &mut MessageCollector,
) -> Result<FilterClause, EngineError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    for field in record.fields.iter().filter(|f| f.traits().selectable) {
        let Some(raw) = inputs.get(&field.name) else {
            continue;
        };
        if raw.is_null() || raw.as_str().is_some_and(str::is_empty) {
            continue;
        }
        let comparator = match inputs.get(&format!("{}{}", field.name, COMPARATOR_SUFFIX)) {
            Some(Value::String(token)) => match Comparator::parse(token) {
                Some(c) => c,
                None => {
                    msgs.add_error(&field.name, format!("'{}' is not a valid comparator", token));
                    continue;
                }
            },
            _ => Comparator::Eq,
        };
        let column = quoted(&field.external_name);
        match comparator {
            Comparator::InList => {
                let Some(list) = raw.as_str() else {
                    msgs.add_error(&field.name, "in-list value must be a comma-separated string");
                    continue;
                };
                let mut placeholders = Vec::new();
                let mut values = Vec::new();
                let mut ok = true;
                for part in list.split(',') {
                    match field.parse_text(part, ctx, msgs) {
                        Some(v) => {
                            placeholders.push(super::builder::placeholder(
                                params.len() + values.len() + 1,
                                field,
                            ));
                            values.push(v);
                        }
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if ok && !values.is_empty() {
                    conditions.push(format!("{} IN ({})", column, placeholders.join(", ")));
                    params.extend(values);
                }
            }
            Comparator::Between => {
                let Some(from) = field.parse_input(Some(raw), ctx, msgs) else {
                    continue;
                };
                let to_input = inputs.get(&format!("{}{}", field.name, TO_SUFFIX));
                let to = match to_input {
                    Some(v) if !v.is_null() => field.parse_input(Some(v), ctx, msgs),
                    _ => return Err(EngineError::MissingToValue(field.name.clone())),
                };
                let Some(to) = to else { continue };
                let a = super::builder::placeholder(params.len() + 1, field);
                let b = super::builder::placeholder(params.len() + 2, field);
                conditions.push(format!("{} BETWEEN {} AND {}", column, a, b));
                params.push(from);
                params.push(to);
            }
            Comparator::Like | Comparator::StartsWith => {
                let Some(Value::String(text)) = field.parse_input(Some(raw), ctx, msgs) else {
                    continue;
                };
                let escaped = engine.escape_like(&text);
                let pattern = if comparator == Comparator::Like {
                    format!("%{}%", escaped)
                } else {
                    format!("{}%", escaped)
                };
                conditions.push(format!("{} LIKE ${}", column, params.len() + 1));
                params.push(Value::String(pattern));
            }
            simple => {
                let Some(v) = field.parse_input(Some(raw), ctx, msgs) else {
                    continue;
                };
                let ph = super::builder::placeholder(params.len() + 1, field);
                conditions.push(format!("{} {} {}", column, simple.sql_op(), ph));
                params.push(v);
            }
        }
    }

    let mut sql = if conditions.is_empty() {
        // safety rail against accidental full-table scans
        if !record.ok_to_select_all {
            return Err(EngineError::NoFilterCondition(record.name.clone()));
        }
        " WHERE 1 = 1".to_string()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    if let Some(Value::String(sort)) = inputs.get(SORT_COLUMN) {
        match record.field(sort).filter(|f| f.traits().selectable) {
            Some(f) => {
                let desc = inputs
                    .get(SORT_ORDER)
                    .and_then(Value::as_str)
                    .is_some_and(|o| o.eq_ignore_ascii_case("desc"));
                sql.push_str(&format!(
                    " ORDER BY {}{}",
                    quoted(&f.external_name),
                    if desc { " DESC" } else { "" }
                ));
            }
            None => msgs.add_error(SORT_COLUMN, format!("'{}' is not a sortable field", sort)),
        }
    }

    Ok(FilterClause { sql, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparator_tokens() {
        assert_eq!(Comparator::parse("="), Some(Comparator::Eq));
        assert_eq!(Comparator::parse("><"), Some(Comparator::Between));
        assert_eq!(Comparator::parse("@"), Some(Comparator::InList));
        assert_eq!(Comparator::parse("^"), Some(Comparator::StartsWith));
        assert_eq!(Comparator::parse("LIKE"), None);
    }
}
