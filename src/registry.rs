//! Readiness pass: resolves references across records, guards against cycles,
//! and produces the read-only model used for the rest of the process.
//!
//! The cycle guard is an explicit pending/finished tracker owned by one
//! `build` call and threaded through the recursion; it is never shared
//! across threads and is dropped on every exit path.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::config::{EngineConfig, FullConfig};
use crate::error::DesignError;
use crate::field::Field;
use crate::record::Record;
use crate::types::DataType;

pub struct Registry {
    config: FullConfig,
    engine: EngineConfig,
    types: HashMap<String, DataType>,
}

/// All records readied, keyed by name. Read-only after `build`; safe for
/// unsynchronized concurrent reads.
#[derive(Clone, Debug)]
pub struct ReadyModel {
    pub engine: EngineConfig,
    records: HashMap<String, Arc<Record>>,
}

impl ReadyModel {
    pub fn record(&self, name: &str) -> Option<&Arc<Record>> {
        self.records.get(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.values()
    }
}

#[derive(Default)]
struct ReadyTracker {
    /// Records whose readiness pass is in progress, outermost first.
    pending: Vec<String>,
    finished: HashMap<String, Arc<Record>>,
}

impl Registry {
    pub fn new(config: FullConfig, engine: EngineConfig) -> Result<Registry, DesignError> {
        let mut types: HashMap<String, DataType> = DataType::builtins()
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        for def in &config.data_types {
            let pattern = match &def.pattern {
                Some(p) => Some(Regex::new(p).map_err(|e| {
                    DesignError::Load(format!("data type {}: bad pattern: {}", def.name, e))
                })?),
                None => None,
            };
            let dt = DataType {
                name: def.name.clone(),
                value_type: def.value_type,
                min_length: def.min_length,
                max_length: def.max_length,
                min_value: def.min_value,
                max_value: def.max_value,
                pattern,
            };
            if types.insert(def.name.clone(), dt).is_some() && !def.name.starts_with('_') {
                return Err(DesignError::Load(format!(
                    "duplicate data type '{}'",
                    def.name
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for rec in &config.records {
            if !seen.insert(rec.name.as_str()) {
                return Err(DesignError::Load(format!(
                    "duplicate record '{}'",
                    rec.name
                )));
            }
        }
        Ok(Registry {
            config,
            engine,
            types,
        })
    }

    /// Ready every record, then verify cross-record relationships. The
    /// tracker lives only for this call.
    pub fn build(self) -> Result<ReadyModel, DesignError> {
        let mut tracker = ReadyTracker::default();
        let names: Vec<String> = self.config.records.iter().map(|r| r.name.clone()).collect();
        for name in &names {
            self.ready_record(name, &mut tracker)?;
        }
        let records = tracker.finished;
        for record in records.values() {
            self.check_relationships(record, &records)?;
        }
        tracing::info!(records = records.len(), "model ready");
        Ok(ReadyModel {
            engine: self.engine,
            records,
        })
    }

    fn ready_record(
        &self,
        name: &str,
        tracker: &mut ReadyTracker,
    ) -> Result<Arc<Record>, DesignError> {
        if let Some(done) = tracker.finished.get(name) {
            return Ok(done.clone());
        }
        if let Some(pos) = tracker.pending.iter().position(|p| p == name) {
            let chain = &tracker.pending[pos..];
            if chain.len() == 1 {
                return Err(DesignError::SelfReference {
                    record: name.to_string(),
                });
            }
            let mut listed = chain.to_vec();
            listed.push(name.to_string());
            return Err(DesignError::CyclicReference {
                chain: listed.join(" -> "),
            });
        }
        let def = self
            .config
            .records
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| DesignError::UnknownRecord {
                record: tracker
                    .pending
                    .last()
                    .cloned()
                    .unwrap_or_else(|| name.to_string()),
                reference: name.to_string(),
            })?;

        tracker.pending.push(name.to_string());
        let mut fields = Vec::with_capacity(def.fields.len());
        for fdef in &def.fields {
            let own_type = match &fdef.data_type {
                Some(t) => Some(self.types.get(t).cloned().ok_or_else(|| {
                    DesignError::UnknownDataType {
                        record: name.to_string(),
                        field: fdef.name.clone(),
                        data_type: t.clone(),
                    }
                })?),
                None if fdef.referred_record.is_none() => self.types.get("_text").cloned(),
                None => None,
            };
            let referred_record = match &fdef.referred_record {
                Some(target) => Some(self.ready_record(target, tracker)?),
                None => None,
            };
            let referred = match (&referred_record, &fdef.referred_field) {
                (Some(rec), referred_field) => {
                    let field_name = referred_field.as_deref().unwrap_or(&fdef.name);
                    Some(rec.field(field_name).ok_or_else(|| {
                        DesignError::UnresolvedReference {
                            record: name.to_string(),
                            reference: format!(
                                "field {} refers to {}.{} which is not defined",
                                fdef.name, rec.name, field_name
                            ),
                        }
                    })?)
                }
                (None, _) => None,
            };
            fields.push(Field::from_def(fdef, own_type, referred, name)?);
        }
        let record = Arc::new(Record::assemble(def, fields, &self.engine)?);
        tracker.pending.pop();
        tracker
            .finished
            .insert(name.to_string(), record.clone());
        Ok(record)
    }

    /// Declared child/sibling references must resolve, and every child's
    /// parent-key fields must link to real fields in this record.
    fn check_relationships(
        &self,
        record: &Record,
        records: &HashMap<String, Arc<Record>>,
    ) -> Result<(), DesignError> {
        let children = record
            .child_records_to_read
            .iter()
            .chain(&record.child_records_to_save);
        for child_name in children {
            let child =
                records
                    .get(child_name)
                    .ok_or_else(|| DesignError::UnknownRecord {
                        record: record.name.clone(),
                        reference: child_name.clone(),
                    })?;
            if child.parent_keys.is_empty() {
                return Err(DesignError::UnresolvedReference {
                    record: record.name.clone(),
                    reference: format!("child record {} declares no parent-key fields", child_name),
                });
            }
            for &idx in &child.parent_keys {
                let child_field = &child.fields[idx];
                let linked = child_field
                    .parent_field
                    .as_deref()
                    .unwrap_or(&child_field.name);
                if record.field(linked).is_none() {
                    return Err(DesignError::UnresolvedReference {
                        record: record.name.clone(),
                        reference: format!(
                            "child {} links {} to missing parent field {}",
                            child_name, child_field.name, linked
                        ),
                    });
                }
            }
        }
        for sibling in &record.records_to_notify {
            if !records.contains_key(sibling) {
                return Err(DesignError::UnknownRecord {
                    record: record.name.clone(),
                    reference: sibling.clone(),
                });
            }
        }
        Ok(())
    }
}
