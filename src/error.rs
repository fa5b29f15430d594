//! Two-tier typed errors: design-time (fatal at startup) and runtime.

use thiserror::Error;

/// Configuration/design errors detected during the readiness pass.
/// Any of these means the record definitions themselves are broken; the
/// application should refuse to start.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("record {record}: duplicate field name '{field}'")]
    DuplicateField { record: String, field: String },
    #[error("record {record}: duplicate column name '{column}'")]
    DuplicateColumn { record: String, column: String },
    #[error("record {record}: duplicate {role} field ('{field}' conflicts with an earlier declaration)")]
    DuplicateAuditRole {
        record: String,
        role: &'static str,
        field: String,
    },
    #[error("record {record}: generated key requires exactly one numeric primary-key field")]
    GeneratedKeyShape { record: String },
    #[error("record {record}: timestamp check requires exactly one modifiedAt field of timestamp type")]
    TimestampCheckWithoutField { record: String },
    #[error("record {record}, field {field}: unknown data type '{data_type}'")]
    UnknownDataType {
        record: String,
        field: String,
        data_type: String,
    },
    #[error("record {record}: reference to undefined record '{reference}'")]
    UnknownRecord { record: String, reference: String },
    #[error("record {record}: unresolved reference: {reference}")]
    UnresolvedReference { record: String, reference: String },
    #[error("record {record} refers to itself as its default reference")]
    SelfReference { record: String },
    #[error("cyclic record references: {chain}")]
    CyclicReference { chain: String },
    #[error("config load: {0}")]
    Load(String),
}

/// Runtime errors raised during CRUD execution. These propagate to the caller,
/// who decides whether to present them as business failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error("record {0} is read-only")]
    ReadOnly(String),
    #[error("record {0} has no primary key; keyed operation is not possible")]
    NoPrimaryKey(String),
    #[error("record {0}: timestamp check is enabled but no timestamp value was supplied")]
    MissingTimestamp(String),
    #[error("record {0}: row was changed by another transaction (zero rows affected under timestamp check)")]
    ConcurrentModification(String),
    #[error("field {0}: 'between' comparator requires a companion to-value")]
    MissingToValue(String),
    #[error("record {0}: no filter condition supplied and unconditional select is not allowed")]
    NoFilterCondition(String),
    #[error("cipher: {0}")]
    Cipher(String),
    #[error("execution handle: {0}")]
    Handle(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}
