//! One-time SQL synthesis and per-call filter construction.

pub mod builder;
pub mod filter;

pub use builder::{RecordSql, Synthesis};
pub use filter::{Comparator, FilterClause, COMPARATOR_SUFFIX, SORT_COLUMN, SORT_ORDER, TO_SUFFIX};
