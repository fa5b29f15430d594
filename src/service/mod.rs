//! CRUD execution and cascading operations over ready records.

mod cascade;
mod crud;

pub use crud::{RecordService, SaveAction, ServiceContext, SAVE_ACTION};
