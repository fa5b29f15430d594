//! recordmap: metadata-driven relational mapping and CRUD SQL synthesis.
//!
//! Records are declared as JSON metadata, readied once into a read-only
//! model with every SQL statement pre-synthesized, then executed through a
//! pluggable database handle.

pub mod cache;
pub mod cipher;
pub mod codes;
pub mod config;
pub mod error;
pub mod field;
pub mod handle;
pub mod messages;
pub mod pg;
pub mod record;
pub mod registry;
pub mod service;
pub mod sql;
pub mod types;

pub use cache::{MemoryCache, RecordCache};
pub use cipher::FieldCipher;
pub use codes::CodeValidator;
pub use config::{load_dir, EngineConfig, FullConfig};
pub use error::{DesignError, EngineError};
pub use handle::{DbHandle, Row, UNKNOWN_ROW_COUNT};
pub use messages::{Message, MessageCollector};
pub use pg::PgHandle;
pub use record::Record;
pub use registry::{ReadyModel, Registry};
pub use service::{RecordService, SaveAction, ServiceContext, SAVE_ACTION};
