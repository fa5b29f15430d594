//! Field-level encryption collaborator.

use crate::error::EngineError;

/// Text transform applied to encrypted fields just before a value enters a
/// write parameter list and just after it comes back from a read.
pub trait FieldCipher: Send + Sync {
    fn encrypt(&self, text: &str) -> Result<String, EngineError>;
    fn decrypt(&self, text: &str) -> Result<String, EngineError>;
}
