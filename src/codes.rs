//! Common-code validation collaborator.

/// Checks a value against an externally managed code set (e.g. country codes).
/// A mismatch is invalid input, never a system error.
pub trait CodeValidator: Send + Sync {
    fn is_valid(&self, code_set: &str, value: &str) -> bool;
}
