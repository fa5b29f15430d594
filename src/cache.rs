//! Read-through cache collaborator keyed by record identity.
//!
//! Primary key is the record-qualified prefix (`module.name`); the secondary
//! key is a list group key or a composite of primary-key values. No cache
//! configured is a permanent miss.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

pub trait RecordCache: Send + Sync {
    fn get(&self, primary: &str, secondary: Option<&str>) -> Option<Value>;
    fn put(&self, primary: &str, secondary: Option<&str>, value: Value);
    /// Remove entries. With no secondary key, removes every entry under the
    /// primary key.
    fn invalidate(&self, primary: &str, secondary: Option<&str>);
}

/// In-process cache for embedded use and tests.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(secondary: Option<&str>) -> String {
        secondary.unwrap_or("").to_string()
    }
}

impl RecordCache for MemoryCache {
    fn get(&self, primary: &str, secondary: Option<&str>) -> Option<Value> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(primary)?.get(&Self::slot(secondary)).cloned()
    }

    fn put(&self, primary: &str, secondary: Option<&str>, value: Value) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .entry(primary.to_string())
            .or_default()
            .insert(Self::slot(secondary), value);
    }

    fn invalidate(&self, primary: &str, secondary: Option<&str>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match secondary {
            Some(s) => {
                if let Some(entries) = inner.get_mut(primary) {
                    entries.remove(s);
                }
            }
            None => {
                inner.remove(primary);
            }
        }
    }
}
