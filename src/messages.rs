//! Validation message collector supplied by the caller.
//!
//! Bad input values are never fatal: each failure is recorded here and the
//! offending field resolves to absent. The caller inspects the collector
//! after an operation to decide how to report.

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct Message {
    /// Field the message is about, when it concerns a single field.
    pub field_name: Option<String>,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct MessageCollector {
    messages: Vec<Message>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validation failure for one field.
    pub fn add_error(&mut self, field_name: &str, text: impl Into<String>) {
        self.messages.push(Message {
            field_name: Some(field_name.to_string()),
            text: text.into(),
        });
    }

    /// Record a validation failure not tied to a field.
    pub fn add_general(&mut self, text: impl Into<String>) {
        self.messages.push(Message {
            field_name: None,
            text: text.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
