//! Declarative definitions, JSON loading, and engine-level configuration.

mod loader;
mod types;

pub use loader::load_dir;
pub use types::{DataTypeDef, FieldDef, FieldRole, FullConfig, RecordDef};

/// Engine-level settings passed in at construction. No globals: the engine is
/// instantiable multiple times with different settings.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Schema qualifying every table name, when set.
    pub schema_name: Option<String>,
    /// Generated keys come from named sequences (`nextval`). When false, the
    /// generated key column is left out of the insert and the store's
    /// identity/auto-increment mechanism supplies it.
    pub use_sequences: bool,
    /// Suffix appended to the table name to form the default sequence name.
    pub sequence_suffix: String,
    /// Escape character for LIKE wildcard escaping.
    pub like_escape: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            schema_name: None,
            use_sequences: false,
            sequence_suffix: "_seq".into(),
            like_escape: '\\',
        }
    }
}

impl EngineConfig {
    /// Schema-qualified, quoted table name.
    pub fn qualified_table(&self, table: &str) -> String {
        match &self.schema_name {
            Some(schema) => format!("{}.{}", quoted(schema), quoted(table)),
            None => quoted(table),
        }
    }

    /// Sequence name for a generated key, by convention, unless the record
    /// declares one explicitly.
    pub fn sequence_for(&self, table: &str) -> String {
        format!("{}{}", table, self.sequence_suffix)
    }

    /// Escape LIKE wildcards in a user-supplied match value.
    pub fn escape_like(&self, value: &str) -> String {
        let esc = self.like_escape;
        let mut out = String::with_capacity(value.len() + 4);
        for c in value.chars() {
            if c == '%' || c == '_' || c == esc {
                out.push(esc);
            }
            out.push(c);
        }
        out
    }
}

/// Quote identifier for PostgreSQL (safe: only from config).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_qualification() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.qualified_table("customer"), "\"customer\"");
        cfg.schema_name = Some("app".into());
        assert_eq!(cfg.qualified_table("customer"), "\"app\".\"customer\"");
    }

    #[test]
    fn like_escaping() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.escape_like("50%_off"), "50\\%\\_off");
    }
}
