//! Load record and data-type definitions from JSON files.

use std::fs;
use std::path::Path;

use crate::config::{DataTypeDef, FullConfig, RecordDef};
use crate::error::DesignError;

/// Load every `*.rec.json` (one record definition each) and `*.types.json`
/// (array of data-type definitions) under `dir`. Other files are ignored.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<FullConfig, DesignError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir)
        .map_err(|e| DesignError::Load(format!("cannot read {}: {}", dir.display(), e)))?;
    let mut config = FullConfig::default();
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".rec.json") {
            let text = read(&path)?;
            let rec: RecordDef = serde_json::from_str(&text)
                .map_err(|e| DesignError::Load(format!("{}: {}", path.display(), e)))?;
            config.records.push(rec);
        } else if name.ends_with(".types.json") {
            let text = read(&path)?;
            let types: Vec<DataTypeDef> = serde_json::from_str(&text)
                .map_err(|e| DesignError::Load(format!("{}: {}", path.display(), e)))?;
            config.data_types.extend(types);
        }
    }
    tracing::info!(
        records = config.records.len(),
        data_types = config.data_types.len(),
        dir = %dir.display(),
        "config loaded"
    );
    Ok(config)
}

fn read(path: &Path) -> Result<String, DesignError> {
    fs::read_to_string(path)
        .map_err(|e| DesignError::Load(format!("cannot read {}: {}", path.display(), e)))
}
