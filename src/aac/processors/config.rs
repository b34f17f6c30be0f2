use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aac::processors::error::Result;
use crate::aac::processors::model::GridLayout;

/// Settings shared by every processor. Every field has a default so a partial
/// JSON document (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Symbol library name → directory holding its images.
    pub symbol_libraries: BTreeMap<String, PathBuf>,
    /// Grid used for generated pages that carry no layout of their own.
    pub default_rows: u32,
    pub default_columns: u32,
    /// Language written when a tree carries none.
    pub default_language: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol_libraries: BTreeMap::new(),
            default_rows: 4,
            default_columns: 4,
            default_language: None,
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn default_grid(&self) -> GridLayout {
        GridLayout::new(self.default_rows.max(1), self.default_columns.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"symbol_libraries": {"WIDGIT": "/symbols/widgit"}}"#)
                .expect("settings parse");
        assert_eq!(settings.default_columns, 4);
        assert_eq!(settings.default_grid(), GridLayout::new(4, 4));
        assert_eq!(
            settings.symbol_libraries.get("WIDGIT"),
            Some(&PathBuf::from("/symbols/widgit"))
        );
    }
}
