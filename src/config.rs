//! Storage configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::btree::MAX_DEGREE;
use crate::error::{Error, Result};

/// Default storage directory, relative to the working directory.
pub const DEFAULT_ROOT: &str = "data";

/// Default minimum degree of newly built indexes.
pub const DEFAULT_INDEX_DEGREE: usize = 3;

/// Where tables live and how their indexes are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every table file and index file.
    pub root: PathBuf,

    /// Minimum degree `t` of every B-tree built by the store.
    pub index_degree: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            index_degree: DEFAULT_INDEX_DEGREE,
        }
    }
}

impl StorageConfig {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Sets the minimum degree of indexes built from now on.
    pub fn with_index_degree(mut self, degree: usize) -> Self {
        self.index_degree = degree;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_DEGREE).contains(&self.index_degree) {
            return Err(Error::InvalidConfig(format!(
                "index_degree must be within 2..={MAX_DEGREE}, got {}",
                self.index_degree
            )));
        }
        if self.root.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("root must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.root, PathBuf::from("data"));
        assert_eq!(config.index_degree, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let config = StorageConfig::new("/tmp/db").with_index_degree(1);
        assert_eq!(config.root, PathBuf::from("/tmp/db"));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert!(StorageConfig::new("").validate().is_err());

        let huge = StorageConfig::new("/tmp/db").with_index_degree(MAX_DEGREE + 1);
        assert!(matches!(huge.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: StorageConfig = serde_json::from_str(r#"{"root":"tables"}"#).unwrap();
        assert_eq!(config, StorageConfig::new("tables"));

        let config: StorageConfig = serde_json::from_str(r#"{"index_degree":8}"#).unwrap();
        assert_eq!(config.root, PathBuf::from(DEFAULT_ROOT));
        assert_eq!(config.index_degree, 8);
    }
}
