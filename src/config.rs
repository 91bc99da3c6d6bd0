//! Database configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, TsdbError};

/// File name of the schema description inside a database directory
pub const DEFAULT_SCHEMA_FILE: &str = "relations";

/// On-disk variant used when committing tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPolicy {
    /// Keep whichever variant a table was loaded from; new tables are plain
    #[default]
    Keep,
    /// Always write `.gz` files
    Always,
    /// Always write plain files
    Never,
}

/// Configuration for opening a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Schema description file name
    pub schema_file: String,
    /// Compression applied on commit
    pub compression: CompressionPolicy,
    /// Buffered result rows before a sink commits automatically (0 = at end)
    pub buffer_size: usize,
    /// Table receiving a placeholder row for items whose processing failed
    pub placeholder_table: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            schema_file: DEFAULT_SCHEMA_FILE.to_string(),
            compression: CompressionPolicy::Keep,
            buffer_size: 0,
            placeholder_table: None,
        }
    }
}

impl DatabaseConfig {
    /// Load a configuration from a JSON file; missing keys take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| TsdbError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| TsdbError::corrupt(path, format!("invalid configuration: {}", e)))
    }

    /// Compression for a table currently stored as `compressed`
    pub fn compress(&self, compressed: bool) -> bool {
        match self.compression {
            CompressionPolicy::Keep => compressed,
            CompressionPolicy::Always => true,
            CompressionPolicy::Never => false,
        }
    }
}
