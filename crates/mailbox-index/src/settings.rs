//! Index settings from the application config directory

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_HEAP_SIZE;

/// Settings filename in the config directory
pub const SETTINGS_FILE: &str = "index.json";

/// Directory under the config directory holding mailbox indexes
const DEFAULT_INDEX_DIR: &str = "indexes";

fn default_heap_size() -> usize {
    DEFAULT_HEAP_SIZE
}

/// Process-wide index settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Where mailbox indexes live; defaults to `<config dir>/indexes`
    #[serde(default)]
    pub index_root: Option<PathBuf>,
    #[serde(default = "default_heap_size")]
    pub writer_heap_bytes: usize,
    /// Analyzer for accounts that don't name one
    #[serde(default)]
    pub default_analyzer: Option<String>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            index_root: None,
            writer_heap_bytes: DEFAULT_HEAP_SIZE,
            default_analyzer: None,
        }
    }
}

impl IndexSettings {
    /// Load `index.json`, using defaults when it doesn't exist
    pub fn load() -> Result<Self> {
        config::load_json_or_default(SETTINGS_FILE)
    }

    pub fn save(&self) -> Result<()> {
        config::save_json(SETTINGS_FILE, self)
    }

    /// The configured index root, or the default under the config directory
    pub fn resolve_index_root(&self) -> Result<PathBuf> {
        match &self.index_root {
            Some(root) => Ok(root.clone()),
            None => config::config_dir()
                .map(|dir| dir.join(DEFAULT_INDEX_DIR))
                .context("Could not determine config directory"),
        }
    }
}
