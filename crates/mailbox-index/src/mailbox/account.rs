//! Account-level settings consulted by the index

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Account configuration lookup
///
/// Lookups may fail (e.g. a directory service is unreachable). Callers log
/// the failure and fall back to defaults.
pub trait AccountConfig: Send + Sync {
    fn account_id(&self) -> &str;

    /// Name of the text analyzer, `None` for the default
    fn text_analyzer(&self) -> Result<Option<String>>;

    /// Number of in-order items to batch before committing; 0 disables
    fn batched_indexing_size(&self) -> Result<usize>;
}

/// Fixed account settings, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAccountConfig {
    pub account_id: String,
    #[serde(default)]
    pub text_analyzer: Option<String>,
    #[serde(default)]
    pub batched_indexing_size: usize,
}

impl StaticAccountConfig {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    pub fn with_analyzer(mut self, name: impl Into<String>) -> Self {
        self.text_analyzer = Some(name.into());
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batched_indexing_size = size;
        self
    }
}

impl AccountConfig for StaticAccountConfig {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn text_analyzer(&self) -> Result<Option<String>> {
        Ok(self.text_analyzer.clone())
    }

    fn batched_indexing_size(&self) -> Result<usize> {
        Ok(self.batched_indexing_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let config: StaticAccountConfig =
            serde_json::from_str(r#"{"account_id": "user@example.com"}"#).unwrap();
        assert_eq!(config.account_id(), "user@example.com");
        assert_eq!(config.text_analyzer().unwrap(), None);
        assert_eq!(config.batched_indexing_size().unwrap(), 0);
    }

    #[test]
    fn test_builder() {
        let config = StaticAccountConfig::new("a").with_analyzer("english").with_batch_size(20);
        assert_eq!(config.text_analyzer().unwrap().as_deref(), Some("english"));
        assert_eq!(config.batched_indexing_size().unwrap(), 20);
    }
}
