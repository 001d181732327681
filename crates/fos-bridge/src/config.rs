//! Bridge Configuration

use crate::error::Result;
use serde::Deserialize;

/// Bridge configuration options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Consult the host timing source, record init marks and allow `summary`
    pub profile: bool,

    /// Initial batching flag of each context's command queue
    pub batch_updates: bool,

    /// Maximum number of live execution contexts
    pub max_contexts: usize,

    /// Script heap limit (bytes)
    pub memory_limit: usize,

    /// Extra names pinned in each context's atom table
    pub preintern: Vec<String>,
}

impl BridgeConfig {
    /// Parse a JSON config; missing fields keep their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            profile: false,
            batch_updates: false,
            max_contexts: 16,
            memory_limit: 64 * 1024 * 1024, // 64MB
            preintern: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(r#"{"profile": true, "preintern": ["gridArea"]}"#).unwrap();
        assert!(config.profile);
        assert_eq!(config.preintern, vec!["gridArea".to_string()]);
        assert_eq!(config.max_contexts, BridgeConfig::default().max_contexts);
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(BridgeConfig::from_json("{}").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_invalid_json() {
        let err = BridgeConfig::from_json(r#"{"max_contexts": "many"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }
}
