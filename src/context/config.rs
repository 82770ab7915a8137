use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings applied when a context is built.
///
/// ```json
/// { "id": "orders", "allow_circular_references": false,
///   "required_properties": ["DATABASE_URL"] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Context id. A random uuid is used when absent.
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub allow_circular_references: bool,
    pub allow_definition_overriding: bool,
    /// Keys that must resolve in the environment before a refresh proceeds.
    pub required_properties: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            id: None,
            display_name: None,
            allow_circular_references: true,
            allow_definition_overriding: true,
            required_properties: Vec::new(),
        }
    }
}

impl ContextConfig {
    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("parsing context config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading context config {}", path.display()))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = ContextConfig::from_json_str(r#"{ "id": "orders" }"#).unwrap();
        assert_eq!(config.id.as_deref(), Some("orders"));
        assert!(config.allow_circular_references);
        assert!(config.allow_definition_overriding);
        assert!(config.required_properties.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "allow_circular_references": false, "required_properties": ["DB_URL"] }}"#
        )
        .unwrap();

        let config = ContextConfig::from_file(file.path()).unwrap();
        assert!(!config.allow_circular_references);
        assert_eq!(config.required_properties, vec!["DB_URL".to_string()]);
        assert!(ContextConfig::from_json_str("not json").is_err());
    }
}
