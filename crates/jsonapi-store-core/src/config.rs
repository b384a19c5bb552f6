//! Store configuration: resource schema and filtering options

use crate::definition::ResourceDefinition;
use crate::error::{Error, Result};
use crate::filter::FilterPredicate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn default_path_separator() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

/// Options for local filtering
#[derive(Clone, Serialize, Deserialize)]
pub struct FilteringConfig {
    /// Separator between segments of a field path
    #[serde(default = "default_path_separator")]
    pub path_separator: String,

    /// Custom operators, matched by name before the built-ins
    #[serde(skip)]
    pub operators: BTreeMap<String, FilterPredicate>,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            path_separator: default_path_separator(),
            operators: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for FilteringConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteringConfig")
            .field("path_separator", &self.path_separator)
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FilteringConfig {
    pub fn custom_operator(&self, name: &str) -> Option<&FilterPredicate> {
        self.operators.get(name)
    }
}

/// Configuration of a store instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub resource_definitions: Vec<ResourceDefinition>,

    #[serde(default)]
    pub filtering: FilteringConfig,

    /// Whether pending changes may be committed
    #[serde(default = "default_true")]
    pub apply_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            resource_definitions: Vec::new(),
            filtering: FilteringConfig::default(),
            apply_enabled: true,
        }
    }
}

impl StoreConfig {
    pub fn new(resource_definitions: Vec<ResourceDefinition>) -> Self {
        Self {
            resource_definitions,
            ..Default::default()
        }
    }

    pub fn with_path_separator(mut self, separator: impl Into<String>) -> Self {
        self.filtering.path_separator = separator.into();
        self
    }

    /// Register a custom filtering operator `(filter_value, field_value) -> bool`
    pub fn with_operator<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.filtering.operators.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            other => {
                return Err(Error::Config(format!(
                    "Unsupported config format: {:?}",
                    other.unwrap_or("<none>")
                )))
            }
        };
        tracing::debug!(
            "Loaded {} resource definitions from {:?}",
            config.resource_definitions.len(),
            path
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.filtering.path_separator.is_empty() {
            return Err(Error::Config("path_separator cannot be empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for definition in &self.resource_definitions {
            if !seen.insert(definition.resource_type.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate resource definition: {}",
                    definition.resource_type
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::RelationType;
    use std::io::Write;

    const TOML_CONFIG: &str = r#"
apply_enabled = false

[filtering]
path_separator = "__"

[[resource_definitions]]
type = "Article"
collectionPath = "articles"

[resource_definitions.attributes]
title = {}

[resource_definitions.relationships.author]
type = "Person"
relationType = "hasOne"
"#;

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml_str(TOML_CONFIG).unwrap();
        assert!(!config.apply_enabled);
        assert_eq!(config.filtering.path_separator, "__");
        let article = &config.resource_definitions[0];
        assert!(article.has_attribute("title"));
        assert_eq!(
            article.relationship("author").unwrap().relation_type,
            RelationType::HasOne
        );
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_json_str("{}").unwrap();
        assert!(config.apply_enabled);
        assert_eq!(config.filtering.path_separator, ".");
        assert!(config.resource_definitions.is_empty());
    }

    #[test]
    fn test_duplicate_definitions_rejected() {
        let json = r#"{ "resource_definitions": [
            { "type": "Article", "collectionPath": "articles" },
            { "type": "Article", "collectionPath": "posts" }
        ] }"#;
        assert!(matches!(StoreConfig::from_json_str(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(TOML_CONFIG.as_bytes()).unwrap();

        let config = StoreConfig::load(file.path()).unwrap();
        assert_eq!(config.resource_definitions.len(), 1);

        let other = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(StoreConfig::load(other.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_custom_operator_registration() {
        let config = StoreConfig::default().with_operator("never", |_, _| false);
        assert!(config.filtering.custom_operator("never").is_some());
        assert!(config.filtering.custom_operator("iexact").is_none());
    }
}
