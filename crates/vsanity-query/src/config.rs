//! Query defaults loaded from configuration files.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::options::QueryOptions;

/// Configuration errors not covered by parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file extension is neither `.toml` nor `.json`.
    #[error("unsupported config format: {0} (expected .toml or .json)")]
    UnsupportedFormat(String),
}

/// Query configuration file.
///
/// ```toml
/// [defaults]
/// deduplicate = 500
/// strategy = "server"
///
/// [queries.preview]
/// listen = { includeResult = true }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Options applied to every query binding.
    #[serde(default)]
    pub defaults: QueryOptions,

    /// Named overrides layered on the defaults.
    #[serde(default)]
    pub queries: HashMap<String, QueryOptions>,
}

enum Format {
    Toml,
    Json,
}

fn format_of(path: &Path) -> Result<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string()).into()),
    }
}

impl QueryConfig {
    /// Load config from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        match format {
            Format::Json => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            Format::Toml => Self::from_toml(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
        }
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to a `.toml` or `.json` file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Options for a named query: the defaults with its override applied.
    pub fn for_query(&self, name: &str) -> QueryOptions {
        match self.queries.get(name) {
            Some(overrides) => self.defaults.merge(overrides),
            None => self.defaults.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use vsanity_cache::{Deduplicate, Strategy};

    use super::*;
    use crate::client::ListenOptions;

    const SAMPLE: &str = r#"
[defaults]
deduplicate = 500
strategy = "server"

[queries.preview]
strategy = "client"
listen = { includeResult = true }
"#;

    #[test]
    fn test_from_toml() {
        let config = QueryConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.defaults.deduplicate, Some(Deduplicate::window_ms(500)));
        assert_eq!(config.defaults.strategy, Some(Strategy::Server));
    }

    #[test]
    fn test_for_query_layers_overrides() {
        let config = QueryConfig::from_toml(SAMPLE).unwrap();

        let preview = config.for_query("preview");
        assert_eq!(preview.deduplicate, Some(Deduplicate::window_ms(500)));
        assert_eq!(preview.strategy, Some(Strategy::Client));
        assert_eq!(
            preview.listen_options(),
            Some(ListenOptions::default().with_param("includeResult", true))
        );

        assert_eq!(config.for_query("unknown"), config.defaults);
    }

    #[test]
    fn test_empty_config() {
        let config = QueryConfig::from_toml("").unwrap();
        assert_eq!(config, QueryConfig::default());
    }

    #[test]
    fn test_load_and_save_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vsanity.json");
        let config = QueryConfig {
            defaults: QueryOptions::new().with_deduplicate(true),
            queries: HashMap::new(),
        };

        config.save(&path).unwrap();
        let loaded = QueryConfig::load(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vsanity.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let loaded = QueryConfig::load(&path).unwrap();
        assert_eq!(loaded.defaults.strategy, Some(Strategy::Server));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let err = QueryConfig::load("vsanity.yaml").unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[defaults]\nstrategy = 3").unwrap();

        let err = QueryConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse TOML config"));
    }
}
