use indexmap::IndexMap;
use serde::Deserialize;
use std::fs::File;
use std::path::PathBuf;

/// Settings file for the `dynroute` binary.
///
/// ```yaml
/// sources:
///   - /etc/dynroute
///   - ./driver/backends.yaml
/// defaults:
///   connectTimeout: "10"
/// log_level: debug
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Backend configuration sources, lowest priority first. When empty the
    /// standard locations are searched.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Lowest precedence properties for every request.
    #[serde(default)]
    pub defaults: IndexMap<String, String>,
    pub log_level: Option<String>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        // An empty file deserializes to `null`.
        let data: Option<Config> = serde_yaml::from_reader(file)?;

        Ok(data.unwrap_or_default())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
