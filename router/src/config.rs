//! Backend configuration sources.
//!
//! Configuration is read from an ordered list of locations declared from
//! lowest to highest priority. Each location is a YAML file or a directory
//! holding [`DEFAULT_FILE_NAME`]:
//!
//! ```yaml
//! backends:
//!   postgresql.9_6: postgresql/42_2_26/libpg_backend.so
//! defaults:
//!   connectTimeout: "10"
//! capabilities:
//!   - backend_type: redis
//!     version: 7.2.0
//!     entry_point: redis_backend_entry
//! ```
//!
//! When several sources define the same key, the one declared last wins.

use crate::capabilities::Capability;
use crate::errors::ConfigIssue;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_NAME: &str = "backends.yaml";

/// Directory name searched next to the executable and in the working directory.
pub const DEFAULT_CONFIG_DIR: &str = "driver";

pub const CONFIG_PATH_ENV: &str = "DYNROUTE_CONFIG_PATH";

/// Contents of a single configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendsFile {
    #[serde(default)]
    pub backends: IndexMap<String, String>,
    #[serde(default)]
    pub defaults: IndexMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl BackendsFile {
    pub fn from_file(path: &Path) -> Result<Self, ConfigIssue> {
        let file = File::open(path).map_err(|e| ConfigIssue::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        // An empty file deserializes to `null`.
        let data: Option<BackendsFile> =
            serde_yaml::from_reader(file).map_err(|e| ConfigIssue::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(data.unwrap_or_default())
    }
}

/// One configuration location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    location: PathBuf,
}

impl ConfigSource {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        ConfigSource {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The file this source reads, if it exists.
    pub fn config_file(&self) -> Option<PathBuf> {
        if self.location.is_dir() {
            let file = self.location.join(DEFAULT_FILE_NAME);
            return file.is_file().then_some(file);
        }
        self.location.is_file().then(|| self.location.clone())
    }

    /// Directory artifact locations are resolved against.
    pub fn base_dir(&self) -> &Path {
        if self.location.is_dir() {
            &self.location
        } else {
            self.location.parent().unwrap_or(Path::new("."))
        }
    }
}

/// Configuration merged from every existing source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedConfig {
    pub backends: IndexMap<String, String>,
    pub defaults: IndexMap<String, String>,
    pub capabilities: Vec<Capability>,
    /// Files that contributed, in merge order.
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    sources: Vec<ConfigSource>,
}

impl ConfigSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source with higher priority than every source added before it.
    pub fn push(mut self, location: impl Into<PathBuf>) -> Self {
        self.sources.push(ConfigSource::new(location));
        self
    }

    /// Bundled directory next to the executable, then `<cwd>/driver`, then
    /// the user location (`user`, falling back to `DYNROUTE_CONFIG_PATH`).
    pub fn standard(user: Option<PathBuf>) -> Self {
        let mut sources = ConfigSources::new();
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            sources = sources.push(exe_dir.join(DEFAULT_CONFIG_DIR));
        }
        if let Ok(cwd) = std::env::current_dir() {
            sources = sources.push(cwd.join(DEFAULT_CONFIG_DIR));
        }
        let user = user.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        if let Some(user) = user {
            sources = sources.push(user);
        }
        tracing::debug!(sources = ?sources.sources, "Configuration sources");
        sources
    }

    /// Sources in declaration order, lowest priority first.
    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// Base directories to search for artifacts, highest priority first.
    pub fn search_dirs(&self) -> impl Iterator<Item = &Path> {
        self.sources.iter().rev().map(ConfigSource::base_dir)
    }

    /// Reads every existing source and merges them, later sources overriding
    /// earlier ones. Read and parse failures are collected into `issues`.
    pub fn load(&self, issues: &mut Vec<ConfigIssue>) -> MergedConfig {
        let mut merged = MergedConfig::default();
        for source in &self.sources {
            let Some(path) = source.config_file() else {
                tracing::debug!(location = ?source.location(), "Skipping missing config source");
                continue;
            };

            match BackendsFile::from_file(&path) {
                Ok(file) => {
                    tracing::info!(path = ?path, backends = file.backends.len(), "Loaded config");
                    merged.backends.extend(file.backends);
                    merged.defaults.extend(file.defaults);
                    merged.capabilities.extend(file.capabilities);
                    merged.files.push(path);
                }
                Err(issue) => issues.push(issue),
            }
        }

        if merged.files.is_empty() {
            tracing::warn!("No configuration file found in any source");
        }
        merged
    }
}
