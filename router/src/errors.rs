use crate::backend::BackendError;
use crate::route::RouteKey;
use std::fmt;
use std::path::PathBuf;

/// The request matched the scheme but the rest of it could not be tokenized.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("request does not name a backend type after the protocol prefix")]
    MissingType,
    #[error("argument `{token}` has an empty key")]
    EmptyKey { token: String },
    #[error("request does not carry a `dbversion` argument or property")]
    MissingVersion,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("no backend is registered for {route_key}")]
    NoBackend { route_key: RouteKey },
    #[error("no capability entry for driver {driver_type} {driver_version}")]
    NoCapability {
        driver_type: String,
        driver_version: String,
    },
    #[error("{count} capability entries match driver {driver_type} {driver_version}")]
    AmbiguousCapability {
        driver_type: String,
        driver_version: String,
        count: usize,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("artifact `{location}` not found in any search location")]
    ArtifactMissing { location: String },
    #[error("could not open artifact {path:?}: {message}")]
    Open { path: PathBuf, message: String },
    #[error("entry point `{entry_point}` unavailable in {path:?}: {message}")]
    EntryPoint {
        path: PathBuf,
        entry_point: String,
        message: String,
    },
    #[error("could not instantiate `{entry_point}`: {message}")]
    Instantiate {
        entry_point: String,
        message: String,
    },
}

/// A single problem found while building the registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("could not read {path:?}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("could not parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid backend key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("invalid artifact `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("backend `{key}`: {source}")]
    Artifact { key: String, source: LoadError },
    #[error("backend `{key}`: {source}")]
    Capability { key: String, source: NotFoundError },
}

/// Every issue found during one registry build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

/// Failure of any routing stage after the scheme matched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("malformed request: {0}")]
    Format(#[from] FormatError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    Route(#[from] RouteError),
    /// The backend's own failure, passed through as returned.
    #[error(transparent)]
    Backend(BackendError),
}
