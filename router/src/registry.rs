//! The versioned backend registry.
//!
//! The registry is built once from merged configuration and is immutable
//! afterwards. Each [`BackendDescriptor`] carries a load slot that only the
//! [`IsolatedLoader`](crate::loader::IsolatedLoader) writes to.

use crate::capabilities::{Capability, CapabilityTable};
use crate::config::ConfigSources;
use crate::errors::{ConfigError, ConfigIssue, LoadError, NotFoundError};
use crate::loader::LoadSlot;
use crate::metrics_defs::{REGISTRY_BACKENDS, REGISTRY_BUILD};
use crate::properties::PropertyBag;
use crate::route::{RouteKey, normalize_version};
use shared::{counter, gauge};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const KEY_SEPARATOR: char = '.';
const LOCATION_SEPARATOR: char = '/';
/// `<driver type>/<driver version>/<file>`
const LOCATION_SEGMENTS: usize = 3;

/// Where a backend's code lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Location as written in the configuration.
    pub location: String,
    pub driver_type: String,
    pub driver_version: String,
    /// The existing file the location resolved to.
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct BackendDescriptor {
    route_key: RouteKey,
    artifact: ArtifactRef,
    entry_point: String,
    slot: LoadSlot,
}

impl BackendDescriptor {
    pub fn new(
        route_key: RouteKey,
        artifact: ArtifactRef,
        entry_point: impl Into<String>,
    ) -> Self {
        BackendDescriptor {
            route_key,
            artifact,
            entry_point: entry_point.into(),
            slot: LoadSlot::default(),
        }
    }

    pub fn route_key(&self) -> &RouteKey {
        &self.route_key
    }

    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub(crate) fn slot(&self) -> &LoadSlot {
        &self.slot
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.get().is_some()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    descriptors: Vec<Arc<BackendDescriptor>>,
    defaults: PropertyBag,
}

impl Registry {
    /// A registry from descriptors already in registration order.
    pub fn new(descriptors: Vec<BackendDescriptor>, defaults: PropertyBag) -> Self {
        Registry {
            descriptors: descriptors.into_iter().map(Arc::new).collect(),
            defaults,
        }
    }

    pub fn descriptors(&self) -> &[Arc<BackendDescriptor>] {
        &self.descriptors
    }

    /// Properties from the `defaults` sections of the configuration.
    pub fn defaults(&self) -> &PropertyBag {
        &self.defaults
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Exact match on type, then on version. When several descriptors match,
    /// the first registered one is returned.
    pub fn resolve(
        &self,
        route_key: &RouteKey,
    ) -> Result<&Arc<BackendDescriptor>, NotFoundError> {
        self.descriptors
            .iter()
            .filter(|d| d.route_key.backend_type == route_key.backend_type)
            .find(|d| d.route_key.version == route_key.version)
            .ok_or_else(|| NotFoundError::NoBackend {
                route_key: route_key.clone(),
            })
    }
}

pub struct RegistryBuilder {
    sources: ConfigSources,
    capabilities: Vec<Capability>,
    artifact_suffix: String,
}

impl RegistryBuilder {
    pub fn new(sources: ConfigSources) -> Self {
        RegistryBuilder {
            sources,
            capabilities: CapabilityTable::builtin().entries().to_vec(),
            artifact_suffix: std::env::consts::DLL_SUFFIX.to_string(),
        }
    }

    /// Replaces the base capability table. Capabilities from configuration
    /// files are added on top of it.
    pub fn capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn artifact_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.artifact_suffix = suffix.into();
        self
    }

    /// Loads and validates every source. All problems are reported together.
    pub fn build(&self) -> Result<Registry, ConfigError> {
        let mut issues = Vec::new();
        let merged = self.sources.load(&mut issues);

        let mut capabilities = self.capabilities.clone();
        capabilities.extend(merged.capabilities);
        let table = match CapabilityTable::new(capabilities) {
            Ok(table) => Some(table),
            Err(source) => {
                issues.push(ConfigIssue::Capability {
                    key: "capabilities".to_string(),
                    source,
                });
                None
            }
        };

        let mut descriptors = Vec::with_capacity(merged.backends.len());
        for (key, value) in &merged.backends {
            match self.decode_entry(key, value, table.as_ref()) {
                Ok(Some(descriptor)) => descriptors.push(descriptor),
                Ok(None) => {}
                Err(issue) => issues.push(issue),
            }
        }

        if !issues.is_empty() {
            counter!(REGISTRY_BUILD, "outcome" => "error").increment(1);
            for issue in &issues {
                tracing::error!(%issue, "Invalid backend configuration");
            }
            return Err(ConfigError { issues });
        }

        counter!(REGISTRY_BUILD, "outcome" => "ok").increment(1);
        gauge!(REGISTRY_BACKENDS).set(descriptors.len() as f64);
        for descriptor in &descriptors {
            tracing::debug!(
                route_key = %descriptor.route_key,
                artifact = ?descriptor.artifact.path,
                entry_point = %descriptor.entry_point,
                "Registered backend"
            );
        }

        Ok(Registry::new(
            descriptors,
            merged.defaults.into_iter().collect(),
        ))
    }

    /// `Ok(None)` only when the capability table itself was invalid; that
    /// issue is already recorded.
    fn decode_entry(
        &self,
        key: &str,
        value: &str,
        table: Option<&CapabilityTable>,
    ) -> Result<Option<BackendDescriptor>, ConfigIssue> {
        let route_key = decode_key(key)?;
        let (driver_type, driver_version) = self.decode_value(key, value)?;

        let path = find_artifact(self.sources.search_dirs(), value).ok_or_else(|| {
            ConfigIssue::Artifact {
                key: key.to_string(),
                source: LoadError::ArtifactMissing {
                    location: value.to_string(),
                },
            }
        })?;

        let Some(table) = table else {
            return Ok(None);
        };
        let entry_point = table
            .entry_point(&driver_type, &driver_version)
            .map_err(|source| ConfigIssue::Capability {
                key: key.to_string(),
                source,
            })?;

        let artifact = ArtifactRef {
            location: value.to_string(),
            driver_type,
            driver_version,
            path,
        };
        Ok(Some(BackendDescriptor::new(route_key, artifact, entry_point)))
    }

    fn decode_value(&self, key: &str, value: &str) -> Result<(String, String), ConfigIssue> {
        let invalid = |reason: String| ConfigIssue::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };

        let segments: Vec<&str> = value.split(LOCATION_SEPARATOR).collect();
        if segments.len() != LOCATION_SEGMENTS {
            return Err(invalid(format!(
                "expected {LOCATION_SEGMENTS} path segments (type/version/file), found {}",
                segments.len()
            )));
        }
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(invalid("path segments must not be empty".to_string()));
        }
        if !value.ends_with(self.artifact_suffix.as_str()) {
            return Err(invalid(format!("must end with `{}`", self.artifact_suffix)));
        }

        Ok((segments[0].to_string(), normalize_version(segments[1])))
    }
}

/// `<type>.<version>` where the version uses `_` for `.`.
fn decode_key(key: &str) -> Result<RouteKey, ConfigIssue> {
    let invalid = |reason: &str| ConfigIssue::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let (backend_type, version) = key
        .split_once(KEY_SEPARATOR)
        .ok_or_else(|| invalid("expected `<type>.<version>`"))?;
    if backend_type.is_empty() {
        return Err(invalid("empty type"));
    }
    if version.is_empty() {
        return Err(invalid("empty version"));
    }
    Ok(RouteKey::new(backend_type, normalize_version(version)))
}

fn find_artifact<'a>(
    mut dirs: impl Iterator<Item = &'a Path>,
    location: &str,
) -> Option<PathBuf> {
    dirs.find_map(|dir| {
        let candidate = dir.join(location);
        candidate.is_file().then_some(candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FILE_NAME;
    use std::fs;

    const SUFFIX: &str = ".so";

    fn touch(base: &Path, location: &str) {
        let path = base.join(location);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn write_config(dir: &Path, yaml: &str) {
        fs::write(dir.join(DEFAULT_FILE_NAME), yaml).unwrap();
    }

    fn builder(sources: ConfigSources) -> RegistryBuilder {
        RegistryBuilder::new(sources).artifact_suffix(SUFFIX)
    }

    #[test]
    fn test_build_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "postgresql/42_2_26/libpg.so");
        touch(dir.path(), "mysql/8_0_19/libmysql.so");
        write_config(
            dir.path(),
            r#"
backends:
  postgresql.9_6: postgresql/42_2_26/libpg.so
  mysql.8_0_19: mysql/8_0_19/libmysql.so
defaults:
  loginTimeout: "5"
"#,
        );

        let registry = builder(ConfigSources::new().push(dir.path()))
            .build()
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.defaults().get("loginTimeout"), Some("5"));

        let descriptor = registry.resolve(&RouteKey::new("postgresql", "9.6")).unwrap();
        assert_eq!(descriptor.entry_point(), "postgresql_backend_entry");
        assert_eq!(descriptor.artifact().driver_version, "42.2.26");
        assert_eq!(
            descriptor.artifact().path,
            dir.path().join("postgresql/42_2_26/libpg.so")
        );
        assert!(!descriptor.is_loaded());

        let descriptor = registry.resolve(&RouteKey::new("mysql", "8.0.19")).unwrap();
        assert_eq!(descriptor.entry_point(), "mysql_cj_backend_entry");
    }

    #[test]
    fn test_higher_priority_source_wins() {
        let low = tempfile::tempdir().unwrap();
        let high = tempfile::tempdir().unwrap();
        touch(low.path(), "postgresql/42_1_1/driverA.so");
        touch(high.path(), "postgresql/42_2_26/driverB.so");
        write_config(
            low.path(),
            "backends:\n  postgres.9_6: postgresql/42_1_1/driverA.so\n",
        );
        write_config(
            high.path(),
            "backends:\n  postgres.9_6: postgresql/42_2_26/driverB.so\n",
        );

        let registry = builder(ConfigSources::new().push(low.path()).push(high.path()))
            .build()
            .unwrap();

        assert_eq!(registry.len(), 1);
        let descriptor = registry.resolve(&RouteKey::new("postgres", "9.6")).unwrap();
        assert_eq!(descriptor.artifact().location, "postgresql/42_2_26/driverB.so");
        assert_eq!(
            descriptor.artifact().path,
            high.path().join("postgresql/42_2_26/driverB.so")
        );
    }

    #[test]
    fn test_artifact_found_in_lower_priority_dir() {
        let bundled = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        touch(bundled.path(), "mysql/5_1_47/libmysql.so");
        write_config(user.path(), "backends:\n  mysql.5_1_47: mysql/5_1_47/libmysql.so\n");

        let registry = builder(ConfigSources::new().push(bundled.path()).push(user.path()))
            .build()
            .unwrap();
        let descriptor = registry.resolve(&RouteKey::new("mysql", "5.1.47")).unwrap();
        assert_eq!(
            descriptor.artifact().path,
            bundled.path().join("mysql/5_1_47/libmysql.so")
        );
    }

    #[test]
    fn test_resolve_not_found() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "mysql/5_1_47/libmysql.so");
        touch(dir.path(), "postgresql/42_2_26/libpg.so");
        write_config(
            dir.path(),
            r#"
backends:
  mysql.5_1_47: mysql/5_1_47/libmysql.so
  postgres.9_6: postgresql/42_2_26/libpg.so
"#,
        );
        let registry = builder(ConfigSources::new().push(dir.path()))
            .build()
            .unwrap();

        let key = RouteKey::new("mysql", "8.0.19");
        assert_eq!(
            registry.resolve(&key).unwrap_err(),
            NotFoundError::NoBackend { route_key: key }
        );
    }

    #[test]
    fn test_first_registered_wins_on_tie() {
        let artifact = |name: &str| ArtifactRef {
            location: format!("mysql/8_0_19/{name}"),
            driver_type: "mysql".into(),
            driver_version: "8.0.19".into(),
            path: PathBuf::from(name),
        };
        let registry = Registry::new(
            vec![
                BackendDescriptor::new(RouteKey::new("mysql", "8.0.19"), artifact("a.so"), "a"),
                BackendDescriptor::new(RouteKey::new("mysql", "8.0.19"), artifact("b.so"), "b"),
            ],
            PropertyBag::new(),
        );
        let descriptor = registry.resolve(&RouteKey::new("mysql", "8.0.19")).unwrap();
        assert_eq!(descriptor.entry_point(), "a");
    }

    #[test]
    fn test_all_issues_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "postgresql/42_2_26/libpg.so");
        touch(dir.path(), "oracle/19/liboracle.so");
        write_config(
            dir.path(),
            r#"
backends:
  postgresql.9_6: postgresql/42_2_26/libpg.so
  postgresql: postgresql/42_2_26/libpg.so
  mysql.8_0_19: mysql/8_0_19/libmysql.so
  mysql.5_1_6: mysql/libmysql.so
  mysql.5_1_47: mysql/5_1_47/libmysql.jar
  oracle.19: oracle/19/liboracle.so
"#,
        );

        let err = builder(ConfigSources::new().push(dir.path()))
            .build()
            .unwrap_err();

        assert_eq!(err.issues.len(), 5, "{err}");
        assert!(matches!(
            &err.issues[0],
            ConfigIssue::InvalidKey { key, .. } if key == "postgresql"
        ));
        assert!(matches!(
            &err.issues[1],
            ConfigIssue::Artifact { source: LoadError::ArtifactMissing { .. }, .. }
        ));
        assert!(matches!(
            &err.issues[2],
            ConfigIssue::InvalidValue { key, .. } if key == "mysql.5_1_6"
        ));
        assert!(matches!(
            &err.issues[3],
            ConfigIssue::InvalidValue { key, .. } if key == "mysql.5_1_47"
        ));
        assert!(matches!(
            &err.issues[4],
            ConfigIssue::Capability { source: NotFoundError::NoCapability { .. }, .. }
        ));
    }

    #[test]
    fn test_config_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "redis/7_2_0/libredis.so");
        write_config(
            dir.path(),
            r#"
backends:
  redis.7: redis/7_2_0/libredis.so
capabilities:
  - backend_type: redis
    version: "7.2.0"
    entry_point: redis_backend_entry
"#,
        );
        let registry = builder(ConfigSources::new().push(dir.path()))
            .build()
            .unwrap();
        let descriptor = registry.resolve(&RouteKey::new("redis", "7")).unwrap();
        assert_eq!(descriptor.entry_point(), "redis_backend_entry");
    }

    #[test]
    fn test_duplicate_capabilities_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
capabilities:
  - backend_type: mysql
    version: "8.0.19"
    entry_point: another_entry
"#,
        );
        let err = builder(ConfigSources::new().push(dir.path()))
            .build()
            .unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(matches!(
            &err.issues[0],
            ConfigIssue::Capability {
                source: NotFoundError::AmbiguousCapability { count: 2, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_no_sources_gives_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = builder(ConfigSources::new().push(dir.path().join("missing")))
            .build()
            .unwrap();
        assert!(registry.is_empty());
    }
}
