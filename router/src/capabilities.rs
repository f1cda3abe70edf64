//! Table of known driver builds and the entry point each one exports.

use crate::errors::NotFoundError;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Capability {
    pub backend_type: String,
    pub version: String,
    pub entry_point: String,
}

impl Capability {
    pub fn new(
        backend_type: impl Into<String>,
        version: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        Capability {
            backend_type: backend_type.into(),
            version: version.into(),
            entry_point: entry_point.into(),
        }
    }
}

const BUILTIN: &[(&str, &str, &str)] = &[
    ("postgresql", "42.1.1", "postgresql_backend_entry"),
    ("postgresql", "42.2.26", "postgresql_backend_entry"),
    ("mysql", "5.1.6", "mysql_legacy_backend_entry"),
    ("mysql", "5.1.47", "mysql_legacy_backend_entry"),
    ("mysql", "8.0.19", "mysql_cj_backend_entry"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    entries: Vec<Capability>,
}

impl CapabilityTable {
    /// Builds a table, rejecting entries that repeat a `(type, version)` pair.
    pub fn new(entries: Vec<Capability>) -> Result<Self, NotFoundError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert((entry.backend_type.as_str(), entry.version.as_str())) {
                let count = entries
                    .iter()
                    .filter(|e| e.backend_type == entry.backend_type && e.version == entry.version)
                    .count();
                return Err(NotFoundError::AmbiguousCapability {
                    driver_type: entry.backend_type.clone(),
                    driver_version: entry.version.clone(),
                    count,
                });
            }
        }
        Ok(CapabilityTable { entries })
    }

    pub fn builtin() -> Self {
        CapabilityTable {
            entries: BUILTIN
                .iter()
                .map(|(backend_type, version, entry_point)| {
                    Capability::new(*backend_type, *version, *entry_point)
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[Capability] {
        &self.entries
    }

    /// Entry point for a driver build. Zero and several matches are both errors.
    pub fn entry_point(
        &self,
        driver_type: &str,
        driver_version: &str,
    ) -> Result<&str, NotFoundError> {
        let mut matches = self
            .entries
            .iter()
            .filter(|entry| entry.backend_type == driver_type)
            .filter(|entry| entry.version == driver_version);

        match (matches.next(), matches.count()) {
            (Some(entry), 0) => Ok(&entry.entry_point),
            (None, _) => Err(NotFoundError::NoCapability {
                driver_type: driver_type.to_string(),
                driver_version: driver_version.to_string(),
            }),
            (Some(_), rest) => Err(NotFoundError::AmbiguousCapability {
                driver_type: driver_type.to_string(),
                driver_version: driver_version.to_string(),
                count: rest + 1,
            }),
        }
    }
}
