//! Request parsing.
//!
//! A routed request looks like
//!
//! ```text
//! proxy:jdbc:postgresql://h:5432/db?dbversion=9_6&ssl=true
//! └─┬──┘└─────────┬─────────────────┘└──────┬──────────┘
//! scheme   backend-addressable part     arguments
//! ```
//!
//! The parser extracts the backend type (`postgresql`) and the reserved
//! arguments, and rebuilds the backend-addressable part with only the
//! pass-through arguments (`jdbc:postgresql://h:5432/db?ssl=true`). That
//! rebuilt string is the forward target handed to the backend.

use crate::errors::FormatError;
use crate::properties::{PropertyBag, ReservedKey};
use std::fmt;

pub const DEFAULT_SCHEME: &str = "proxy:";
pub const DEFAULT_PROTOCOL: &str = "jdbc:";

const ARG_SEPARATOR: &str = "&";
const QUERY_SEPARATOR: char = '?';

/// Identifies a backend family and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub backend_type: String,
    pub version: String,
}

impl RouteKey {
    pub fn new(backend_type: impl Into<String>, version: impl Into<String>) -> Self {
        RouteKey {
            backend_type: backend_type.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.backend_type, self.version)
    }
}

/// Versions are written with `_` in keys and URLs (`9_6`) and compared with `.`.
pub fn normalize_version(raw: &str) -> String {
    raw.replace('_', ".")
}

/// Result of parsing a request that carried the router's scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub backend_type: String,
    /// Version embedded in the request, if any.
    pub version: Option<String>,
    pub forward_target: String,
    /// Reserved values from the request followed by its pass-through arguments.
    pub properties: PropertyBag,
}

impl RouteRequest {
    /// The route key, when the request carries its own version.
    pub fn route_key(&self) -> Option<RouteKey> {
        self.version
            .as_ref()
            .map(|version| RouteKey::new(self.backend_type.clone(), version.clone()))
    }

    pub fn pass_through(&self) -> PropertyBag {
        self.properties.without_reserved()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGrammar {
    scheme: String,
    protocol: String,
}

impl Default for RouteGrammar {
    fn default() -> Self {
        RouteGrammar::new(DEFAULT_SCHEME, DEFAULT_PROTOCOL)
    }
}

impl RouteGrammar {
    pub fn new(scheme: impl Into<String>, protocol: impl Into<String>) -> Self {
        RouteGrammar {
            scheme: scheme.into(),
            protocol: protocol.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Parses `raw`. Returns `Ok(None)` when the request is not addressed to
    /// this router, which callers use to probe several routers in turn.
    pub fn parse(&self, raw: &str) -> Result<Option<RouteRequest>, FormatError> {
        let Some(addressable) = raw.strip_prefix(self.scheme.as_str()) else {
            return Ok(None);
        };
        if !addressable.starts_with(self.protocol.as_str()) {
            return Ok(None);
        }

        let (server, args) = match addressable.split_once(QUERY_SEPARATOR) {
            Some((server, args)) => (server, args),
            None => (addressable, ""),
        };

        let after_protocol = server.strip_prefix(self.protocol.as_str()).unwrap_or("");
        let backend_type = match after_protocol.split_once(':') {
            Some((backend_type, _)) if !backend_type.is_empty() => backend_type,
            _ => return Err(FormatError::MissingType),
        };

        let mut properties = PropertyBag::new();
        ReservedKey::BackendType.set(&mut properties, backend_type);

        let mut version = None;
        let mut kept = Vec::new();
        let mut pass_through = PropertyBag::new();
        for token in args.split(ARG_SEPARATOR) {
            if token.is_empty() {
                continue;
            }
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            if key.is_empty() {
                return Err(FormatError::EmptyKey {
                    token: token.to_string(),
                });
            }

            match ReservedKey::from_name(key) {
                Some(ReservedKey::BackendVersion) => {
                    let normalized = normalize_version(value);
                    ReservedKey::BackendVersion.set(&mut properties, normalized.as_str());
                    version = Some(normalized);
                }
                // The parser owns these; a request cannot override them.
                Some(ReservedKey::ForwardTarget | ReservedKey::BackendType) => {}
                None => {
                    kept.push(token);
                    pass_through.insert(key, value);
                }
            }
        }

        let mut forward_target = String::from(server);
        if !kept.is_empty() {
            forward_target.push(QUERY_SEPARATOR);
            forward_target.push_str(&kept.join(ARG_SEPARATOR));
        }
        ReservedKey::ForwardTarget.set(&mut properties, forward_target.as_str());
        properties.merge(&pass_through);

        Ok(Some(RouteRequest {
            backend_type: backend_type.to_string(),
            version,
            forward_target,
            properties,
        }))
    }

    /// True when `raw` is a well-formed request for this router.
    pub fn accepts(&self, raw: &str) -> bool {
        matches!(self.parse(raw), Ok(Some(_)))
    }

    /// Turns a plain backend URL into a routed request pinned to `version`.
    ///
    /// An existing scheme prefix and an existing `dbversion` argument are kept.
    pub fn routed_url(&self, url: &str, version: &str) -> String {
        let mut routed = if url.starts_with(self.scheme.as_str()) {
            url.to_string()
        } else {
            format!("{}{}", self.scheme, url)
        };
        let version_key = ReservedKey::BackendVersion.name();

        let existing_args = routed
            .split_once(QUERY_SEPARATOR)
            .map(|(_, args)| args.to_string());
        match existing_args {
            None => {
                routed.push(QUERY_SEPARATOR);
            }
            Some(args) if args.trim().is_empty() => {}
            Some(args) => {
                let has_version = args
                    .split(ARG_SEPARATOR)
                    .any(|token| token.split('=').next() == Some(version_key));
                if has_version {
                    return routed;
                }
                if !routed.ends_with(ARG_SEPARATOR) {
                    routed.push_str(ARG_SEPARATOR);
                }
            }
        }
        routed.push_str(version_key);
        routed.push('=');
        routed.push_str(version);
        routed
    }
}
