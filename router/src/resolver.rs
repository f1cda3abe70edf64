//! Turns a raw request into a loaded backend.

use crate::config::ConfigSources;
use crate::errors::{ConfigError, FormatError, RouteError};
use crate::loader::{ArtifactLoader, IsolatedLoader, LoadedBackend};
use crate::metrics_defs::{ROUTE_MATCHED, ROUTE_NO_MATCH};
use crate::properties::{PropertyBag, ReservedKey};
use crate::registry::{BackendDescriptor, Registry, RegistryBuilder};
use crate::route::{RouteGrammar, RouteKey, RouteRequest, normalize_version};
use shared::counter;
use std::sync::{Arc, OnceLock};

/// A request matched to its descriptor, before the backend is loaded.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub route_key: RouteKey,
    pub descriptor: Arc<BackendDescriptor>,
    pub properties: PropertyBag,
    pub forward_target: String,
}

/// Outcome of routing one request.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub route_key: RouteKey,
    pub descriptor: Arc<BackendDescriptor>,
    pub backend: Arc<LoadedBackend>,
    /// Every property of the request, reserved keys included.
    pub properties: PropertyBag,
    pub forward_target: String,
}

pub struct Router {
    grammar: RouteGrammar,
    builder: Option<RegistryBuilder>,
    registry: OnceLock<Result<Arc<Registry>, ConfigError>>,
    loader: IsolatedLoader,
    defaults: PropertyBag,
}

impl Router {
    /// A router whose registry is built from `builder` on first use.
    pub fn new(builder: RegistryBuilder, loader: Arc<dyn ArtifactLoader>) -> Self {
        Router {
            grammar: RouteGrammar::default(),
            builder: Some(builder),
            registry: OnceLock::new(),
            loader: IsolatedLoader::new(loader),
            defaults: PropertyBag::new(),
        }
    }

    pub fn from_sources(sources: ConfigSources, loader: Arc<dyn ArtifactLoader>) -> Self {
        Router::new(RegistryBuilder::new(sources), loader)
    }

    /// A router over an already built registry.
    pub fn with_registry(registry: Registry, loader: Arc<dyn ArtifactLoader>) -> Self {
        Router {
            grammar: RouteGrammar::default(),
            builder: None,
            registry: OnceLock::from(Ok(Arc::new(registry))),
            loader: IsolatedLoader::new(loader),
            defaults: PropertyBag::new(),
        }
    }

    pub fn grammar(mut self, grammar: RouteGrammar) -> Self {
        self.grammar = grammar;
        self
    }

    /// Properties with the lowest precedence, below configuration defaults.
    pub fn defaults(mut self, defaults: PropertyBag) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn route_grammar(&self) -> &RouteGrammar {
        &self.grammar
    }

    /// The registry, built on the first call. Every caller sees the same
    /// result, including the same error if the build failed.
    pub fn registry(&self) -> Result<Arc<Registry>, ConfigError> {
        self.registry
            .get_or_init(|| {
                let registry = match &self.builder {
                    Some(builder) => builder.build()?,
                    None => Registry::default(),
                };
                tracing::info!(backends = registry.len(), "Registry built");
                Ok(Arc::new(registry))
            })
            .clone()
    }

    /// Parses `raw`, merges its properties and finds its descriptor without
    /// loading anything. `Ok(None)` means the request is not addressed to
    /// this router.
    pub fn plan(
        &self,
        raw: &str,
        supplied: &PropertyBag,
    ) -> Result<Option<RoutePlan>, RouteError> {
        let Some(request) = self.grammar.parse(raw)? else {
            counter!(ROUTE_NO_MATCH).increment(1);
            return Ok(None);
        };
        counter!(ROUTE_MATCHED).increment(1);

        let registry = self.registry()?;
        let (route_key, properties) = self.merge(&registry, &request, supplied)?;
        tracing::debug!(%route_key, target = %request.forward_target, "Routing request");

        let descriptor = registry.resolve(&route_key)?.clone();
        Ok(Some(RoutePlan {
            route_key,
            descriptor,
            properties,
            forward_target: request.forward_target,
        }))
    }

    /// Routes `raw` and loads its backend.
    pub fn route(
        &self,
        raw: &str,
        supplied: &PropertyBag,
    ) -> Result<Option<Resolution>, RouteError> {
        let Some(plan) = self.plan(raw, supplied)? else {
            return Ok(None);
        };
        let backend = self.loader.ensure_loaded(&plan.descriptor)?;

        Ok(Some(Resolution {
            route_key: plan.route_key,
            descriptor: plan.descriptor,
            backend,
            properties: plan.properties,
            forward_target: plan.forward_target,
        }))
    }

    /// Router defaults < configuration defaults < supplied < request.
    fn merge(
        &self,
        registry: &Registry,
        request: &RouteRequest,
        supplied: &PropertyBag,
    ) -> Result<(RouteKey, PropertyBag), FormatError> {
        let mut properties = self.defaults.clone();
        properties.merge(registry.defaults());
        properties.merge(supplied);
        properties.merge(&request.properties);

        let version = ReservedKey::BackendVersion
            .get(&properties)
            .filter(|version| !version.is_empty())
            .map(normalize_version)
            .ok_or(FormatError::MissingVersion)?;
        ReservedKey::BackendVersion.set(&mut properties, version.as_str());

        Ok((RouteKey::new(request.backend_type.clone(), version), properties))
    }

    /// Starts a unit of work with its own "current backend" slot.
    pub fn begin_work(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            router: self,
            current: None,
        }
    }
}

/// Per unit-of-work state. Holds the backend most recently resolved in this
/// unit so logs and diagnostics can be correlated with it. The slot is never
/// shared: it goes away with the unit of work that created it.
pub struct UnitOfWork<'r> {
    router: &'r Router,
    current: Option<Resolution>,
}

impl<'r> UnitOfWork<'r> {
    pub fn router(&self) -> &'r Router {
        self.router
    }

    /// Routes `raw` and records the outcome as the current backend. A
    /// non-matching request or an error leaves the slot empty.
    pub fn route(
        &mut self,
        raw: &str,
        supplied: &PropertyBag,
    ) -> Result<Option<&Resolution>, RouteError> {
        self.current = None;
        self.current = self.router.route(raw, supplied)?;
        Ok(self.current.as_ref())
    }

    pub fn current(&self) -> Option<&Resolution> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
