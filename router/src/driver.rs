//! The delegating facade external callers use.

use crate::backend::Connection;
use crate::errors::{ConnectError, RouteError};
use crate::properties::{PropertyBag, PropertyInfo, ReservedKey};
use crate::resolver::{Resolution, Router, UnitOfWork};
use crate::route::normalize_version;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Routes requests to the backend they name and forwards them with the
/// routing-only properties removed.
pub struct RoutingDriver {
    router: Router,
}

impl RoutingDriver {
    pub fn new(router: Router) -> Self {
        RoutingDriver { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// True when `raw` is a well-formed request for this driver.
    pub fn accepts(&self, raw: &str) -> bool {
        self.router.route_grammar().accepts(raw)
    }

    /// Resolves and loads the backend for `raw` without connecting.
    pub fn try_route(
        &self,
        raw: &str,
        supplied: &PropertyBag,
    ) -> Result<Option<Resolution>, RouteError> {
        self.router.route(raw, supplied)
    }

    /// Opens a connection through the backend `raw` routes to.
    ///
    /// Returns `Ok(None)` when the request is not addressed to this driver.
    /// Backend failures come back as [`ConnectError::Backend`] unchanged.
    pub fn connect(
        &self,
        raw: &str,
        supplied: &PropertyBag,
    ) -> Result<Option<Box<dyn Connection>>, ConnectError> {
        let mut work = self.router.begin_work();
        self.connect_in(&mut work, raw, supplied)
    }

    /// Like [`connect`](Self::connect), recording the resolved backend in `work`.
    pub fn connect_in(
        &self,
        work: &mut UnitOfWork<'_>,
        raw: &str,
        supplied: &PropertyBag,
    ) -> Result<Option<Box<dyn Connection>>, ConnectError> {
        tracing::info!(request = %raw, "Connect");
        let resolution = match work.route(raw, supplied) {
            Ok(Some(resolution)) => resolution,
            Ok(None) => {
                tracing::debug!(request = %raw, "Request not addressed to this driver");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(request = %raw, error = %e, "Routing failed");
                return Err(e.into());
            }
        };

        let cleaned = resolution.properties.without_reserved();
        let backend = resolution.backend.instance();
        tracing::info!(
            route_key = %resolution.route_key,
            backend = backend.name(),
            target = %resolution.forward_target,
            "Delegating connect"
        );

        match backend.connect(&resolution.forward_target, &cleaned) {
            Ok(connection) => {
                tracing::info!(route_key = %resolution.route_key, "Connected");
                Ok(Some(connection))
            }
            Err(e) => {
                tracing::warn!(
                    route_key = %resolution.route_key,
                    error = %e,
                    "Backend connect failed"
                );
                Err(ConnectError::Backend(e))
            }
        }
    }

    /// Describes every routing property for `raw`. Never fails: a request
    /// that does not parse is described from `supplied` alone.
    pub fn describe_properties(&self, raw: &str, supplied: &PropertyBag) -> Vec<PropertyInfo> {
        let mut properties = supplied.clone();
        if let Ok(Some(request)) = self.router.route_grammar().parse(raw) {
            properties.merge(&request.properties);
        }
        let version = ReservedKey::BackendVersion.get(&properties).map(normalize_version);
        if let Some(version) = version {
            ReservedKey::BackendVersion.set(&mut properties, version);
        }
        ReservedKey::ALL
            .into_iter()
            .map(|key| PropertyInfo::for_key(key, &properties))
            .collect()
    }
}
