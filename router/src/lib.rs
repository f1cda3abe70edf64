pub mod backend;
pub mod capabilities;
pub mod config;
pub mod driver;
pub mod errors;
pub mod loader;
pub mod metrics_defs;
pub mod properties;
pub mod registry;
pub mod resolver;
pub mod route;

#[cfg(test)]
mod testutils;

pub use backend::{Backend, BackendEntry, BackendError, Connection};
pub use driver::RoutingDriver;
pub use errors::{ConfigError, ConnectError, FormatError, LoadError, NotFoundError, RouteError};
pub use loader::{ArtifactLoader, BuiltinLoader, DylibLoader, IsolatedLoader};
pub use properties::{PropertyBag, PropertyInfo, ReservedKey};
pub use registry::{Registry, RegistryBuilder};
pub use resolver::{Resolution, RoutePlan, Router, UnitOfWork};
pub use route::{RouteGrammar, RouteKey, RouteRequest};
