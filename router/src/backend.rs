//! Interface between the router and the backends it loads.
//!
//! A backend is an opaque capability: the router only knows how to hand it a
//! forward target and a property bag and get a [`Connection`] back. Backends
//! shipped as dynamic libraries export a constructor with [`declare_backend!`].

use crate::properties::PropertyBag;

/// Error produced by a backend. The router never wraps or rewrites it.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub trait Backend: Send + Sync {
    /// Human readable name, used in logs.
    fn name(&self) -> &str;

    fn connect(
        &self,
        target: &str,
        properties: &PropertyBag,
    ) -> Result<Box<dyn Connection>, BackendError>;
}

pub trait Connection: Send {
    fn backend_name(&self) -> &str;

    /// The forward target this connection was opened against.
    fn target(&self) -> &str;

    fn close(self: Box<Self>) -> Result<(), BackendError>;
}

/// Signature of the constructor a backend library exports.
///
/// Backend libraries must be built with the same compiler as the host since
/// the symbol uses the Rust ABI.
pub type BackendEntry = fn() -> Box<dyn Backend>;

/// Exports `$ctor` from a backend library under the symbol `$symbol`.
///
/// ```ignore
/// router::declare_backend!(pg_backend_entry, PgBackend::default());
/// ```
#[macro_export]
macro_rules! declare_backend {
    ($symbol:ident, $ctor:expr) => {
        #[unsafe(no_mangle)]
        pub fn $symbol() -> Box<dyn $crate::backend::Backend> {
            Box::new($ctor)
        }
    };
}
