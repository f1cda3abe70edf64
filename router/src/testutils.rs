use crate::backend::{Backend, BackendError, Connection};
use crate::errors::LoadError;
use crate::loader::{ArtifactLoader, BuiltinLoader, ExecutionContext};
use crate::properties::PropertyBag;
use crate::registry::{ArtifactRef, BackendDescriptor};
use crate::route::RouteKey;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A call recorded by [`EchoBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: String,
    pub properties: PropertyBag,
}

/// Backend that accepts every request and numbers its connections.
pub struct EchoBackend {
    name: String,
    connections: AtomicUsize,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl EchoBackend {
    pub fn new(name: &str) -> Self {
        EchoBackend::recording(name, Arc::default())
    }

    pub fn recording(name: &str, calls: Arc<Mutex<Vec<Call>>>) -> Self {
        EchoBackend {
            name: name.to_string(),
            connections: AtomicUsize::new(0),
            calls,
        }
    }
}

impl Backend for EchoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(
        &self,
        target: &str,
        properties: &PropertyBag,
    ) -> Result<Box<dyn Connection>, BackendError> {
        if properties.get("fail").is_some() {
            return Err(Box::new(EchoRefused(target.to_string())));
        }
        self.calls.lock().push(Call {
            target: target.to_string(),
            properties: properties.clone(),
        });
        let n = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(EchoConnection {
            backend_name: self.name.clone(),
            target: format!("{target}#{n}"),
        }))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("echo backend refused {0}")]
pub struct EchoRefused(pub String);

pub struct EchoConnection {
    backend_name: String,
    target: String,
}

impl Connection for EchoConnection {
    fn backend_name(&self) -> &str {
        &self.backend_name
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Builtin loader with an `echo` entry point.
pub fn echo_loader() -> BuiltinLoader {
    BuiltinLoader::new().register("echo", || Box::new(EchoBackend::new("echo")))
}

/// Wraps a loader and counts the execution contexts it opens.
pub struct CountingLoader<L> {
    inner: L,
    delay: Duration,
    opened: AtomicUsize,
}

impl<L: ArtifactLoader> CountingLoader<L> {
    pub fn new(inner: L, delay: Duration) -> Self {
        CountingLoader {
            inner,
            delay,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl<L: ArtifactLoader> ArtifactLoader for CountingLoader<L> {
    fn open(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Box<dyn ExecutionContext>, LoadError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.open(descriptor)
    }
}

pub fn descriptor(backend_type: &str, version: &str, entry_point: &str) -> BackendDescriptor {
    let location = format!("{backend_type}/{}/lib{backend_type}.so", version.replace('.', "_"));
    descriptor_at(backend_type, version, entry_point, Path::new(&location))
}

pub fn descriptor_at(
    backend_type: &str,
    version: &str,
    entry_point: &str,
    path: &Path,
) -> BackendDescriptor {
    BackendDescriptor::new(
        RouteKey::new(backend_type, version),
        ArtifactRef {
            location: path.display().to_string(),
            driver_type: backend_type.to_string(),
            driver_version: version.to_string(),
            path: PathBuf::from(path),
        },
        entry_point,
    )
}
