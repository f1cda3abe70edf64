//! Isolated, at-most-once backend loading.
//!
//! Every descriptor owns a [`LoadSlot`]: a write-once cell plus a mutex that
//! only guards that descriptor. The first caller to find the cell empty takes
//! the mutex, re-checks, opens a fresh [`ExecutionContext`] for the artifact
//! and publishes the instance. Later callers read the cell without locking.
//! A failed load leaves the cell empty, so the next caller tries again.
//!
//! There is no unload path. Code loaded by [`DylibLoader`] stays mapped for
//! the rest of the process, even after the registry is dropped.

use crate::backend::{Backend, BackendEntry};
use crate::errors::LoadError;
use crate::metrics_defs::{BACKEND_LOAD_ATTEMPT, BACKEND_LOAD_DURATION, BACKEND_LOAD_FAILURE};
use crate::registry::BackendDescriptor;
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// An owned unit of code isolation. Code loaded into one context is never
/// visible from another.
pub trait ExecutionContext: Send + Sync {
    fn instantiate(&self, entry_point: &str) -> Result<Box<dyn Backend>, LoadError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Creates a new execution context for a descriptor's artifact.
pub trait ArtifactLoader: Send + Sync {
    fn open(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn ExecutionContext>, LoadError>;
}

/// A backend instance together with the context that owns its code.
pub struct LoadedBackend {
    // Dropped before `context`, which may own the code behind it.
    instance: Arc<dyn Backend>,
    context: Box<dyn ExecutionContext>,
}

impl LoadedBackend {
    pub fn instance(&self) -> &Arc<dyn Backend> {
        &self.instance
    }

    pub fn context(&self) -> &dyn ExecutionContext {
        self.context.as_ref()
    }
}

impl fmt::Debug for LoadedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedBackend")
            .field("instance", &self.instance.name())
            .field("context", &self.context.describe())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Default)]
pub struct LoadSlot {
    loaded: OnceLock<Arc<LoadedBackend>>,
    lock: Mutex<()>,
}

impl LoadSlot {
    pub fn get(&self) -> Option<&Arc<LoadedBackend>> {
        self.loaded.get()
    }

    pub fn state(&self) -> LoadState {
        if self.loaded.get().is_some() {
            LoadState::Loaded
        } else if self.lock.is_locked() {
            LoadState::Loading
        } else {
            LoadState::Unloaded
        }
    }
}

impl fmt::Debug for LoadSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoadSlot").field(&self.state()).finish()
    }
}

#[derive(Clone)]
pub struct IsolatedLoader {
    loader: Arc<dyn ArtifactLoader>,
}

impl IsolatedLoader {
    pub fn new(loader: Arc<dyn ArtifactLoader>) -> Self {
        IsolatedLoader { loader }
    }

    /// Loads `descriptor` unless it is already loaded. Concurrent callers for
    /// the same descriptor wait for a single load and share its result.
    pub fn ensure_loaded(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<LoadedBackend>, LoadError> {
        let slot = descriptor.slot();
        if let Some(loaded) = slot.get() {
            return Ok(loaded.clone());
        }

        let _guard = slot.lock.lock();
        // Another caller may have finished while we waited.
        if let Some(loaded) = slot.get() {
            return Ok(loaded.clone());
        }

        counter!(BACKEND_LOAD_ATTEMPT).increment(1);
        let started = Instant::now();
        match self.load(descriptor) {
            Ok(loaded) => {
                histogram!(BACKEND_LOAD_DURATION).record(started.elapsed().as_secs_f64());
                tracing::info!(
                    route_key = %descriptor.route_key(),
                    context = %loaded.context.describe(),
                    "Loaded backend"
                );
                Ok(slot.loaded.get_or_init(|| Arc::new(loaded)).clone())
            }
            Err(e) => {
                counter!(BACKEND_LOAD_FAILURE).increment(1);
                tracing::warn!(
                    route_key = %descriptor.route_key(),
                    error = %e,
                    "Backend load failed"
                );
                Err(e)
            }
        }
    }

    fn load(&self, descriptor: &BackendDescriptor) -> Result<LoadedBackend, LoadError> {
        let context = self.loader.open(descriptor)?;
        let instance = context.instantiate(descriptor.entry_point())?;
        Ok(LoadedBackend {
            instance: Arc::from(instance),
            context,
        })
    }
}

/// Runs a backend constructor, turning a panic into a [`LoadError`].
fn construct(
    entry_point: &str,
    ctor: impl FnOnce() -> Box<dyn Backend>,
) -> Result<Box<dyn Backend>, LoadError> {
    panic::catch_unwind(AssertUnwindSafe(ctor)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "constructor panicked".to_string());
        LoadError::Instantiate {
            entry_point: entry_point.to_string(),
            message,
        }
    })
}

/// Opens each artifact as its own dynamic library.
///
/// Libraries are never closed. Connections and backend handles handed out
/// to callers point into library code and may outlive the router, so every
/// opened library stays mapped until the process exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl ArtifactLoader for DylibLoader {
    fn open(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Box<dyn ExecutionContext>, LoadError> {
        let path = &descriptor.artifact().path;
        if !path.is_file() {
            return Err(LoadError::ArtifactMissing {
                location: path.display().to_string(),
            });
        }

        let library = open_library(path).map_err(|e| LoadError::Open {
            path: path.clone(),
            message: e.to_string(),
        })?;

        Ok(Box::new(DylibContext {
            library: Box::leak(Box::new(library)),
            path: path.clone(),
        }))
    }
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};
    // RTLD_LOCAL keeps this library's symbols out of the global namespace.
    let library = unsafe { Library::open(Some(path), RTLD_NOW | RTLD_LOCAL)? };
    Ok(library.into())
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> Result<libloading::Library, libloading::Error> {
    unsafe { libloading::Library::new(path) }
}

struct DylibContext {
    library: &'static libloading::Library,
    path: PathBuf,
}

impl ExecutionContext for DylibContext {
    fn instantiate(&self, entry_point: &str) -> Result<Box<dyn Backend>, LoadError> {
        let entry: BackendEntry = unsafe {
            *self
                .library
                .get::<BackendEntry>(entry_point.as_bytes())
                .map_err(|e| LoadError::EntryPoint {
                    path: self.path.clone(),
                    entry_point: entry_point.to_string(),
                    message: e.to_string(),
                })?
        };
        construct(entry_point, entry)
    }

    fn describe(&self) -> String {
        format!("dylib {}", self.path.display())
    }
}

type Factory = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// Backends linked into the host binary, looked up by entry point name.
///
/// Each opened context constructs its own instance, so descriptors never
/// share backend state even when they use the same entry point.
#[derive(Clone, Default)]
pub struct BuiltinLoader {
    factories: HashMap<String, Factory>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, entry_point: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        self.factories.insert(entry_point.into(), Arc::new(factory));
        self
    }
}

impl ArtifactLoader for BuiltinLoader {
    fn open(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Box<dyn ExecutionContext>, LoadError> {
        Ok(Box::new(BuiltinContext {
            factories: self.factories.clone(),
            owner: descriptor.route_key().to_string(),
        }))
    }
}

struct BuiltinContext {
    factories: HashMap<String, Factory>,
    owner: String,
}

impl ExecutionContext for BuiltinContext {
    fn instantiate(&self, entry_point: &str) -> Result<Box<dyn Backend>, LoadError> {
        let factory = self
            .factories
            .get(entry_point)
            .ok_or_else(|| LoadError::EntryPoint {
                path: PathBuf::from("<builtin>"),
                entry_point: entry_point.to_string(),
                message: "no builtin backend registered".to_string(),
            })?;
        construct(entry_point, || factory())
    }

    fn describe(&self) -> String {
        format!("builtin context for {}", self.owner)
    }
}
