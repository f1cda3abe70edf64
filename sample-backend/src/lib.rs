//! Minimal backend library used by the router's loading tests.
//!
//! Connections are numbered from a library-wide counter, so two copies of
//! this library loaded side by side count independently.

use router::{Backend, BackendError, Connection, PropertyBag};
use std::sync::atomic::{AtomicUsize, Ordering};

static CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct SampleBackend;

impl Backend for SampleBackend {
    fn name(&self) -> &str {
        "sample"
    }

    fn connect(
        &self,
        target: &str,
        properties: &PropertyBag,
    ) -> Result<Box<dyn Connection>, BackendError> {
        if let Some(reason) = properties.get("refuse") {
            return Err(format!("sample backend refused: {reason}").into());
        }
        let n = CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(SampleConnection {
            target: format!("{target}#{n}"),
        }))
    }
}

struct SampleConnection {
    target: String,
}

impl Connection for SampleConnection {
    fn backend_name(&self) -> &str {
        "sample"
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}

router::declare_backend!(sample_backend_entry, SampleBackend);
