//! Storage middleware
//!
//! Middleware wraps a storage driver to change how blob download URLs are
//! produced, leaving every other operation untouched. Instances are selected
//! by name from a process-wide registry, mirroring the driver factories.

pub mod cdnfilter;
pub mod redirect;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::driver::StorageDriver;
use crate::error::DriverError;
use crate::factory::Parameters;

pub use cdnfilter::{CdnFilterMiddleware, IpRangeFilter};
pub use redirect::RedirectMiddleware;

/// Builds a wrapped driver from configuration options.
pub trait StorageMiddlewareFactory: Send + Sync {
    fn create(
        &self,
        inner: Arc<dyn StorageDriver>,
        options: &Parameters,
    ) -> Result<Arc<dyn StorageDriver>, DriverError>;
}

static MIDDLEWARE_FACTORIES: LazyLock<RwLock<HashMap<String, Arc<dyn StorageMiddlewareFactory>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a middleware factory under `name`, replacing any previous entry.
pub fn register_middleware(name: &str, factory: Arc<dyn StorageMiddlewareFactory>) {
    MIDDLEWARE_FACTORIES.write().insert(name.to_string(), factory);
}

/// Wrap `inner` with the middleware registered under `name`.
pub fn apply_middleware(
    name: &str,
    inner: Arc<dyn StorageDriver>,
    options: &Parameters,
) -> Result<Arc<dyn StorageDriver>, DriverError> {
    let factory = MIDDLEWARE_FACTORIES
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| DriverError::InvalidDriverName(name.to_string()))?;
    factory.create(inner, options)
}

/// Register the middleware shipped with this crate.
pub fn install_default_middleware() {
    register_middleware("redirect", Arc::new(redirect::RedirectFactory));
    register_middleware("cdn", Arc::new(cdnfilter::CdnFilterFactory));
}
