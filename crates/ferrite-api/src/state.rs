//! Application state

use std::sync::Arc;

use ferrite_auth::AccessController;
use ferrite_core::Registry;

/// Type alias for the Prometheus metrics handle
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Optional pluggable access controller; absent means open access.
    pub auth: Option<Arc<dyn AccessController>>,
    /// Serve blob bytes directly even when the driver can sign URLs.
    pub disable_redirect: bool,
    /// Whether manifest and blob DELETE is allowed at all.
    pub delete_enabled: bool,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        auth: Option<Arc<dyn AccessController>>,
        disable_redirect: bool,
    ) -> Self {
        AppState {
            registry,
            auth,
            disable_redirect,
            delete_enabled: true,
        }
    }

    pub fn with_delete_enabled(mut self, enabled: bool) -> Self {
        self.delete_enabled = enabled;
        self
    }
}
