//! API routes

mod health;
mod metrics;
mod registry;

use std::sync::Arc;

use axum::Router;

use crate::state::{AppState, MetricsHandle};

/// Create the main router.
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        .merge(health::routes())
        .merge(registry::routes())
        .with_state(state);

    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }
    router
}
