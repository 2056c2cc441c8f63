//! Ferrite Registry HTTP API
//!
//! Axum router implementing the v2 distribution protocol: manifests, blobs,
//! resumable uploads, tag listing, and the repository catalog, with OCI
//! error bodies.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
