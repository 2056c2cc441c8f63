//! Ferrite Registry Access Control
//!
//! This crate defines the pluggable access-controller contract the HTTP
//! layer authorizes requests through. Concrete schemes (htpasswd, token
//! services) register factories by name at startup; the registry core never
//! depends on any particular one.

pub mod error;

pub use error::AuthError;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

/// Untyped controller parameters, as deserialized from configuration.
pub type Parameters = HashMap<String, Value>;

/// A resource access control may be requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    /// Resource class, e.g. `"repository"` or `"registry"`.
    pub kind: String,
    /// Resource name, e.g. a repository path.
    pub name: String,
}

/// One requested action against a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Access {
    pub resource: Resource,
    /// Action verb: `"pull"`, `"push"`, `"delete"`, `"*"`.
    pub action: String,
}

impl Access {
    pub fn repository(name: impl Into<String>, action: impl Into<String>) -> Self {
        Access {
            resource: Resource {
                kind: "repository".to_string(),
                name: name.into(),
            },
            action: action.into(),
        }
    }
}

/// The identity a controller grants after a successful authorization.
#[derive(Debug, Clone, Default)]
pub struct Grant {
    /// Authenticated subject, empty for anonymous grants.
    pub subject: String,
}

/// Credential material extracted from a request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// The Authorization header verbatim, when present.
    pub authorization: Option<String>,
}

/// Pluggable authorization hook.
///
/// Implementations decide whether the presented credentials may perform all
/// of the requested accesses; a denial carries the challenge the HTTP layer
/// should return to the client.
#[async_trait]
pub trait AccessController: Send + Sync {
    async fn authorized(
        &self,
        credentials: &Credentials,
        accesses: &[Access],
    ) -> Result<Grant, AuthError>;
}

/// Builds controllers from configuration parameters.
pub trait AccessControllerFactory: Send + Sync {
    fn create(&self, parameters: &Parameters) -> Result<Arc<dyn AccessController>, AuthError>;
}

static CONTROLLER_FACTORIES: LazyLock<RwLock<HashMap<String, Arc<dyn AccessControllerFactory>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a controller factory under `name`, replacing any previous entry.
pub fn register_access_controller(name: &str, factory: Arc<dyn AccessControllerFactory>) {
    CONTROLLER_FACTORIES.write().insert(name.to_string(), factory);
}

/// Create a controller by registered scheme name.
pub fn create_access_controller(
    name: &str,
    parameters: &Parameters,
) -> Result<Arc<dyn AccessController>, AuthError> {
    let factory = CONTROLLER_FACTORIES
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| AuthError::UnknownScheme(name.to_string()))?;
    factory.create(parameters)
}
