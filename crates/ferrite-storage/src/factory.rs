//! Driver factory registry
//!
//! Drivers are selected by name at startup from a process-wide registry.
//! The registry is populated during initialization and stays writable so a
//! test harness can substitute entries.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use serde_json::Value;

use crate::driver::StorageDriver;
use crate::error::DriverError;
use crate::filesystem::FilesystemDriver;
use crate::inmemory::InMemoryDriver;

/// Untyped driver parameters, as deserialized from configuration.
pub type Parameters = HashMap<String, Value>;

/// Builds driver instances from configuration parameters.
pub trait StorageDriverFactory: Send + Sync {
    fn create(&self, parameters: &Parameters) -> Result<Arc<dyn StorageDriver>, DriverError>;
}

static DRIVER_FACTORIES: LazyLock<RwLock<HashMap<String, Arc<dyn StorageDriverFactory>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a driver factory under `name`, replacing any previous entry.
pub fn register_driver(name: &str, factory: Arc<dyn StorageDriverFactory>) {
    DRIVER_FACTORIES.write().insert(name.to_string(), factory);
}

/// Create a driver by registered name.
pub fn create_driver(name: &str, parameters: &Parameters) -> Result<Arc<dyn StorageDriver>, DriverError> {
    let factory = DRIVER_FACTORIES
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| DriverError::InvalidDriverName(name.to_string()))?;
    factory.create(parameters)
}

/// Register the reference drivers shipped with this crate.
pub fn install_default_drivers() {
    register_driver("filesystem", Arc::new(FilesystemFactory));
    register_driver("inmemory", Arc::new(InMemoryFactory));
}

/// Fetch a required string parameter.
pub fn string_param(parameters: &Parameters, name: &str) -> Result<String, DriverError> {
    match parameters.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(other) => Err(DriverError::InvalidParameter {
            name: name.to_string(),
            message: format!("expected a non-empty string, got {other}"),
        }),
        None => Err(DriverError::InvalidParameter {
            name: name.to_string(),
            message: "required parameter is missing".to_string(),
        }),
    }
}

struct FilesystemFactory;

impl StorageDriverFactory for FilesystemFactory {
    fn create(&self, parameters: &Parameters) -> Result<Arc<dyn StorageDriver>, DriverError> {
        let root = string_param(parameters, "rootdirectory")?;
        Ok(Arc::new(FilesystemDriver::new(root)))
    }
}

struct InMemoryFactory;

impl StorageDriverFactory for InMemoryFactory {
    fn create(&self, _parameters: &Parameters) -> Result<Arc<dyn StorageDriver>, DriverError> {
        Ok(Arc::new(InMemoryDriver::new()))
    }
}
