//! Ferrite Storage Layer
//!
//! This crate defines the byte-oriented storage-driver contract the registry
//! is built on, plus the reference drivers (filesystem, in-memory), the
//! concurrency regulator, the driver/middleware factory registries, and the
//! URL middleware used for offloaded blob download.

pub mod driver;
pub mod error;
pub mod factory;
pub mod filesystem;
pub mod inmemory;
pub mod middleware;
pub mod regulator;
pub mod retry;

pub use driver::{ByteStream, FileInfo, FileWriter, StorageDriver, UrlOptions, WalkControl, walk};
pub use error::DriverError;
pub use factory::{Parameters, create_driver, install_default_drivers, register_driver};
pub use filesystem::FilesystemDriver;
pub use inmemory::InMemoryDriver;
pub use regulator::Regulator;
