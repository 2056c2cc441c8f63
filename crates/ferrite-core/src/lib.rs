//! Ferrite Registry Core
//!
//! The storage and distribution pipeline: path mapping, the
//! content-addressable blob store with resumable uploads, the typed manifest
//! and tag stores, the blob-descriptor cache, and the repository facade that
//! ties them together over a storage driver.

pub mod cache;
pub mod descriptor;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod purge;
pub mod registry;

pub mod blob;

pub use blob::{BlobStore, BlobWriter, LinkedBlobStore};
pub use cache::{BlobDescriptorCache, BlobDescriptorCacheProvider, create_cache_provider};
pub use descriptor::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
pub use error::DistributionError;
pub use manifest::{ManifestStore, ManifestVariant, TagStore};
pub use purge::{UploadPurgeConfig, purge_uploads, spawn_purge_task};
pub use registry::{Registry, Repository};
