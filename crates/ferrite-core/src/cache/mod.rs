//! Blob descriptor cache
//!
//! A soft mapping from digest to descriptor, with repository-scoped views
//! that enforce set membership and may override a blob's media type per
//! repository. Absence or failure of the cache must never lose data: every
//! consumer falls back to the blob store and repopulates on miss.

mod memory;
mod metrics;
mod redis;

pub use memory::InMemoryCacheProvider;
pub use metrics::MetricsCacheProvider;
pub use redis::RedisCacheProvider;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use ferrite_reference::{Digest, Name};
use ferrite_storage::factory::Parameters;
use parking_lot::RwLock;

use crate::descriptor::Descriptor;
use crate::error::DistributionError;

/// Digest-to-descriptor mapping, either global or scoped to one repository.
#[async_trait]
pub trait BlobDescriptorCache: Send + Sync {
    /// Cached descriptor for `digest`, `UnknownBlob` on a miss.
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError>;

    /// Record a descriptor. Global media types are set only when absent;
    /// scoped views force-set their per-repository override.
    async fn set_descriptor(
        &self,
        digest: &Digest,
        desc: Descriptor,
    ) -> Result<(), DistributionError>;

    /// Forget a descriptor. Clearing an absent entry is not an error.
    async fn clear(&self, digest: &Digest) -> Result<(), DistributionError>;
}

/// A cache backend able to hand out repository-scoped views.
pub trait BlobDescriptorCacheProvider: BlobDescriptorCache {
    fn repository_scoped(
        &self,
        name: &Name,
    ) -> Result<Arc<dyn BlobDescriptorCache>, DistributionError>;
}

/// Shared validation for `set_descriptor` arguments.
pub(crate) fn validate_set(
    digest: &Digest,
    desc: &Descriptor,
) -> Result<(), DistributionError> {
    digest.validate()?;
    desc.validate()?;
    // The key and the descriptor may legitimately disagree across
    // algorithms; within one algorithm they must be the same digest.
    if digest.algorithm() == desc.digest.algorithm() && *digest != desc.digest {
        return Err(DistributionError::DigestMismatch {
            expected: digest.clone(),
            actual: desc.digest.clone(),
        });
    }
    Ok(())
}

/// Builds cache providers from configuration parameters.
#[async_trait]
pub trait CacheProviderFactory: Send + Sync {
    async fn create(
        &self,
        parameters: &Parameters,
    ) -> Result<Arc<dyn BlobDescriptorCacheProvider>, DistributionError>;
}

static CACHE_FACTORIES: LazyLock<RwLock<HashMap<String, Arc<dyn CacheProviderFactory>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a cache provider factory under `name`, replacing any previous
/// entry.
pub fn register_cache_provider(name: &str, factory: Arc<dyn CacheProviderFactory>) {
    CACHE_FACTORIES.write().insert(name.to_string(), factory);
}

/// Create a cache provider by registered name.
pub async fn create_cache_provider(
    name: &str,
    parameters: &Parameters,
) -> Result<Arc<dyn BlobDescriptorCacheProvider>, DistributionError> {
    let factory = CACHE_FACTORIES
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| DistributionError::Cache(format!("unknown cache provider: {name}")))?;
    factory.create(parameters).await
}

/// Register the cache providers shipped with this crate.
pub fn install_default_cache_providers() {
    register_cache_provider("inmemory", Arc::new(InMemoryFactory));
    register_cache_provider("redis", Arc::new(RedisFactory));
}

struct InMemoryFactory;

#[async_trait]
impl CacheProviderFactory for InMemoryFactory {
    async fn create(
        &self,
        _parameters: &Parameters,
    ) -> Result<Arc<dyn BlobDescriptorCacheProvider>, DistributionError> {
        Ok(Arc::new(InMemoryCacheProvider::new()))
    }
}

struct RedisFactory;

#[async_trait]
impl CacheProviderFactory for RedisFactory {
    async fn create(
        &self,
        parameters: &Parameters,
    ) -> Result<Arc<dyn BlobDescriptorCacheProvider>, DistributionError> {
        let addr = parameters
            .get("addr")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DistributionError::Cache("redis cache requires an addr".to_string()))?;
        Ok(Arc::new(RedisCacheProvider::connect(addr).await?))
    }
}
