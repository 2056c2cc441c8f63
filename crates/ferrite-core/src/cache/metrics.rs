//! Cache metrics observer
//!
//! Wraps a cache provider, counting hits and misses and timing each
//! operation. Semantics of the wrapped cache are preserved exactly; the
//! wrapper only watches.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ferrite_reference::{Digest, Name};
use metrics::{counter, histogram};

use crate::cache::{BlobDescriptorCache, BlobDescriptorCacheProvider};
use crate::descriptor::Descriptor;
use crate::error::DistributionError;

const REQUESTS: &str = "ferrite_cache_requests_total";
const HITS: &str = "ferrite_cache_hits_total";
const MISSES: &str = "ferrite_cache_misses_total";
const DURATION: &str = "ferrite_cache_operation_duration_seconds";

fn observe<T>(
    operation: &'static str,
    started: Instant,
    result: &Result<T, DistributionError>,
) {
    counter!(REQUESTS, "operation" => operation).increment(1);
    histogram!(DURATION, "operation" => operation).record(started.elapsed().as_secs_f64());
    match result {
        Ok(_) => counter!(HITS, "operation" => operation).increment(1),
        Err(err) if err.is_not_found() => {
            counter!(MISSES, "operation" => operation).increment(1);
        }
        Err(_) => {}
    }
}

/// Metrics-recording wrapper around a cache provider.
pub struct MetricsCacheProvider {
    inner: Arc<dyn BlobDescriptorCacheProvider>,
}

impl MetricsCacheProvider {
    pub fn new(inner: Arc<dyn BlobDescriptorCacheProvider>) -> Self {
        MetricsCacheProvider { inner }
    }
}

#[async_trait]
impl BlobDescriptorCache for MetricsCacheProvider {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        let started = Instant::now();
        let result = self.inner.stat(digest).await;
        observe("stat", started, &result);
        result
    }

    async fn set_descriptor(
        &self,
        digest: &Digest,
        desc: Descriptor,
    ) -> Result<(), DistributionError> {
        let started = Instant::now();
        let result = self.inner.set_descriptor(digest, desc).await;
        observe("set", started, &result);
        result
    }

    async fn clear(&self, digest: &Digest) -> Result<(), DistributionError> {
        let started = Instant::now();
        let result = self.inner.clear(digest).await;
        observe("clear", started, &result);
        result
    }
}

impl BlobDescriptorCacheProvider for MetricsCacheProvider {
    fn repository_scoped(
        &self,
        name: &Name,
    ) -> Result<Arc<dyn BlobDescriptorCache>, DistributionError> {
        let scoped = self.inner.repository_scoped(name)?;
        Ok(Arc::new(MetricsScopedCache { inner: scoped }))
    }
}

struct MetricsScopedCache {
    inner: Arc<dyn BlobDescriptorCache>,
}

#[async_trait]
impl BlobDescriptorCache for MetricsScopedCache {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        let started = Instant::now();
        let result = self.inner.stat(digest).await;
        observe("scoped_stat", started, &result);
        result
    }

    async fn set_descriptor(
        &self,
        digest: &Digest,
        desc: Descriptor,
    ) -> Result<(), DistributionError> {
        let started = Instant::now();
        let result = self.inner.set_descriptor(digest, desc).await;
        observe("scoped_set", started, &result);
        result
    }

    async fn clear(&self, digest: &Digest) -> Result<(), DistributionError> {
        let started = Instant::now();
        let result = self.inner.clear(digest).await;
        observe("scoped_clear", started, &result);
        result
    }
}
