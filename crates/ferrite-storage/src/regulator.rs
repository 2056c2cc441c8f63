//! Driver concurrency regulator
//!
//! Wraps a driver and caps the number of outstanding operations with a
//! semaphore. The wrapped driver's own `max_concurrency` is the default
//! limit; cloud-style drivers are never capped below `MIN_CLOUD_CONCURRENCY`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::driver::{
    ByteStream, FileInfo, FileWriter, MIN_CLOUD_CONCURRENCY, StorageDriver, UrlOptions,
};
use crate::error::DriverError;

/// Semaphore-bounded wrapper around a storage driver.
pub struct Regulator {
    inner: Arc<dyn StorageDriver>,
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl Regulator {
    pub fn new(inner: Arc<dyn StorageDriver>, limit: usize) -> Self {
        let limit = limit.max(1);
        Regulator {
            inner,
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wrap a driver at its own advertised concurrency limit.
    pub fn from_driver(inner: Arc<dyn StorageDriver>) -> Self {
        let limit = inner.max_concurrency();
        Self::new(inner, limit)
    }

    /// Limit used for remote drivers that degrade when over-throttled.
    pub fn cloud_limit(requested: usize) -> usize {
        requested.max(MIN_CLOUD_CONCURRENCY)
    }

    async fn permit(&self) -> tokio::sync::SemaphorePermit<'_> {
        // The semaphore is owned by self and never closed.
        self.semaphore
            .acquire()
            .await
            .expect("regulator semaphore closed")
    }
}

#[async_trait]
impl StorageDriver for Regulator {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn max_concurrency(&self) -> usize {
        self.limit
    }

    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError> {
        let _permit = self.permit().await;
        self.inner.get_content(path).await
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), DriverError> {
        let _permit = self.permit().await;
        self.inner.put_content(path, content).await
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ByteStream, DriverError> {
        let _permit = self.permit().await;
        self.inner.reader(path, offset).await
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError> {
        let _permit = self.permit().await;
        self.inner.writer(path, append).await
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        let _permit = self.permit().await;
        self.inner.stat(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        let _permit = self.permit().await;
        self.inner.list(path).await
    }

    async fn rename(&self, source: &str, dest: &str) -> Result<(), DriverError> {
        let _permit = self.permit().await;
        self.inner.rename(source, dest).await
    }

    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        let _permit = self.permit().await;
        self.inner.delete(path).await
    }

    async fn url_for(&self, path: &str, options: &UrlOptions) -> Result<String, DriverError> {
        let _permit = self.permit().await;
        self.inner.url_for(path, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::InMemoryDriver;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_regulator_passthrough() {
        let driver = Regulator::new(Arc::new(InMemoryDriver::new()), 2);
        driver
            .put_content("/k", Bytes::from_static(b"v"))
            .await
            .unwrap();
        assert_eq!(&driver.get_content("/k").await.unwrap()[..], b"v");
        assert_eq!(driver.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_regulator_allows_many_sequentially_queued_calls() {
        let driver = Arc::new(Regulator::new(Arc::new(InMemoryDriver::new()), 2));
        let mut tasks = Vec::new();
        for i in 0..32 {
            let driver = driver.clone();
            tasks.push(tokio::spawn(async move {
                driver
                    .put_content(&format!("/k/{i}"), Bytes::from_static(b"v"))
                    .await
            }));
        }
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }
        assert_eq!(driver.list("/k").await.unwrap().len(), 32);
    }

    #[test]
    fn test_cloud_limit_floor() {
        assert_eq!(Regulator::cloud_limit(5), MIN_CLOUD_CONCURRENCY);
        assert_eq!(Regulator::cloud_limit(80), 80);
    }
}
