//! Redirect middleware
//!
//! Rewrites `url_for` results onto a fixed base URL, typically a CDN or
//! reverse proxy fronting the backing store. All other operations delegate
//! to the wrapped driver.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::driver::{ByteStream, FileInfo, FileWriter, StorageDriver, UrlOptions};
use crate::error::DriverError;
use crate::factory::{Parameters, string_param};
use crate::middleware::StorageMiddlewareFactory;

pub struct RedirectMiddleware {
    inner: Arc<dyn StorageDriver>,
    scheme: String,
    host: String,
    base_path: String,
}

impl RedirectMiddleware {
    pub fn new(inner: Arc<dyn StorageDriver>, base_url: &str) -> Result<Self, DriverError> {
        let url = Url::parse(base_url).map_err(|e| DriverError::InvalidParameter {
            name: "baseurl".to_string(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DriverError::InvalidParameter {
                name: "baseurl".to_string(),
                message: format!("unsupported scheme: {}", url.scheme()),
            });
        }
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(DriverError::InvalidParameter {
                    name: "baseurl".to_string(),
                    message: "missing host".to_string(),
                });
            }
        };
        Ok(RedirectMiddleware {
            inner,
            scheme: url.scheme().to_string(),
            host,
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    fn rewrite(&self, path: &str) -> String {
        // `path` is always absolute, so joining never doubles a separator.
        format!("{}://{}{}{}", self.scheme, self.host, self.base_path, path)
    }
}

#[async_trait]
impl StorageDriver for RedirectMiddleware {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency()
    }

    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError> {
        self.inner.get_content(path).await
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), DriverError> {
        self.inner.put_content(path, content).await
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ByteStream, DriverError> {
        self.inner.reader(path, offset).await
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError> {
        self.inner.writer(path, append).await
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError> {
        self.inner.stat(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError> {
        self.inner.list(path).await
    }

    async fn rename(&self, source: &str, dest: &str) -> Result<(), DriverError> {
        self.inner.rename(source, dest).await
    }

    async fn delete(&self, path: &str) -> Result<(), DriverError> {
        self.inner.delete(path).await
    }

    async fn url_for(&self, path: &str, _options: &UrlOptions) -> Result<String, DriverError> {
        Ok(self.rewrite(path))
    }
}

pub(crate) struct RedirectFactory;

impl StorageMiddlewareFactory for RedirectFactory {
    fn create(
        &self,
        inner: Arc<dyn StorageDriver>,
        options: &Parameters,
    ) -> Result<Arc<dyn StorageDriver>, DriverError> {
        let base_url = string_param(options, "baseurl")?;
        Ok(Arc::new(RedirectMiddleware::new(inner, &base_url)?))
    }
}
