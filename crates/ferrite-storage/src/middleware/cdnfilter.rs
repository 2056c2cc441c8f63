//! CDN eligibility filter
//!
//! Wraps a URL-producing driver (usually the redirect middleware) and only
//! hands out redirect URLs to clients whose address falls inside a
//! periodically refreshed set of published CIDR ranges, e.g. the AWS
//! `ip-ranges.json` document. Everyone else gets `Unsupported`, which the
//! blob handlers treat as "stream the bytes directly".

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};

use crate::driver::{ByteStream, FileInfo, FileWriter, StorageDriver, UrlOptions};
use crate::error::DriverError;
use crate::factory::{Parameters, string_param};
use crate::middleware::StorageMiddlewareFactory;
use crate::retry::{BackoffPolicy, retry_with_backoff};

pub const DEFAULT_IP_RANGES_URL: &str = "https://ip-ranges.amazonaws.com/ip-ranges.json";

/// Default refresh interval for the published range document.
pub const DEFAULT_UPDATE_FREQUENCY: Duration = Duration::from_secs(12 * 3600);

#[derive(Debug, Deserialize)]
struct RangeDocument {
    #[serde(default)]
    prefixes: Vec<V4Entry>,
    #[serde(default)]
    ipv6_prefixes: Vec<V6Entry>,
}

#[derive(Debug, Deserialize)]
struct V4Entry {
    ip_prefix: String,
    #[serde(default)]
    region: String,
}

#[derive(Debug, Deserialize)]
struct V6Entry {
    ipv6_prefix: String,
    #[serde(default)]
    region: String,
}

#[derive(Default)]
struct Snapshot {
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

impl Snapshot {
    fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                let bits = u32::from(v4);
                self.v4.iter().any(|(net, mask)| bits & mask == *net)
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                self.v6.iter().any(|(net, mask)| bits & mask == *net)
            }
        }
    }
}

/// Periodically refreshed CIDR membership test.
///
/// Until the first successful refresh every lookup answers `false`; a failed
/// refresh keeps the previous snapshot in place.
pub struct IpRangeFilter {
    url: String,
    regions: Vec<String>,
    client: reqwest::Client,
    snapshot: RwLock<Option<Snapshot>>,
}

impl IpRangeFilter {
    pub fn new(url: impl Into<String>, regions: Vec<String>) -> Self {
        IpRangeFilter {
            url: url.into(),
            regions,
            client: reqwest::Client::new(),
            snapshot: RwLock::new(None),
        }
    }

    /// True when `ip` lies inside the current snapshot.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match self.snapshot.read().as_ref() {
            Some(snapshot) => snapshot.contains(ip),
            None => false,
        }
    }

    /// Fetch the range document and swap in a fresh snapshot.
    pub async fn refresh(&self) -> Result<usize, DriverError> {
        let policy = BackoffPolicy::default();
        let body = retry_with_backoff(
            policy,
            |err: &reqwest::Error| {
                err.status()
                    .is_some_and(|s| s.as_u16() == 429 || s.is_server_error())
                    || err.is_timeout()
                    || err.is_connect()
            },
            || async {
                self.client
                    .get(&self.url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await
            },
        )
        .await
        .map_err(|e| DriverError::Backend(format!("fetching {}: {e}", self.url)))?;

        self.update_from_json(&body)
    }

    /// Parse a range document and install it. Split out of `refresh` so the
    /// parsing is testable without a network.
    pub fn update_from_json(&self, body: &str) -> Result<usize, DriverError> {
        let doc: RangeDocument = serde_json::from_str(body)
            .map_err(|e| DriverError::Backend(format!("parsing ip ranges: {e}")))?;

        let region_ok = |region: &str| {
            self.regions.is_empty() || self.regions.iter().any(|r| r.eq_ignore_ascii_case(region))
        };

        let mut snapshot = Snapshot::default();
        for entry in &doc.prefixes {
            if !region_ok(&entry.region) {
                continue;
            }
            match parse_v4_cidr(&entry.ip_prefix) {
                Some(cidr) => snapshot.v4.push(cidr),
                None => warn!("skipping malformed ipv4 prefix: {}", entry.ip_prefix),
            }
        }
        for entry in &doc.ipv6_prefixes {
            if !region_ok(&entry.region) {
                continue;
            }
            match parse_v6_cidr(&entry.ipv6_prefix) {
                Some(cidr) => snapshot.v6.push(cidr),
                None => warn!("skipping malformed ipv6 prefix: {}", entry.ipv6_prefix),
            }
        }

        let count = snapshot.v4.len() + snapshot.v6.len();
        *self.snapshot.write() = Some(snapshot);
        Ok(count)
    }

    /// Refresh now and then on every `interval` tick, keeping the last good
    /// snapshot across failures.
    pub fn spawn_refresh_task(
        self: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let filter = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match filter.refresh().await {
                    Ok(count) => info!("refreshed ip range filter: {count} prefixes"),
                    Err(e) => warn!("ip range refresh failed, keeping previous snapshot: {e}"),
                }
            }
        })
    }
}

fn parse_v4_cidr(s: &str) -> Option<(u32, u32)> {
    let (addr, len) = s.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let len: u32 = len.parse().ok()?;
    if len > 32 {
        return None;
    }
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    Some((u32::from(addr) & mask, mask))
}

fn parse_v6_cidr(s: &str) -> Option<(u128, u128)> {
    let (addr, len) = s.split_once('/')?;
    let addr: Ipv6Addr = addr.parse().ok()?;
    let len: u32 = len.parse().ok()?;
    if len > 128 {
        return None;
    }
    let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
    Some((u128::from(addr) & mask, mask))
}

/// Driver wrapper gating redirect URLs on client eligibility.
pub struct CdnFilterMiddleware {
    inner: Arc<dyn StorageDriver>,
    filter: Arc<IpRangeFilter>,
}

impl CdnFilterMiddleware {
    pub fn new(inner: Arc<dyn StorageDriver>, filter: Arc<IpRangeFilter>) -> Self {
        CdnFilterMiddleware { inner, filter }
    }
}

#[async_trait]
impl StorageDriver for CdnFilterMiddleware {
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

    async fn url_for(&self, path: &str, options: &UrlOptions) -> Result<String, DriverError> {
        let eligible = options
            .client_ip
            .map(|ip| self.filter.contains(ip))
            .unwrap_or(false);
        if !eligible {
            return Err(DriverError::Unsupported {
                driver: self.inner.name(),
                operation: "url_for",
            });
        }
        self.inner.url_for(path, options).await
    }
}

pub(crate) struct CdnFilterFactory;

impl StorageMiddlewareFactory for CdnFilterFactory {
    fn create(
        &self,
        inner: Arc<dyn StorageDriver>,
        options: &Parameters,
    ) -> Result<Arc<dyn StorageDriver>, DriverError> {
        let base_url = string_param(options, "baseurl")?;
        let inner = Arc::new(crate::middleware::redirect::RedirectMiddleware::new(
            inner, &base_url,
        )?);

        let url = string_param(options, "iprangesurl")
            .unwrap_or_else(|_| DEFAULT_IP_RANGES_URL.to_string());
        let regions = options
            .get("awsregion")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let interval = options
            .get("updatefrequency")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_UPDATE_FREQUENCY);

        let filter = Arc::new(IpRangeFilter::new(url, regions));
        filter.clone().spawn_refresh_task(interval);

        Ok(Arc::new(CdnFilterMiddleware::new(inner, filter)))
    }
}
