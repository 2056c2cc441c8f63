//! Storage driver contract
//!
//! A driver is a narrow byte store keyed by slash-separated paths. Every
//! higher layer (blob store, manifest store, caches) is built on this
//! contract, so drivers stay deliberately small: whole-object get/put, an
//! offset reader, a resumable writer, stat/list/rename/delete, and an
//! optional pre-signed URL hook.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::DriverError;

/// Type alias for a boxed stream of bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DriverError>> + Send>>;

/// Default cap on outstanding driver operations.
pub const DEFAULT_MAX_CONCURRENCY: usize = 50;

/// Floor applied to remote object-store drivers, which degrade badly when
/// starved of parallelism.
pub const MIN_CLOUD_CONCURRENCY: usize = 25;

/// Metadata for a stored object or directory.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: Option<SystemTime>,
    pub is_dir: bool,
}

/// Options for building a pre-signed download URL.
#[derive(Debug, Clone)]
pub struct UrlOptions {
    /// HTTP method the URL will be used with.
    pub method: String,
    /// Requested validity window.
    pub expiry: Option<Duration>,
    /// Address of the requesting client, when known. Middleware may use it
    /// to decide redirect eligibility.
    pub client_ip: Option<IpAddr>,
}

impl Default for UrlOptions {
    fn default() -> Self {
        UrlOptions {
            method: "GET".to_string(),
            expiry: None,
            client_ip: None,
        }
    }
}

/// Result of a walk callback for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    /// Keep walking.
    Continue,
    /// For a directory: do not descend. For a file: skip the rest of the
    /// containing directory.
    SkipDir,
    /// Stop the walk entirely.
    Stop,
}

/// Storage driver contract
///
/// Paths are absolute, slash-separated, and validated by [`validate_path`].
/// Implementations must be safe for concurrent use; a single writer returned
/// by [`StorageDriver::writer`] is driven by one caller at a time.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Short name of the implementation, e.g. `"filesystem"`.
    fn name(&self) -> &'static str;

    /// Upper bound on concurrent operations this driver tolerates.
    fn max_concurrency(&self) -> usize {
        DEFAULT_MAX_CONCURRENCY
    }

    /// Read a whole object.
    async fn get_content(&self, path: &str) -> Result<Bytes, DriverError>;

    /// Atomically write a whole object.
    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), DriverError>;

    /// Stream an object starting at `offset`. Fails with `InvalidOffset`
    /// when the offset lies past the end of the object.
    async fn reader(&self, path: &str, offset: u64) -> Result<ByteStream, DriverError>;

    /// Open a resumable writer. With `append`, the writer continues from the
    /// current size of the object; otherwise it starts empty.
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, DriverError>;

    /// Metadata for a path.
    async fn stat(&self, path: &str) -> Result<FileInfo, DriverError>;

    /// Immediate children of a directory, as full paths.
    async fn list(&self, path: &str) -> Result<Vec<String>, DriverError>;

    /// Move an object. Atomic where the backend allows it.
    async fn rename(&self, source: &str, dest: &str) -> Result<(), DriverError>;

    /// Recursively delete a path.
    async fn delete(&self, path: &str) -> Result<(), DriverError>;

    /// Build a URL for direct client download. Drivers without a signing
    /// scheme return `Unsupported`, which callers treat as "serve the bytes
    /// yourself".
    async fn url_for(&self, path: &str, options: &UrlOptions) -> Result<String, DriverError>;
}

/// Resumable writer for one path.
#[async_trait]
pub trait FileWriter: Send + Sync {
    /// Append a chunk.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), DriverError>;

    /// Bytes written so far, including any pre-existing content when opened
    /// in append mode.
    fn size(&self) -> u64;

    /// Flush and mark the content complete. No writes may follow.
    async fn commit(&mut self) -> Result<(), DriverError>;

    /// Abort and remove any partial content.
    async fn cancel(&mut self) -> Result<(), DriverError>;

    /// Flush and release resources, keeping partial content for a later
    /// append. Idempotent.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Check the path grammar shared by all drivers.
pub fn validate_path(path: &str) -> Result<(), DriverError> {
    let valid = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && path[1..].split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b':'))
                && segment != "."
                && segment != ".."
        });
    if valid {
        Ok(())
    } else {
        Err(DriverError::InvalidPath {
            path: path.to_string(),
        })
    }
}

/// Depth-first traversal over a driver, children in sorted order.
///
/// The callback steers the walk through [`WalkControl`]: `SkipDir` on a
/// directory prunes it, `SkipDir` on a file abandons the rest of that
/// directory, `Stop` ends the walk.
pub async fn walk<F>(
    driver: &dyn StorageDriver,
    path: &str,
    f: &mut F,
) -> Result<(), DriverError>
where
    F: FnMut(&FileInfo) -> WalkControl + Send,
{
    walk_dir(driver, path.to_string(), f).await?;
    Ok(())
}

fn walk_dir<'a, F>(
    driver: &'a dyn StorageDriver,
    path: String,
    f: &'a mut F,
) -> Pin<Box<dyn Future<Output = Result<bool, DriverError>> + Send + 'a>>
where
    F: FnMut(&FileInfo) -> WalkControl + Send,
{
    Box::pin(async move {
        let mut children = driver.list(&path).await?;
        children.sort();
        for child in children {
            let info = match driver.stat(&child).await {
                Ok(info) => info,
                // Raced with a concurrent delete; the entry is simply gone.
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            match f(&info) {
                WalkControl::Stop => return Ok(false),
                WalkControl::SkipDir => {
                    if info.is_dir {
                        continue;
                    }
                    return Ok(true);
                }
                WalkControl::Continue => {
                    if info.is_dir && !walk_dir(driver, child, f).await? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/v2/blobs/sha256/ab/abcd/data").is_ok());
        assert!(validate_path("/v2/repositories/foo/_uploads/5-0e/startedat").is_ok());

        assert!(validate_path("").is_err());
        assert!(validate_path("relative/path").is_err());
        assert!(validate_path("/").is_err());
        assert!(validate_path("/trailing/").is_err());
        assert!(validate_path("/double//slash").is_err());
        assert!(validate_path("/dot/../dot").is_err());
        assert!(validate_path("/bad/se gment").is_err());
    }
}
