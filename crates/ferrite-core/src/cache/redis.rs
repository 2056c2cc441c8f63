//! Redis descriptor cache
//!
//! Key layout:
//!
//! ```text
//! blobs::<digest>                          hash {digest, size, mediatype}
//! repository::<repo>::blobs                set of member digests
//! repository::<repo>::blobs::<digest>      hash {mediatype} per-repo override
//! ```
//!
//! Older deployments wrote these hashes without a `size` field; such records
//! are treated as misses so the statter repopulates them from the blob
//! store.

use std::sync::Arc;

use async_trait::async_trait;
use ferrite_reference::{Digest, Name};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::cache::{BlobDescriptorCache, BlobDescriptorCacheProvider, validate_set};
use crate::descriptor::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
use crate::error::DistributionError;

fn cache_err(err: redis::RedisError) -> DistributionError {
    DistributionError::Cache(err.to_string())
}

fn global_key(digest: &Digest) -> String {
    format!("blobs::{digest}")
}

fn members_key(repo: &str) -> String {
    format!("repository::{repo}::blobs")
}

fn scoped_key(repo: &str, digest: &Digest) -> String {
    format!("repository::{repo}::blobs::{digest}")
}

/// Descriptor cache backed by a redis server.
#[derive(Clone)]
pub struct RedisCacheProvider {
    conn: ConnectionManager,
}

impl RedisCacheProvider {
    /// Connect to `addr` (a redis URL such as `redis://cache:6379/0`).
    pub async fn connect(addr: &str) -> Result<Self, DistributionError> {
        let client = redis::Client::open(addr)
            .map_err(|e| DistributionError::Cache(format!("invalid redis addr: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(cache_err)?;
        Ok(RedisCacheProvider { conn })
    }

    async fn global_stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        let mut conn = self.conn.clone();
        let (size, media_type): (Option<i64>, Option<String>) = redis::pipe()
            .hget(global_key(digest), "size")
            .hget(global_key(digest), "mediatype")
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;

        // No usable size means the record predates the current schema;
        // report a miss so the caller repopulates it.
        let size = match size {
            Some(size) => size,
            None => {
                return Err(DistributionError::UnknownBlob {
                    digest: digest.clone(),
                });
            }
        };
        Ok(Descriptor {
            media_type: media_type
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| MEDIA_TYPE_OCTET_STREAM.to_string()),
            digest: digest.clone(),
            size,
        })
    }

    async fn global_set(
        &self,
        digest: &Digest,
        desc: &Descriptor,
    ) -> Result<(), DistributionError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .hset(global_key(digest), "digest", desc.digest.to_string())
            .ignore()
            .hset(global_key(digest), "size", desc.size)
            .ignore()
            .hset_nx(global_key(digest), "mediatype", &desc.media_type)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(cache_err)
    }
}

#[async_trait]
impl BlobDescriptorCache for RedisCacheProvider {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        digest.validate()?;
        self.global_stat(digest).await
    }

    async fn set_descriptor(
        &self,
        digest: &Digest,
        desc: Descriptor,
    ) -> Result<(), DistributionError> {
        validate_set(digest, &desc)?;
        self.global_set(digest, &desc).await
    }

    async fn clear(&self, digest: &Digest) -> Result<(), DistributionError> {
        digest.validate()?;
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(global_key(digest)).await.map_err(cache_err)
    }
}

impl BlobDescriptorCacheProvider for RedisCacheProvider {
    fn repository_scoped(
        &self,
        name: &Name,
    ) -> Result<Arc<dyn BlobDescriptorCache>, DistributionError> {
        Ok(Arc::new(RedisScopedCache {
            provider: self.clone(),
            repo: name.to_string(),
        }))
    }
}

struct RedisScopedCache {
    provider: RedisCacheProvider,
    repo: String,
}

#[async_trait]
impl BlobDescriptorCache for RedisScopedCache {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        digest.validate()?;
        let mut conn = self.provider.conn.clone();

        let member: bool = conn
            .sismember(members_key(&self.repo), digest.to_string())
            .await
            .map_err(cache_err)?;
        if !member {
            return Err(DistributionError::UnknownBlob {
                digest: digest.clone(),
            });
        }

        let mut desc = self.provider.global_stat(digest).await?;
        let override_media: Option<String> = conn
            .hget(scoped_key(&self.repo, digest), "mediatype")
            .await
            .map_err(cache_err)?;
        if let Some(media_type) = override_media.filter(|m| !m.is_empty()) {
            desc.media_type = media_type;
        }
        Ok(desc)
    }

    async fn set_descriptor(
        &self,
        digest: &Digest,
        desc: Descriptor,
    ) -> Result<(), DistributionError> {
        validate_set(digest, &desc)?;
        self.provider.global_set(digest, &desc).await?;

        let mut conn = self.provider.conn.clone();
        redis::pipe()
            .sadd(members_key(&self.repo), digest.to_string())
            .ignore()
            // Scoped media type is force-set, unlike the global record.
            .hset(scoped_key(&self.repo, digest), "mediatype", &desc.media_type)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(cache_err)
    }

    async fn clear(&self, digest: &Digest) -> Result<(), DistributionError> {
        digest.validate()?;
        let mut conn = self.provider.conn.clone();
        redis::pipe()
            .srem(members_key(&self.repo), digest.to_string())
            .ignore()
            .del(scoped_key(&self.repo, digest))
            .ignore()
            .del(global_key(digest))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(cache_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_reference::Algorithm;

    #[test]
    fn test_key_layout() {
        let digest = Digest::from_bytes(Algorithm::Sha256, b"x");
        assert_eq!(global_key(&digest), format!("blobs::{digest}"));
        assert_eq!(members_key("foo/bar"), "repository::foo/bar::blobs");
        assert_eq!(
            scoped_key("foo/bar", &digest),
            format!("repository::foo/bar::blobs::{digest}")
        );
    }
}
