//! Global content-addressable blob store

use std::sync::Arc;

use bytes::Bytes;
use ferrite_reference::{Algorithm, Digest};
use ferrite_storage::{ByteStream, DriverError, StorageDriver};
use tracing::debug;

use crate::descriptor::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
use crate::error::DistributionError;
use crate::paths::{PathSpec, path_for};

/// The process-wide blob store. Content is keyed purely by digest; whether a
/// repository may see a blob is decided by [`super::LinkedBlobStore`].
#[derive(Clone)]
pub struct BlobStore {
    driver: Arc<dyn StorageDriver>,
}

impl BlobStore {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        BlobStore { driver }
    }

    fn unknown(digest: &Digest) -> DistributionError {
        DistributionError::UnknownBlob {
            digest: digest.clone(),
        }
    }

    fn map_not_found(digest: &Digest, err: DriverError) -> DistributionError {
        if err.is_not_found() {
            Self::unknown(digest)
        } else {
            DistributionError::Driver(err)
        }
    }

    /// Descriptor for a committed blob.
    pub async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        let path = path_for(PathSpec::BlobData { digest });
        let info = self
            .driver
            .stat(&path)
            .await
            .map_err(|e| Self::map_not_found(digest, e))?;
        Ok(Descriptor::new(
            MEDIA_TYPE_OCTET_STREAM,
            digest.clone(),
            info.size as i64,
        ))
    }

    /// Whole-blob read.
    pub async fn get(&self, digest: &Digest) -> Result<Bytes, DistributionError> {
        let path = path_for(PathSpec::BlobData { digest });
        self.driver
            .get_content(&path)
            .await
            .map_err(|e| Self::map_not_found(digest, e))
    }

    /// Stream a blob from the start.
    pub async fn open(&self, digest: &Digest) -> Result<ByteStream, DistributionError> {
        self.reader(digest, 0).await
    }

    /// Stream a blob from `offset`, for ranged reads. Each non-sequential
    /// seek is a fresh call here, backed by a fresh ranged driver read.
    pub async fn reader(
        &self,
        digest: &Digest,
        offset: u64,
    ) -> Result<ByteStream, DistributionError> {
        let path = path_for(PathSpec::BlobData { digest });
        match self.driver.reader(&path, offset).await {
            Ok(stream) => Ok(stream),
            Err(err @ DriverError::InvalidOffset { .. }) => Err(DistributionError::Driver(err)),
            Err(err) => Err(Self::map_not_found(digest, err)),
        }
    }

    /// Store a complete blob, returning its descriptor. Writing content that
    /// is already present is a no-op beyond the existence check.
    pub async fn put(
        &self,
        media_type: &str,
        content: Bytes,
    ) -> Result<Descriptor, DistributionError> {
        let digest = Digest::from_bytes(Algorithm::Sha256, &content);
        let desc = Descriptor::new(media_type, digest.clone(), content.len() as i64);

        let path = path_for(PathSpec::BlobData { digest: &digest });
        match self.driver.stat(&path).await {
            Ok(_) => {
                debug!("blob {digest} already stored");
                return Ok(desc);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        self.driver.put_content(&path, content).await?;
        Ok(desc)
    }

    /// Remove a blob's data. Links pointing at it become dangling and are
    /// the responsibility of whoever deletes them.
    pub async fn delete(&self, digest: &Digest) -> Result<(), DistributionError> {
        let path = path_for(PathSpec::BlobDir { digest });
        self.driver
            .delete(&path)
            .await
            .map_err(|e| Self::map_not_found(digest, e))
    }

}
