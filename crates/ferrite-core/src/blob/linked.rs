//! Repository-scoped blob access
//!
//! A repository hosts a blob exactly when a link file exists under its
//! `_layers` tree. This store enforces that membership on every read, keeps
//! the descriptor cache warm, and owns the repository's upload sessions.

use std::sync::Arc;

use bytes::Bytes;
use ferrite_reference::{Digest, Name};
use ferrite_storage::{ByteStream, StorageDriver};
use tracing::{debug, warn};

use crate::blob::{BlobStore, BlobWriter};
use crate::cache::BlobDescriptorCache;
use crate::descriptor::Descriptor;
use crate::error::DistributionError;
use crate::paths::{PathSpec, path_for};

/// Blob store view scoped to a single repository.
#[derive(Clone)]
pub struct LinkedBlobStore {
    driver: Arc<dyn StorageDriver>,
    name: Name,
    store: BlobStore,
    cache: Option<Arc<dyn BlobDescriptorCache>>,
}

impl LinkedBlobStore {
    pub(crate) fn new(
        driver: Arc<dyn StorageDriver>,
        name: Name,
        cache: Option<Arc<dyn BlobDescriptorCache>>,
    ) -> Self {
        let store = BlobStore::new(driver.clone());
        LinkedBlobStore {
            driver,
            name,
            store,
            cache,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    fn unknown(&self, digest: &Digest) -> DistributionError {
        DistributionError::UnknownBlob {
            digest: digest.clone(),
        }
    }

    /// Descriptor for a blob this repository hosts.
    ///
    /// The cache is consulted first but is strictly advisory: a miss or a
    /// cache failure falls through to the link file and backing store, and
    /// the result repopulates the cache.
    pub async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        if let Some(cache) = &self.cache {
            match cache.stat(digest).await {
                Ok(desc) => return Ok(desc),
                Err(err) if err.is_not_found() => {}
                Err(err) => debug!("descriptor cache error for {digest}: {err}"),
            }
        }

        self.check_link(digest).await?;
        let desc = self.store.stat(digest).await?;

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set_descriptor(digest, desc.clone()).await {
                debug!("failed to repopulate descriptor cache for {digest}: {err}");
            }
        }
        Ok(desc)
    }

    /// Whole-blob read, gated on membership.
    pub async fn get(&self, digest: &Digest) -> Result<Bytes, DistributionError> {
        self.stat(digest).await?;
        self.store.get(digest).await
    }

    /// Stream a blob from the start, gated on membership.
    pub async fn open(&self, digest: &Digest) -> Result<ByteStream, DistributionError> {
        self.stat(digest).await?;
        self.store.open(digest).await
    }

    /// Ranged read, gated on membership.
    pub async fn reader(
        &self,
        digest: &Digest,
        offset: u64,
    ) -> Result<ByteStream, DistributionError> {
        self.stat(digest).await?;
        self.store.reader(digest, offset).await
    }

    /// Direct-download URL for a blob, when the driver (or its middleware)
    /// can produce one. `None` means the caller should serve the bytes
    /// itself.
    pub async fn url_for(
        &self,
        digest: &Digest,
        options: &ferrite_storage::UrlOptions,
    ) -> Result<Option<String>, DistributionError> {
        let path = path_for(PathSpec::BlobData { digest });
        match self.driver.url_for(&path, options).await {
            Ok(url) => Ok(Some(url)),
            Err(ferrite_storage::DriverError::Unsupported { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write the link file recording that this repository hosts `digest`.
    pub async fn link(&self, digest: &Digest) -> Result<(), DistributionError> {
        let path = path_for(PathSpec::LayerLink {
            name: &self.name,
            digest,
        });
        self.driver
            .put_content(&path, Bytes::from(digest.to_string()))
            .await?;
        Ok(())
    }

    /// Remove the repository's link. The blob data itself stays resident.
    pub async fn delete(&self, digest: &Digest) -> Result<(), DistributionError> {
        let path = path_for(PathSpec::LayerLink {
            name: &self.name,
            digest,
        });
        match self.driver.delete(&path).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Err(self.unknown(digest)),
            Err(err) => return Err(err.into()),
        }
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.clear(digest).await {
                debug!("failed to clear descriptor cache for {digest}: {err}");
            }
        }
        Ok(())
    }

    /// Make a blob that already exists globally visible in this repository
    /// without copying bytes. When `source` is given, the source repository
    /// must itself host the blob; authorization to read the source is the
    /// caller's concern.
    pub async fn mount(
        &self,
        source: Option<&Name>,
        digest: &Digest,
    ) -> Result<Descriptor, DistributionError> {
        if let Some(source) = source {
            let source_store =
                LinkedBlobStore::new(self.driver.clone(), source.clone(), None);
            source_store.check_link(digest).await?;
        }

        let desc = self.store.stat(digest).await?;
        self.link(digest).await?;
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set_descriptor(digest, desc.clone()).await {
                debug!("failed to cache mounted descriptor for {digest}: {err}");
            }
        }
        debug!("mounted blob {digest} into {}", self.name);
        Ok(desc)
    }

    /// Begin a new upload session.
    pub async fn create_upload(&self) -> Result<BlobWriter, DistributionError> {
        BlobWriter::start(self.driver.clone(), self.name.clone()).await
    }

    /// Reopen an existing upload session.
    pub async fn resume_upload(&self, id: &str) -> Result<BlobWriter, DistributionError> {
        BlobWriter::resume(self.driver.clone(), self.name.clone(), id).await
    }

    /// Current offset of an upload session.
    pub async fn upload_status(&self, id: &str) -> Result<u64, DistributionError> {
        let started = path_for(PathSpec::UploadStartedAt {
            name: &self.name,
            id,
        });
        if let Err(err) = self.driver.stat(&started).await {
            return Err(if err.is_not_found() {
                DistributionError::UnknownUpload { id: id.to_string() }
            } else {
                err.into()
            });
        }
        let data = path_for(PathSpec::UploadData {
            name: &self.name,
            id,
        });
        match self.driver.stat(&data).await {
            Ok(info) => Ok(info.size),
            Err(err) if err.is_not_found() => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove an upload session outright.
    pub async fn cancel_upload(&self, id: &str) -> Result<(), DistributionError> {
        let root = path_for(PathSpec::UploadRoot {
            name: &self.name,
            id,
        });
        match self.driver.delete(&root).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                Err(DistributionError::UnknownUpload { id: id.to_string() })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Commit an upload into this repository: validate, move into the blob
    /// store, link, and record the descriptor.
    ///
    /// The blob is linked under its canonical digest; when the client
    /// supplied a digest in another algorithm, that digest is linked too so
    /// both addresses resolve.
    pub async fn commit_upload(
        &self,
        writer: &mut BlobWriter,
        provisional: Descriptor,
    ) -> Result<Descriptor, DistributionError> {
        let offered_digest = provisional.digest.clone();
        let desc = writer.commit(provisional).await?;

        self.link(&desc.digest).await?;
        if offered_digest.algorithm() != desc.digest.algorithm() {
            self.link(&offered_digest).await?;
        }

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set_descriptor(&desc.digest, desc.clone()).await {
                warn!("failed to cache committed descriptor for {}: {err}", desc.digest);
            }
        }
        Ok(desc)
    }

    /// Verify the link file for `digest` exists and agrees with it.
    async fn check_link(&self, digest: &Digest) -> Result<(), DistributionError> {
        let path = path_for(PathSpec::LayerLink {
            name: &self.name,
            digest,
        });
        let content = match self.driver.get_content(&path).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => return Err(self.unknown(digest)),
            Err(err) => return Err(err.into()),
        };
        let linked = std::str::from_utf8(&content)
            .ok()
            .and_then(|s| Digest::parse(s.trim()).ok());
        match linked {
            Some(linked) if linked == *digest => Ok(()),
            _ => {
                warn!("corrupt link file for {digest} in {}", self.name);
                Err(self.unknown(digest))
            }
        }
    }
}
