//! Manifest revision store
//!
//! Revisions are immutable: the manifest bytes live in the global blob store
//! at their content address, and a per-repository revision link marks the
//! manifest as belonging to the repository. Tags layer on top of revisions
//! and never own bytes.

use std::sync::Arc;

use bytes::Bytes;
use ferrite_reference::{Digest, Name};
use ferrite_storage::StorageDriver;
use tracing::debug;

use crate::blob::{BlobStore, LinkedBlobStore};
use crate::cache::BlobDescriptorCache;
use crate::error::DistributionError;
use crate::manifest::ManifestVariant;
use crate::paths::{PathSpec, path_for};

/// Manifest storage for one repository.
#[derive(Clone)]
pub struct ManifestStore {
    driver: Arc<dyn StorageDriver>,
    name: Name,
    blobs: BlobStore,
    linked_blobs: LinkedBlobStore,
}

impl ManifestStore {
    pub(crate) fn new(
        driver: Arc<dyn StorageDriver>,
        name: Name,
        cache: Option<Arc<dyn BlobDescriptorCache>>,
    ) -> Self {
        let blobs = BlobStore::new(driver.clone());
        let linked_blobs = LinkedBlobStore::new(driver.clone(), name.clone(), cache);
        ManifestStore {
            driver,
            name,
            blobs,
            linked_blobs,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    fn unknown(&self, digest: &Digest) -> DistributionError {
        DistributionError::UnknownManifest {
            digest: digest.clone(),
        }
    }

    fn revision_link(&self, digest: &Digest) -> String {
        path_for(PathSpec::ManifestRevisionLink {
            name: &self.name,
            digest,
        })
    }

    /// Whether this repository has a revision for `digest`.
    pub async fn exists(&self, digest: &Digest) -> Result<bool, DistributionError> {
        match self.driver.stat(&self.revision_link(digest)).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch a revision's manifest, byte-exact as stored.
    pub async fn get(&self, digest: &Digest) -> Result<ManifestVariant, DistributionError> {
        if !self.exists(digest).await? {
            return Err(self.unknown(digest));
        }
        let raw = self
            .blobs
            .get(digest)
            .await
            .map_err(|err| match err {
                DistributionError::UnknownBlob { .. } => self.unknown(digest),
                other => other,
            })?;
        ManifestVariant::from_bytes(None, raw)
    }

    /// Verify and store a manifest, returning its digest.
    ///
    /// `tag` is the push target when the client addressed one; a legacy
    /// manifest carrying its own name/tag must agree with it.
    pub async fn put(
        &self,
        manifest: &ManifestVariant,
        tag: Option<&str>,
    ) -> Result<Digest, DistributionError> {
        self.verify(manifest, tag).await?;

        let raw: Bytes = manifest.raw().clone();
        let desc = self.blobs.put(manifest.media_type(), raw).await?;
        let digest = desc.digest;

        self.driver
            .put_content(
                &self.revision_link(&digest),
                Bytes::from(digest.to_string()),
            )
            .await?;
        debug!("stored manifest revision {digest} in {}", self.name);
        Ok(digest)
    }

    /// Remove the repository's revision link. The manifest blob remains in
    /// the global store.
    pub async fn delete(&self, digest: &Digest) -> Result<(), DistributionError> {
        let link_dir = {
            let link = self.revision_link(digest);
            link.trim_end_matches("/link").to_string()
        };
        match self.driver.delete(&link_dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(self.unknown(digest)),
            Err(err) => Err(err.into()),
        }
    }

    /// Check every digest the manifest references is known to this
    /// repository: blobs must be linked, child manifests must have
    /// revisions.
    async fn verify(
        &self,
        manifest: &ManifestVariant,
        tag: Option<&str>,
    ) -> Result<(), DistributionError> {
        if let Some((embedded_name, embedded_tag)) = manifest.target_hint() {
            if embedded_name != self.name.to_string() {
                return Err(DistributionError::ManifestUnverified);
            }
            if let Some(tag) = tag {
                if embedded_tag != tag {
                    return Err(DistributionError::ManifestUnverified);
                }
            }
        }

        match manifest {
            ManifestVariant::List(list) => {
                for entry in list.entries() {
                    if !self.exists(&entry.descriptor.digest).await? {
                        return Err(DistributionError::ManifestBlobUnknown {
                            digest: entry.descriptor.digest.clone(),
                        });
                    }
                }
            }
            _ => {
                for reference in manifest.references() {
                    match self.linked_blobs.stat(&reference.digest).await {
                        Ok(_) => {}
                        Err(err) if err.is_not_found() => {
                            return Err(DistributionError::ManifestBlobUnknown {
                                digest: reference.digest.clone(),
                            });
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Ok(())
    }
}
