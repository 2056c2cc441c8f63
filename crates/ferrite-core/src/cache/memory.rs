//! In-memory descriptor cache

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ferrite_reference::{Digest, Name};
use parking_lot::RwLock;

use crate::cache::{BlobDescriptorCache, BlobDescriptorCacheProvider, validate_set};
use crate::descriptor::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
use crate::error::DistributionError;

#[derive(Clone)]
struct GlobalEntry {
    size: i64,
    media_type: Option<String>,
}

#[derive(Default)]
struct Shared {
    global: RwLock<HashMap<Digest, GlobalEntry>>,
    /// repo -> member digests, with an optional per-repo media override.
    members: RwLock<HashMap<String, HashSet<Digest>>>,
    overrides: RwLock<HashMap<(String, Digest), String>>,
}

impl Shared {
    fn global_stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        let global = self.global.read();
        let entry = global.get(digest).ok_or_else(|| DistributionError::UnknownBlob {
            digest: digest.clone(),
        })?;
        Ok(Descriptor {
            media_type: entry
                .media_type
                .clone()
                .unwrap_or_else(|| MEDIA_TYPE_OCTET_STREAM.to_string()),
            digest: digest.clone(),
            size: entry.size,
        })
    }

    fn global_set(&self, digest: &Digest, desc: &Descriptor) {
        let mut global = self.global.write();
        let entry = global.entry(digest.clone()).or_insert(GlobalEntry {
            size: desc.size,
            media_type: None,
        });
        entry.size = desc.size;
        // Set-if-absent: the first recorded media type wins globally.
        if entry.media_type.is_none() {
            entry.media_type = Some(desc.media_type.clone());
        }
    }

    fn global_clear(&self, digest: &Digest) {
        self.global.write().remove(digest);
    }
}

/// Descriptor cache holding everything in process memory.
#[derive(Default)]
pub struct InMemoryCacheProvider {
    shared: Arc<Shared>,
}

impl InMemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobDescriptorCache for InMemoryCacheProvider {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        digest.validate()?;
        self.shared.global_stat(digest)
    }

    async fn set_descriptor(
        &self,
        digest: &Digest,
        desc: Descriptor,
    ) -> Result<(), DistributionError> {
        validate_set(digest, &desc)?;
        self.shared.global_set(digest, &desc);
        Ok(())
    }

    async fn clear(&self, digest: &Digest) -> Result<(), DistributionError> {
        digest.validate()?;
        self.shared.global_clear(digest);
        Ok(())
    }
}

impl BlobDescriptorCacheProvider for InMemoryCacheProvider {
    fn repository_scoped(
        &self,
        name: &Name,
    ) -> Result<Arc<dyn BlobDescriptorCache>, DistributionError> {
        Ok(Arc::new(ScopedCache {
            shared: self.shared.clone(),
            repo: name.to_string(),
        }))
    }
}

struct ScopedCache {
    shared: Arc<Shared>,
    repo: String,
}

#[async_trait]
impl BlobDescriptorCache for ScopedCache {
    async fn stat(&self, digest: &Digest) -> Result<Descriptor, DistributionError> {
        digest.validate()?;
        let member = self
            .shared
            .members
            .read()
            .get(&self.repo)
            .is_some_and(|set| set.contains(digest));
        if !member {
            return Err(DistributionError::UnknownBlob {
                digest: digest.clone(),
            });
        }

        let mut desc = self.shared.global_stat(digest)?;
        let key = (self.repo.clone(), digest.clone());
        if let Some(media_type) = self.shared.overrides.read().get(&key) {
            if !media_type.is_empty() {
                desc.media_type = media_type.clone();
            }
        }
        Ok(desc)
    }

    async fn set_descriptor(
        &self,
        digest: &Digest,
        desc: Descriptor,
    ) -> Result<(), DistributionError> {
        validate_set(digest, &desc)?;
        self.shared.global_set(digest, &desc);
        self.shared
            .members
            .write()
            .entry(self.repo.clone())
            .or_default()
            .insert(digest.clone());
        // The repository's view of the media type is always the latest set.
        self.shared
            .overrides
            .write()
            .insert((self.repo.clone(), digest.clone()), desc.media_type);
        Ok(())
    }

    async fn clear(&self, digest: &Digest) -> Result<(), DistributionError> {
        digest.validate()?;
        if let Some(set) = self.shared.members.write().get_mut(&self.repo) {
            set.remove(digest);
        }
        self.shared
            .overrides
            .write()
            .remove(&(self.repo.clone(), digest.clone()));
        self.shared.global_clear(digest);
        Ok(())
    }
}
