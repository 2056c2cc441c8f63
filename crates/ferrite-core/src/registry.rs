//! Registry facade
//!
//! The root object a server wires together once: a storage driver plus an
//! optional descriptor cache. Everything else (blob stores, manifest
//! stores, tag stores) is handed out per repository.

use std::sync::Arc;

use ferrite_reference::Name;
use ferrite_storage::StorageDriver;

use crate::blob::LinkedBlobStore;
use crate::cache::{BlobDescriptorCache, BlobDescriptorCacheProvider};
use crate::error::DistributionError;
use crate::manifest::{ManifestStore, TagStore};
use crate::paths::{PathSpec, path_for};

/// The registry root.
#[derive(Clone)]
pub struct Registry {
    driver: Arc<dyn StorageDriver>,
    cache: Option<Arc<dyn BlobDescriptorCacheProvider>>,
}

impl Registry {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        cache: Option<Arc<dyn BlobDescriptorCacheProvider>>,
    ) -> Self {
        Registry { driver, cache }
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    /// Scoped view over one repository.
    pub fn repository(&self, name: &Name) -> Result<Repository, DistributionError> {
        let cache = match &self.cache {
            Some(provider) => Some(provider.repository_scoped(name)?),
            None => None,
        };
        Ok(Repository {
            driver: self.driver.clone(),
            name: name.clone(),
            cache,
        })
    }

    /// All repository names, sorted. A directory is a repository when it
    /// holds registry bookkeeping (`_manifests`, `_layers`, `_uploads`).
    pub async fn catalog(&self) -> Result<Vec<String>, DistributionError> {
        let root = path_for(PathSpec::RepositoriesRoot);
        let mut repositories = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let children = match self.driver.list(&dir).await {
                Ok(children) => children,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            };

            let is_repository = children.iter().any(|child| {
                child
                    .rsplit_once('/')
                    .is_some_and(|(_, segment)| segment.starts_with('_'))
            });
            if is_repository && dir != root {
                repositories.push(dir[root.len() + 1..].to_string());
                continue;
            }

            for child in children {
                let descend = child
                    .rsplit_once('/')
                    .is_some_and(|(_, segment)| !segment.starts_with('_'));
                if descend {
                    pending.push(child);
                }
            }
        }

        repositories.sort();
        Ok(repositories)
    }
}

/// Per-repository view tying the stores together.
pub struct Repository {
    driver: Arc<dyn StorageDriver>,
    name: Name,
    cache: Option<Arc<dyn BlobDescriptorCache>>,
}

impl Repository {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn blobs(&self) -> LinkedBlobStore {
        LinkedBlobStore::new(self.driver.clone(), self.name.clone(), self.cache.clone())
    }

    pub fn manifests(&self) -> ManifestStore {
        ManifestStore::new(self.driver.clone(), self.name.clone(), self.cache.clone())
    }

    pub fn tags(&self) -> TagStore {
        TagStore::new(self.driver.clone(), self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Descriptor, MEDIA_TYPE_OCTET_STREAM};
    use ferrite_reference::{Algorithm, Digest};
    use ferrite_storage::InMemoryDriver;

    async fn push_blob(repo: &Repository, payload: &[u8]) {
        let blobs = repo.blobs();
        let mut writer = blobs.create_upload().await.unwrap();
        writer.write_chunk(payload).await.unwrap();
        let digest = Digest::from_bytes(Algorithm::Sha256, payload);
        blobs
            .commit_upload(
                &mut writer,
                Descriptor::new(MEDIA_TYPE_OCTET_STREAM, digest, payload.len() as i64),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_catalog_lists_repositories() {
        let registry = Registry::new(Arc::new(InMemoryDriver::new()), None);

        assert!(registry.catalog().await.unwrap().is_empty());

        for name in ["alpha/app", "beta/nested/svc", "solo"] {
            let repo = registry.repository(&name.parse().unwrap()).unwrap();
            push_blob(&repo, name.as_bytes()).await;
        }

        assert_eq!(
            registry.catalog().await.unwrap(),
            vec!["alpha/app", "beta/nested/svc", "solo"]
        );
    }

    #[tokio::test]
    async fn test_repository_scoped_cache_wiring() {
        use crate::cache::InMemoryCacheProvider;

        let cache = Arc::new(InMemoryCacheProvider::new());
        let registry = Registry::new(Arc::new(InMemoryDriver::new()), Some(cache.clone()));

        let repo = registry.repository(&"foo/bar".parse().unwrap()).unwrap();
        push_blob(&repo, b"cached payload").await;

        // The commit path recorded the descriptor in the global cache.
        let digest = Digest::from_bytes(Algorithm::Sha256, b"cached payload");
        let cached = cache.stat(&digest).await.unwrap();
        assert_eq!(cached.size, 14);
    }
}
