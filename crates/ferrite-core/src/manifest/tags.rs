//! Tag store
//!
//! A tag is a mutable pointer from `(name, tag)` to a manifest revision,
//! plus an append-only index of every revision the tag has ever named.
//! The current pointer is a single link file updated last-writer-wins;
//! callers needing stronger ordering must serialize externally.

use std::sync::Arc;

use bytes::Bytes;
use ferrite_reference::{Digest, Name};
use ferrite_storage::StorageDriver;
use tracing::debug;

use crate::error::DistributionError;
use crate::paths::{PathSpec, path_for};

/// Tag storage for one repository.
#[derive(Clone)]
pub struct TagStore {
    driver: Arc<dyn StorageDriver>,
    name: Name,
}

impl TagStore {
    pub(crate) fn new(driver: Arc<dyn StorageDriver>, name: Name) -> Self {
        TagStore { driver, name }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    fn unknown_tag(tag: &str) -> DistributionError {
        DistributionError::UnknownTag {
            tag: tag.to_string(),
        }
    }

    /// Point `tag` at `digest`: record the revision in the tag's index, then
    /// overwrite the current pointer.
    pub async fn tag(&self, tag: &str, digest: &Digest) -> Result<(), DistributionError> {
        let index_entry = path_for(PathSpec::TagIndexEntryLink {
            name: &self.name,
            tag,
            digest,
        });
        self.driver
            .put_content(&index_entry, Bytes::from(digest.to_string()))
            .await?;

        let current = path_for(PathSpec::TagCurrentLink {
            name: &self.name,
            tag,
        });
        self.driver
            .put_content(&current, Bytes::from(digest.to_string()))
            .await?;
        debug!("tagged {}:{tag} -> {digest}", self.name);
        Ok(())
    }

    /// Digest the tag currently points at.
    pub async fn resolve(&self, tag: &str) -> Result<Digest, DistributionError> {
        let current = path_for(PathSpec::TagCurrentLink {
            name: &self.name,
            tag,
        });
        let content = match self.driver.get_content(&current).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => return Err(Self::unknown_tag(tag)),
            Err(err) => return Err(err.into()),
        };
        let raw = std::str::from_utf8(&content)
            .map_err(|_| Self::unknown_tag(tag))?;
        Ok(Digest::parse(raw.trim())?)
    }

    /// Every revision this tag has ever pointed at.
    pub async fn revisions(&self, tag: &str) -> Result<Vec<Digest>, DistributionError> {
        let index_root = path_for(PathSpec::TagIndexRoot {
            name: &self.name,
            tag,
        });
        let algorithms = match self.driver.list(&index_root).await {
            Ok(children) => children,
            Err(err) if err.is_not_found() => return Err(Self::unknown_tag(tag)),
            Err(err) => return Err(err.into()),
        };

        let mut revisions = Vec::new();
        for algorithm_dir in algorithms {
            let algorithm = match algorithm_dir.rsplit_once('/') {
                Some((_, segment)) => segment.to_string(),
                None => continue,
            };
            for entry in self.driver.list(&algorithm_dir).await? {
                if let Some((_, hex)) = entry.rsplit_once('/') {
                    if let Ok(digest) = Digest::parse(&format!("{algorithm}:{hex}")) {
                        revisions.push(digest);
                    }
                }
            }
        }
        revisions.sort_by_key(|d| d.to_string());
        Ok(revisions)
    }

    /// Drop the tag. Its historical revisions stay in the revision store.
    pub async fn untag(&self, tag: &str) -> Result<(), DistributionError> {
        let root = path_for(PathSpec::TagRoot {
            name: &self.name,
            tag,
        });
        match self.driver.delete(&root).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(Self::unknown_tag(tag)),
            Err(err) => Err(err.into()),
        }
    }

    /// All tag names in this repository, sorted.
    pub async fn all(&self) -> Result<Vec<String>, DistributionError> {
        let root = path_for(PathSpec::TagsRoot { name: &self.name });
        let children = match self.driver.list(&root).await {
            Ok(children) => children,
            Err(err) if err.is_not_found() => {
                return Err(DistributionError::UnknownRepository {
                    name: self.name.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let mut tags: Vec<String> = children
            .iter()
            .filter_map(|child| child.rsplit_once('/').map(|(_, tag)| tag.to_string()))
            .collect();
        tags.sort();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_reference::Algorithm;
    use ferrite_storage::InMemoryDriver;

    fn store() -> TagStore {
        TagStore::new(Arc::new(InMemoryDriver::new()), "foo/bar".parse().unwrap())
    }

    fn digest(n: u8) -> Digest {
        Digest::from_bytes(Algorithm::Sha256, &[n])
    }

    #[tokio::test]
    async fn test_tag_resolve_overwrite() {
        let store = store();
        let (d1, d2) = (digest(1), digest(2));

        store.tag("latest", &d1).await.unwrap();
        assert_eq!(store.resolve("latest").await.unwrap(), d1);

        store.tag("latest", &d2).await.unwrap();
        assert_eq!(store.resolve("latest").await.unwrap(), d2);
    }

    #[tokio::test]
    async fn test_revision_history_kept() {
        let store = store();
        let (d1, d2) = (digest(1), digest(2));

        store.tag("latest", &d1).await.unwrap();
        store.tag("latest", &d2).await.unwrap();

        let revisions = store.revisions("latest").await.unwrap();
        assert!(revisions.contains(&d1));
        assert!(revisions.contains(&d2));
        assert_eq!(revisions.len(), 2);

        // Re-tagging an old revision is idempotent in the index.
        store.tag("latest", &d1).await.unwrap();
        assert_eq!(store.revisions("latest").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let store = store();
        store.tag("other", &digest(1)).await.unwrap();
        assert!(matches!(
            store.resolve("latest").await.unwrap_err(),
            DistributionError::UnknownTag { .. }
        ));
        assert!(matches!(
            store.revisions("latest").await.unwrap_err(),
            DistributionError::UnknownTag { .. }
        ));
    }

    #[tokio::test]
    async fn test_untag_keeps_other_tags() {
        let store = store();
        store.tag("latest", &digest(1)).await.unwrap();
        store.tag("stable", &digest(2)).await.unwrap();

        store.untag("latest").await.unwrap();
        assert!(store.resolve("latest").await.is_err());
        assert_eq!(store.resolve("stable").await.unwrap(), digest(2));
        assert_eq!(store.all().await.unwrap(), vec!["stable"]);
    }

    #[tokio::test]
    async fn test_all_lists_sorted() {
        let store = store();
        for tag in ["v2", "latest", "v1"] {
            store.tag(tag, &digest(9)).await.unwrap();
        }
        assert_eq!(store.all().await.unwrap(), vec!["latest", "v1", "v2"]);
    }

    #[tokio::test]
    async fn test_all_unknown_repository() {
        let store = store();
        assert!(matches!(
            store.all().await.unwrap_err(),
            DistributionError::UnknownRepository { .. }
        ));
    }
}
