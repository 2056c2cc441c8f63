//! Path mapper
//!
//! Deterministic mapping from logical identities to storage-driver keys.
//! The layout under the version root is:
//!
//! ```text
//! /v2
//! ├── blobs
//! │   └── <algorithm>
//! │       └── <first two hex chars>
//! │           └── <hex>
//! │               └── data
//! └── repositories
//!     └── <name>
//!         ├── _layers
//!         │   └── <algorithm>/<hex>/link
//!         ├── _manifests
//!         │   ├── revisions/<algorithm>/<hex>/link
//!         │   └── tags/<tag>
//!         │       ├── current/link
//!         │       └── index/<algorithm>/<hex>/link
//!         └── _uploads/<uuid>
//!             ├── data
//!             ├── startedat
//!             └── hashstates/<algorithm>/<offset>
//! ```
//!
//! The blob store under `blobs/` holds all content, keyed by digest.
//! Repositories reach it only through the link files, so link presence is
//! the sole evidence of repository membership.

use ferrite_reference::{Algorithm, Digest, Name};

const ROOT: &str = "/v2";

/// A logical location in the registry key space.
#[derive(Debug, Clone)]
pub enum PathSpec<'a> {
    /// Content-addressed blob data.
    BlobData { digest: &'a Digest },
    /// Parent directory of one blob's data file.
    BlobDir { digest: &'a Digest },
    /// Root of all repositories.
    RepositoriesRoot,
    /// Root of one repository.
    RepositoryRoot { name: &'a Name },
    /// Layer link proving a repository hosts a blob.
    LayerLink { name: &'a Name, digest: &'a Digest },
    /// Manifest revision link.
    ManifestRevisionLink { name: &'a Name, digest: &'a Digest },
    /// Root of a repository's manifest revisions.
    ManifestRevisionsRoot { name: &'a Name },
    /// Root of a repository's tags.
    TagsRoot { name: &'a Name },
    /// Root of one tag.
    TagRoot { name: &'a Name, tag: &'a str },
    /// Link holding a tag's current revision.
    TagCurrentLink { name: &'a Name, tag: &'a str },
    /// Root of a tag's historical revision index.
    TagIndexRoot { name: &'a Name, tag: &'a str },
    /// Index entry recording that a tag once pointed at a revision.
    TagIndexEntryLink {
        name: &'a Name,
        tag: &'a str,
        digest: &'a Digest,
    },
    /// Root of a repository's in-progress uploads.
    UploadsRoot { name: &'a Name },
    /// Root of one upload session.
    UploadRoot { name: &'a Name, id: &'a str },
    /// Partially uploaded data.
    UploadData { name: &'a Name, id: &'a str },
    /// RFC 3339 timestamp recording when the upload began.
    UploadStartedAt { name: &'a Name, id: &'a str },
    /// Streaming-hash checkpoint at a byte offset.
    UploadHashState {
        name: &'a Name,
        id: &'a str,
        algorithm: Algorithm,
        offset: u64,
    },
    /// Root of an upload's hash checkpoints for one algorithm.
    UploadHashStatesRoot {
        name: &'a Name,
        id: &'a str,
        algorithm: Algorithm,
    },
}

/// Map a path spec to its driver key.
pub fn path_for(spec: PathSpec<'_>) -> String {
    match spec {
        PathSpec::BlobData { digest } => format!("{}/data", blob_dir(digest)),
        PathSpec::BlobDir { digest } => blob_dir(digest),
        PathSpec::RepositoriesRoot => format!("{ROOT}/repositories"),
        PathSpec::RepositoryRoot { name } => repository_root(name),
        PathSpec::LayerLink { name, digest } => format!(
            "{}/_layers/{}/{}/link",
            repository_root(name),
            digest.algorithm(),
            digest.hex()
        ),
        PathSpec::ManifestRevisionLink { name, digest } => format!(
            "{}/{}/{}/link",
            revisions_root(name),
            digest.algorithm(),
            digest.hex()
        ),
        PathSpec::ManifestRevisionsRoot { name } => revisions_root(name),
        PathSpec::TagsRoot { name } => tags_root(name),
        PathSpec::TagRoot { name, tag } => format!("{}/{tag}", tags_root(name)),
        PathSpec::TagCurrentLink { name, tag } => {
            format!("{}/{tag}/current/link", tags_root(name))
        }
        PathSpec::TagIndexRoot { name, tag } => format!("{}/{tag}/index", tags_root(name)),
        PathSpec::TagIndexEntryLink { name, tag, digest } => format!(
            "{}/{tag}/index/{}/{}/link",
            tags_root(name),
            digest.algorithm(),
            digest.hex()
        ),
        PathSpec::UploadsRoot { name } => uploads_root(name),
        PathSpec::UploadRoot { name, id } => format!("{}/{id}", uploads_root(name)),
        PathSpec::UploadData { name, id } => format!("{}/{id}/data", uploads_root(name)),
        PathSpec::UploadStartedAt { name, id } => {
            format!("{}/{id}/startedat", uploads_root(name))
        }
        PathSpec::UploadHashState {
            name,
            id,
            algorithm,
            offset,
        } => format!("{}/{id}/hashstates/{algorithm}/{offset}", uploads_root(name)),
        PathSpec::UploadHashStatesRoot {
            name,
            id,
            algorithm,
        } => format!("{}/{id}/hashstates/{algorithm}", uploads_root(name)),
    }
}

fn blob_dir(digest: &Digest) -> String {
    format!(
        "{ROOT}/blobs/{}/{}/{}",
        digest.algorithm(),
        &digest.hex()[..2],
        digest.hex()
    )
}

fn repository_root(name: &Name) -> String {
    format!("{ROOT}/repositories/{name}")
}

fn revisions_root(name: &Name) -> String {
    format!("{}/_manifests/revisions", repository_root(name))
}

fn tags_root(name: &Name) -> String {
    format!("{}/_manifests/tags", repository_root(name))
}

fn uploads_root(name: &Name) -> String {
    format!("{}/_uploads", repository_root(name))
}
