//! Core error types

use ferrite_reference::{Digest, DigestError, ReferenceError};
use ferrite_storage::DriverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistributionError {
    // Not-found family. Idempotent deletes map these to success at the API.
    #[error("unknown blob: {digest}")]
    UnknownBlob { digest: Digest },

    #[error("unknown repository: {name}")]
    UnknownRepository { name: String },

    #[error("unknown manifest: {digest}")]
    UnknownManifest { digest: Digest },

    #[error("unknown tag: {tag}")]
    UnknownTag { tag: String },

    #[error("unknown upload: {id}")]
    UnknownUpload { id: String },

    // Validation family: returned verbatim, never retried.
    #[error("invalid reference: {0}")]
    Reference(#[from] ReferenceError),

    #[error("invalid digest: {0}")]
    Digest(#[from] DigestError),

    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("size mismatch: declared {declared}, received {received}")]
    SizeMismatch { declared: i64, received: i64 },

    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("invalid content range")]
    InvalidRange,

    // Verification family, produced on manifest put.
    #[error("manifest failed verification")]
    ManifestUnverified,

    #[error("manifest references unknown blob: {digest}")]
    ManifestBlobUnknown { digest: Digest },

    #[error("malformed manifest payload: {0}")]
    ManifestInvalid(String),

    #[error("unsupported manifest media type: {0}")]
    ManifestUnsupported(String),

    #[error("upload already closed")]
    UploadClosed,

    #[error("operation unsupported: {0}")]
    Unsupported(&'static str),

    #[error("storage driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DistributionError {
    /// True for the not-found family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DistributionError::UnknownBlob { .. }
                | DistributionError::UnknownRepository { .. }
                | DistributionError::UnknownManifest { .. }
                | DistributionError::UnknownTag { .. }
                | DistributionError::UnknownUpload { .. }
        ) || matches!(self, DistributionError::Driver(e) if e.is_not_found())
    }
}
