//! Reference and digest error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("invalid digest format")]
    Invalid,

    #[error("unsupported digest algorithm: {0}")]
    Unsupported(String),

    #[error("invalid digest length")]
    InvalidLength,

    #[error("ambiguous digest prefix: {0}")]
    AmbiguousPrefix(String),

    #[error("no digest matches prefix: {0}")]
    UnknownPrefix(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("repository name must have at least one component")]
    EmptyName,

    #[error("reference must not exceed {max} characters, got {len}")]
    NameTooLong { len: usize, max: usize },

    #[error("invalid reference format")]
    InvalidFormat,

    #[error("repository name must be lowercase")]
    ContainsUppercase,

    #[error("invalid tag format")]
    InvalidTag,

    #[error("invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),
}
