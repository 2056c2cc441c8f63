//! Blob and manifest descriptors

use ferrite_reference::Digest;
use serde::{Deserialize, Serialize};

use crate::error::DistributionError;

/// Media type assigned to blobs with no recorded type.
pub const MEDIA_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Small record summarizing a blob or manifest: what it is, how big it is,
/// and the digest that addresses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType", default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    pub digest: Digest,

    pub size: i64,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: i64) -> Self {
        Descriptor {
            media_type: media_type.into(),
            digest,
            size,
        }
    }

    pub fn validate(&self) -> Result<(), DistributionError> {
        self.digest.validate()?;
        if self.size < 0 {
            return Err(DistributionError::SizeMismatch {
                declared: self.size,
                received: 0,
            });
        }
        if self.media_type.is_empty() {
            return Err(DistributionError::InvalidMediaType(
                "media type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
