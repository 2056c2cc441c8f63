//! Manifest lists and image indexes

use bytes::Bytes;
use serde::Deserialize;

use crate::descriptor::Descriptor;
use crate::error::DistributionError;
use crate::manifest::MEDIA_TYPE_OCI_INDEX;

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default)]
    pub variant: Option<String>,
}

/// One referenced manifest plus the platform it serves.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestListDoc {
    schema_version: i32,
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    manifests: Vec<ManifestEntry>,
}

/// A parsed manifest list alongside its exact source bytes.
#[derive(Debug, Clone)]
pub struct ManifestList {
    raw: Bytes,
    doc: ManifestListDoc,
}

impl ManifestList {
    pub fn from_bytes(raw: Bytes) -> Result<Self, DistributionError> {
        let doc: ManifestListDoc = serde_json::from_slice(&raw)
            .map_err(|e| DistributionError::ManifestInvalid(e.to_string()))?;
        if doc.schema_version != 2 {
            return Err(DistributionError::ManifestInvalid(format!(
                "unexpected schema version {}",
                doc.schema_version
            )));
        }
        Ok(ManifestList { raw, doc })
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn media_type(&self) -> &str {
        if self.doc.media_type.is_empty() {
            MEDIA_TYPE_OCI_INDEX
        } else {
            &self.doc.media_type
        }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.doc.manifests
    }

    pub fn references(&self) -> Vec<Descriptor> {
        self.doc
            .manifests
            .iter()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }
}
