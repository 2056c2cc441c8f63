//! Image manifests (Docker schema 2 and OCI)

use bytes::Bytes;
use serde::Deserialize;

use crate::descriptor::Descriptor;
use crate::error::DistributionError;
use crate::manifest::MEDIA_TYPE_OCI_MANIFEST;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageManifestDoc {
    schema_version: i32,
    #[serde(default)]
    media_type: String,
    config: Descriptor,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

/// A parsed image manifest alongside its exact source bytes.
#[derive(Debug, Clone)]
pub struct ImageManifest {
    raw: Bytes,
    doc: ImageManifestDoc,
}

impl ImageManifest {
    pub fn from_bytes(raw: Bytes) -> Result<Self, DistributionError> {
        let doc: ImageManifestDoc = serde_json::from_slice(&raw)
            .map_err(|e| DistributionError::ManifestInvalid(e.to_string()))?;
        if doc.schema_version != 2 {
            return Err(DistributionError::ManifestInvalid(format!(
                "unexpected schema version {}",
                doc.schema_version
            )));
        }
        Ok(ImageManifest { raw, doc })
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn media_type(&self) -> &str {
        if self.doc.media_type.is_empty() {
            MEDIA_TYPE_OCI_MANIFEST
        } else {
            &self.doc.media_type
        }
    }

    pub fn config(&self) -> &Descriptor {
        &self.doc.config
    }

    pub fn layers(&self) -> &[Descriptor] {
        &self.doc.layers
    }

    /// Config first, then layers in order.
    pub fn references(&self) -> Vec<Descriptor> {
        let mut refs = Vec::with_capacity(1 + self.doc.layers.len());
        refs.push(self.doc.config.clone());
        refs.extend(self.doc.layers.iter().cloned());
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_reference::{Algorithm, Digest};

    fn sample_json() -> String {
        let config = Digest::from_bytes(Algorithm::Sha256, b"config");
        let layer = Digest::from_bytes(Algorithm::Sha256, b"layer");
        format!(
            r#"{{
  "schemaVersion": 2,
  "mediaType": "application/vnd.oci.image.manifest.v1+json",
  "config": {{
    "mediaType": "application/vnd.oci.image.config.v1+json",
    "digest": "{config}",
    "size": 7023
  }},
  "layers": [
    {{
      "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
      "digest": "{layer}",
      "size": 32654
    }}
  ]
}}"#
        )
    }

    #[test]
    fn test_parse_and_references() {
        let raw = Bytes::from(sample_json());
        let manifest = ImageManifest::from_bytes(raw.clone()).unwrap();

        assert_eq!(manifest.media_type(), MEDIA_TYPE_OCI_MANIFEST);
        assert_eq!(manifest.raw(), &raw);
        assert_eq!(manifest.layers().len(), 1);

        let refs = manifest.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].size, 7023);
        assert_eq!(refs[1].size, 32654);
    }

    #[test]
    fn test_rejects_wrong_schema_version() {
        let raw = Bytes::from(sample_json().replace("\"schemaVersion\": 2", "\"schemaVersion\": 3"));
        assert!(ImageManifest::from_bytes(raw).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(ImageManifest::from_bytes(Bytes::from_static(b"{")).is_err());
    }
}
