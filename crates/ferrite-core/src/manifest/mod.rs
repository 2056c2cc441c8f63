//! Manifest service
//!
//! Manifests are typed JSON documents referencing blobs by digest. Their
//! identity is the digest of the exact bytes as stored; decoding always
//! keeps the raw bytes alongside the parsed view and nothing ever
//! re-serializes on read.

mod image;
mod list;
mod signed;
mod store;
mod tags;

pub use image::ImageManifest;
pub use list::{ManifestEntry, ManifestList, Platform};
pub use signed::SignedManifest;
pub use store::ManifestStore;
pub use tags::TagStore;

use bytes::Bytes;
use ferrite_reference::{Algorithm, Digest};
use serde::Deserialize;

use crate::descriptor::Descriptor;
use crate::error::DistributionError;

pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_SIGNED_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// Minimal view used to discriminate manifest kinds when no media type was
/// supplied.
#[derive(Deserialize)]
struct Probe {
    #[serde(rename = "schemaVersion")]
    schema_version: Option<i32>,
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    signatures: Option<serde_json::Value>,
    manifests: Option<serde_json::Value>,
    config: Option<serde_json::Value>,
}

/// A decoded manifest of any supported kind.
#[derive(Debug, Clone)]
pub enum ManifestVariant {
    Image(ImageManifest),
    List(ManifestList),
    Signed(SignedManifest),
}

impl ManifestVariant {
    /// Type-discriminated decode. The caller's media type wins when given;
    /// otherwise the payload is probed.
    pub fn from_bytes(
        media_type: Option<&str>,
        raw: Bytes,
    ) -> Result<ManifestVariant, DistributionError> {
        let media_type = match media_type {
            Some(mt) if !mt.is_empty() => mt.to_string(),
            _ => Self::sniff(&raw)?,
        };

        match media_type.as_str() {
            MEDIA_TYPE_DOCKER_MANIFEST | MEDIA_TYPE_OCI_MANIFEST => {
                Ok(ManifestVariant::Image(ImageManifest::from_bytes(raw)?))
            }
            MEDIA_TYPE_DOCKER_MANIFEST_LIST | MEDIA_TYPE_OCI_INDEX => {
                Ok(ManifestVariant::List(ManifestList::from_bytes(raw)?))
            }
            MEDIA_TYPE_SIGNED_MANIFEST => {
                Ok(ManifestVariant::Signed(SignedManifest::from_bytes(raw)?))
            }
            other => Err(DistributionError::ManifestUnsupported(other.to_string())),
        }
    }

    fn sniff(raw: &Bytes) -> Result<String, DistributionError> {
        let probe: Probe = serde_json::from_slice(raw)
            .map_err(|e| DistributionError::ManifestInvalid(e.to_string()))?;
        if let Some(media_type) = probe.media_type {
            if !media_type.is_empty() {
                return Ok(media_type);
            }
        }
        if probe.signatures.is_some() || probe.schema_version == Some(1) {
            return Ok(MEDIA_TYPE_SIGNED_MANIFEST.to_string());
        }
        // Schema-2 documents may omit mediaType; the payload shape decides.
        if probe.schema_version == Some(2) {
            if probe.manifests.is_some() {
                return Ok(MEDIA_TYPE_OCI_INDEX.to_string());
            }
            if probe.config.is_some() {
                return Ok(MEDIA_TYPE_OCI_MANIFEST.to_string());
            }
        }
        Err(DistributionError::ManifestInvalid(
            "manifest carries no recognizable media type".to_string(),
        ))
    }

    /// Media type for the Content-Type header.
    pub fn media_type(&self) -> &str {
        match self {
            ManifestVariant::Image(m) => m.media_type(),
            ManifestVariant::List(m) => m.media_type(),
            ManifestVariant::Signed(_) => MEDIA_TYPE_SIGNED_MANIFEST,
        }
    }

    /// The exact bytes as received and stored.
    pub fn raw(&self) -> &Bytes {
        match self {
            ManifestVariant::Image(m) => m.raw(),
            ManifestVariant::List(m) => m.raw(),
            ManifestVariant::Signed(m) => m.raw(),
        }
    }

    /// Canonical identity: the digest of the stored bytes.
    pub fn digest(&self) -> Digest {
        Digest::from_bytes(Algorithm::Sha256, self.raw())
    }

    /// Every blob or manifest this document references by digest.
    pub fn references(&self) -> Vec<Descriptor> {
        match self {
            ManifestVariant::Image(m) => m.references(),
            ManifestVariant::List(m) => m.references(),
            ManifestVariant::Signed(m) => m.references(),
        }
    }

    /// Embedded push target, for legacy manifests that carry one.
    pub fn target_hint(&self) -> Option<(&str, &str)> {
        match self {
            ManifestVariant::Signed(m) => Some((m.name(), m.tag())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_by_media_type_field() {
        let raw = Bytes::from(format!(
            r#"{{"schemaVersion":2,"mediaType":"{MEDIA_TYPE_OCI_INDEX}","manifests":[]}}"#
        ));
        let manifest = ManifestVariant::from_bytes(None, raw).unwrap();
        assert!(matches!(manifest, ManifestVariant::List(_)));
    }

    #[test]
    fn test_explicit_media_type_wins() {
        let raw = Bytes::from_static(
            br#"{"schemaVersion":2,"manifests":[]}"#,
        );
        let manifest =
            ManifestVariant::from_bytes(Some(MEDIA_TYPE_DOCKER_MANIFEST_LIST), raw).unwrap();
        assert!(matches!(manifest, ManifestVariant::List(_)));
    }

    #[test]
    fn test_unsupported_media_type() {
        let raw = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let err =
            ManifestVariant::from_bytes(Some("application/x-unknown"), raw).unwrap_err();
        assert!(matches!(err, DistributionError::ManifestUnsupported(_)));
    }

    #[test]
    fn test_digest_is_byte_identity() {
        let raw = Bytes::from(format!(
            r#"{{"schemaVersion":2,  "mediaType":"{MEDIA_TYPE_OCI_INDEX}","manifests":[]}}"#
        ));
        let manifest = ManifestVariant::from_bytes(None, raw.clone()).unwrap();
        assert_eq!(manifest.raw(), &raw);
        assert_eq!(manifest.digest(), Digest::from_bytes(Algorithm::Sha256, &raw));
    }
}
