//! Legacy signed manifests (schema 1)
//!
//! A schema-1 manifest embeds detached JWS signatures in the same JSON
//! object. Each signature's protected header records how to rebuild the
//! signed payload from the stored bytes (`formatLength` + `formatTail`).
//! The document's identity is the digest of the full signed bytes, so the
//! raw form is preserved verbatim and never re-serialized.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use ferrite_reference::Digest;
use serde::Deserialize;

use crate::descriptor::Descriptor;
use crate::error::DistributionError;

const MEDIA_TYPE_SCHEMA1_LAYER: &str = "application/vnd.docker.container.image.rootfs.diff+x-gtar";

#[derive(Debug, Clone, Deserialize)]
struct JwsSignature {
    #[allow(dead_code)]
    header: serde_json::Value,
    signature: String,
    protected: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    signatures: Vec<JwsSignature>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProtectedHeader {
    #[serde(rename = "formatLength")]
    format_length: usize,
    #[serde(rename = "formatTail")]
    format_tail: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

#[derive(Debug, Clone, Deserialize)]
struct Schema1Doc {
    #[serde(rename = "schemaVersion")]
    schema_version: i32,
    name: String,
    tag: String,
    #[serde(rename = "fsLayers", default)]
    fs_layers: Vec<FsLayer>,
}

/// A schema-1 manifest: the signed bytes, the reconstructed payload, and a
/// parsed view of that payload.
#[derive(Debug, Clone)]
pub struct SignedManifest {
    raw: Bytes,
    payload: Bytes,
    doc: Schema1Doc,
}

impl SignedManifest {
    /// Decode and check the JWS envelope: at least one signature, every
    /// protected header parses, and the payload each one reconstructs
    /// matches the manifest body.
    pub fn from_bytes(raw: Bytes) -> Result<Self, DistributionError> {
        let envelope: Envelope = serde_json::from_slice(&raw)
            .map_err(|e| DistributionError::ManifestInvalid(e.to_string()))?;
        if envelope.signatures.is_empty() {
            return Err(DistributionError::ManifestUnverified);
        }

        let mut payload: Option<Bytes> = None;
        for signature in &envelope.signatures {
            if signature.signature.is_empty() {
                return Err(DistributionError::ManifestUnverified);
            }
            let protected = URL_SAFE_NO_PAD
                .decode(&signature.protected)
                .map_err(|_| DistributionError::ManifestUnverified)?;
            let header: ProtectedHeader = serde_json::from_slice(&protected)
                .map_err(|_| DistributionError::ManifestUnverified)?;
            if header.format_length > raw.len() {
                return Err(DistributionError::ManifestUnverified);
            }
            let tail = URL_SAFE_NO_PAD
                .decode(&header.format_tail)
                .map_err(|_| DistributionError::ManifestUnverified)?;

            let mut rebuilt = Vec::with_capacity(header.format_length + tail.len());
            rebuilt.extend_from_slice(&raw[..header.format_length]);
            rebuilt.extend_from_slice(&tail);
            let rebuilt = Bytes::from(rebuilt);

            match &payload {
                Some(existing) if *existing != rebuilt => {
                    return Err(DistributionError::ManifestUnverified);
                }
                _ => payload = Some(rebuilt),
            }
        }
        let payload = payload.expect("at least one signature was checked");

        let doc: Schema1Doc = serde_json::from_slice(&payload)
            .map_err(|_| DistributionError::ManifestUnverified)?;
        if doc.schema_version != 1 {
            return Err(DistributionError::ManifestInvalid(format!(
                "unexpected schema version {}",
                doc.schema_version
            )));
        }

        Ok(SignedManifest { raw, payload, doc })
    }

    /// The full signed bytes; this is what gets digested and stored.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The signed payload: the manifest body without the signature block.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn tag(&self) -> &str {
        &self.doc.tag
    }

    pub fn fs_layers(&self) -> &[FsLayer] {
        &self.doc.fs_layers
    }

    /// Layer references. Schema 1 records no sizes, so these descriptors
    /// carry zero.
    pub fn references(&self) -> Vec<Descriptor> {
        self.doc
            .fs_layers
            .iter()
            .map(|layer| Descriptor::new(MEDIA_TYPE_SCHEMA1_LAYER, layer.blob_sum.clone(), 0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_reference::Algorithm;

    /// Build a structurally valid signed manifest the way a client would:
    /// format the body, then append a signature block whose protected header
    /// records the split point.
    fn signed_fixture() -> Bytes {
        let layer = Digest::from_bytes(Algorithm::Sha256, b"layer one");
        let body = format!(
            "{{\n   \"schemaVersion\": 1,\n   \"name\": \"foo/bar\",\n   \"tag\": \"latest\",\n   \"fsLayers\": [\n      {{\n         \"blobSum\": \"{layer}\"\n      }}\n   ]\n}}"
        );

        // The signed payload is the body; the stored form replaces the final
        // "\n}" with the signatures block.
        let format_tail = "\n}";
        let format_length = body.len() - format_tail.len();
        let protected = URL_SAFE_NO_PAD.encode(format!(
            r#"{{"formatLength":{format_length},"formatTail":"{}","time":"2024-01-01T00:00:00Z"}}"#,
            URL_SAFE_NO_PAD.encode(format_tail)
        ));

        let signed = format!(
            "{},\n   \"signatures\": [\n      {{\n         \"header\": {{\"alg\": \"ES256\"}},\n         \"signature\": \"{}\",\n         \"protected\": \"{protected}\"\n      }}\n   ]\n}}",
            &body[..format_length],
            URL_SAFE_NO_PAD.encode(b"not-a-real-signature")
        );
        Bytes::from(signed)
    }

    #[test]
    fn test_decode_and_payload_reconstruction() {
        let raw = signed_fixture();
        let manifest = SignedManifest::from_bytes(raw.clone()).unwrap();

        assert_eq!(manifest.raw(), &raw);
        assert_eq!(manifest.name(), "foo/bar");
        assert_eq!(manifest.tag(), "latest");
        assert_eq!(manifest.fs_layers().len(), 1);

        // Payload is the body without the signature block.
        let payload = std::str::from_utf8(manifest.payload()).unwrap();
        assert!(payload.ends_with("\n}"));
        assert!(!payload.contains("signatures"));
    }

    #[test]
    fn test_rejects_missing_signatures() {
        let raw = Bytes::from_static(
            br#"{"schemaVersion":1,"name":"a/b","tag":"t","fsLayers":[],"signatures":[]}"#,
        );
        assert!(matches!(
            SignedManifest::from_bytes(raw).unwrap_err(),
            DistributionError::ManifestUnverified
        ));
    }

    #[test]
    fn test_rejects_garbage_protected_header() {
        let raw = Bytes::from_static(
            br#"{"schemaVersion":1,"name":"a/b","tag":"t","fsLayers":[],"signatures":[{"header":{},"signature":"eA","protected":"!!!not-base64!!!"}]}"#,
        );
        assert!(matches!(
            SignedManifest::from_bytes(raw).unwrap_err(),
            DistributionError::ManifestUnverified
        ));
    }

    #[test]
    fn test_references_carry_layer_digests() {
        let manifest = SignedManifest::from_bytes(signed_fixture()).unwrap();
        let refs = manifest.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].digest, Digest::from_bytes(Algorithm::Sha256, b"layer one"));
    }
}
