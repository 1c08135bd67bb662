//! OCI image manifests describing a single directory layer.

use crate::archive::{CONTENT_MEDIA_TYPE, LayerDescriptor};
use crate::digest::Digest;
use crate::metadata::{Metadata, PROVENANCE_ANNOTATIONS};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Media type of the manifest document.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of the (empty) config blob.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.dirpack.config.v1+json";

/// Content of the config blob referenced by every manifest.
pub const CONFIG_BLOB: &[u8] = b"{}";

const SCHEMA_VERSION: u32 = 2;

/// Content descriptor (media type, digest, size).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the referenced content.
    pub digest: Digest,
    /// Size of the referenced content in bytes.
    pub size: u64,
    /// Optional annotations.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Describe a byte slice.
    #[must_use]
    pub fn for_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: Digest::sha256(bytes),
            size: bytes.len() as u64,
            annotations: BTreeMap::new(),
        }
    }

    /// Descriptor of the config blob.
    #[must_use]
    pub fn config() -> Self {
        Self::for_bytes(CONFIG_MEDIA_TYPE, CONFIG_BLOB)
    }
}

impl From<&LayerDescriptor> for Descriptor {
    fn from(layer: &LayerDescriptor) -> Self {
        Self {
            media_type: layer.media_type().to_string(),
            digest: layer.digest().clone(),
            size: layer.size(),
            annotations: BTreeMap::new(),
        }
    }
}

/// An OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always 2.
    pub schema_version: u32,
    /// Manifest media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Config blob descriptor.
    pub config: Descriptor,
    /// Layer descriptors.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Manifest annotations.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// Build the manifest for a layer, stamping a missing creation time with
    /// the current time.
    #[must_use]
    pub fn build(layer: &LayerDescriptor, metadata: &Metadata) -> Self {
        Self::build_at(layer, metadata, Utc::now())
    }

    /// Build the manifest for a layer, using `now` as the creation time when
    /// the metadata carries none.
    #[must_use]
    pub fn build_at(layer: &LayerDescriptor, metadata: &Metadata, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: Some(MANIFEST_MEDIA_TYPE.to_string()),
            config: Descriptor::config(),
            layers: vec![Descriptor::from(layer)],
            annotations: metadata.to_annotations(now),
        }
    }

    /// Canonical JSON encoding. Annotation keys are sorted so the encoding,
    /// and therefore the digest, is stable.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::invalid_manifest("", format!("failed to encode manifest: {e}")))
    }

    /// Decode a manifest fetched for `reference`.
    pub fn from_json(bytes: &[u8], reference: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::invalid_manifest(reference, format!("malformed JSON: {e}")))?;
        if manifest.schema_version != SCHEMA_VERSION {
            return Err(Error::invalid_manifest(
                reference,
                format!("unsupported schema version {}", manifest.schema_version),
            ));
        }
        Ok(manifest)
    }

    /// Digest of the canonical JSON encoding.
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::sha256(&self.to_json()?))
    }

    /// The single content layer, checked for the dirpack media type.
    pub fn content_layer(&self, reference: &str) -> Result<&Descriptor> {
        let [layer] = self.layers.as_slice() else {
            return Err(Error::invalid_manifest(
                reference,
                format!("expected exactly one layer, found {}", self.layers.len()),
            ));
        };
        if layer.media_type != CONTENT_MEDIA_TYPE {
            return Err(Error::unsupported_media_type(
                reference,
                CONTENT_MEDIA_TYPE,
                layer.media_type.clone(),
            ));
        }
        Ok(layer)
    }

    /// Check that every provenance annotation is present and non-empty.
    pub fn validate_annotations(&self) -> Result<()> {
        for key in PROVENANCE_ANNOTATIONS {
            match self.annotations.get(key) {
                Some(value) if !value.trim().is_empty() => {}
                Some(_) => return Err(Error::metadata(key, "annotation is empty")),
                None => return Err(Error::metadata(key, "annotation not found")),
            }
        }
        Ok(())
    }

    /// Provenance recorded in the annotations.
    pub fn metadata(&self) -> Result<Metadata> {
        Metadata::from_annotations(&self.annotations)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}
