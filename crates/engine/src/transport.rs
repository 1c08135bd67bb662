//! The registry boundary.
//!
//! The engine never speaks HTTP itself. A [`RegistryTransport`] moves
//! manifests and blobs to and from a registry; authentication, retries, and
//! connection handling are the implementation's business.

use crate::digest::Digest;
use crate::error::TransportError;
use crate::reference::ArtifactReference;
use async_trait::async_trait;

/// A blob together with its descriptor fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Media type of the blob.
    pub media_type: String,
    /// Digest of `data`.
    pub digest: Digest,
    /// Blob bytes.
    pub data: Vec<u8>,
}

impl Blob {
    /// Wrap bytes, computing their digest.
    #[must_use]
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            digest: Digest::sha256(&data),
            data,
        }
    }

    /// Size of the blob in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Everything needed to publish one artifact.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Canonical manifest bytes.
    pub manifest: Vec<u8>,
    /// Config blob.
    pub config: Blob,
    /// Layer blobs in manifest order.
    pub layers: Vec<Blob>,
}

/// Fetches and stores artifacts in a registry.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Upload blobs and the manifest, tagging it with the reference's tag.
    ///
    /// Returns the digest the registry assigned to the manifest.
    async fn push(
        &self,
        reference: &ArtifactReference,
        request: PushRequest,
    ) -> Result<Digest, TransportError>;

    /// Fetch the manifest bytes the reference resolves to, with the digest
    /// reported by the registry.
    async fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
    ) -> Result<(Vec<u8>, Digest), TransportError>;

    /// Fetch a blob from the reference's repository.
    async fn fetch_blob(
        &self,
        reference: &ArtifactReference,
        digest: &Digest,
    ) -> Result<Vec<u8>, TransportError>;

    /// List the tags of the reference's repository.
    async fn list_tags(&self, reference: &ArtifactReference) -> Result<Vec<String>, TransportError>;
}
