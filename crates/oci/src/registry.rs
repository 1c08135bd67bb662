//! OCI distribution transport.
//!
//! Uses `oci-distribution` for registry operations.

use async_trait::async_trait;
use dirpack_engine::{
    ArtifactReference, DEFAULT_TAG, Digest, PushRequest, RegistryTransport, TransportError,
};
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciAuth;
use oci_distribution::{Client, Reference};
use tracing::{debug, trace};

use crate::config::{RegistryAuth, RegistryConfig};

/// Registry transport backed by `oci-distribution`.
pub struct OciRegistry {
    client: Client,
    config: RegistryConfig,
}

impl Default for OciRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl OciRegistry {
    /// Create a transport for the given configuration.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        let protocol = if config.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(config.insecure_registries.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });
        Self { client, config }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn auth(&self, reference: &ArtifactReference) -> OciAuth {
        match self.config.resolve_auth(reference.registry()) {
            RegistryAuth::Anonymous => OciAuth::Anonymous,
            RegistryAuth::Basic { username, password } => OciAuth::Basic(username, password),
        }
    }
}

/// Map an artifact reference onto the distribution client's reference type.
fn to_oci_reference(reference: &ArtifactReference) -> Reference {
    let registry = reference.registry().to_string();
    let repository = reference.repository().to_string();
    match (reference.digest(), reference.tag()) {
        (Some(digest), _) => Reference::with_digest(registry, repository, digest.to_string()),
        (None, Some(tag)) => Reference::with_tag(registry, repository, tag.to_string()),
        (None, None) => Reference::with_tag(registry, repository, DEFAULT_TAG.to_string()),
    }
}

fn parse_digest(operation: &str, value: &str) -> Result<Digest, TransportError> {
    Digest::parse(value).map_err(|e| {
        TransportError::new(operation, format!("registry returned invalid digest '{value}': {e}"))
    })
}

fn failure(operation: &str, error: impl std::fmt::Display) -> TransportError {
    TransportError::new(operation, error.to_string())
}

#[async_trait]
impl RegistryTransport for OciRegistry {
    async fn push(
        &self,
        reference: &ArtifactReference,
        request: PushRequest,
    ) -> Result<Digest, TransportError> {
        let oci_reference = to_oci_reference(reference);
        let auth = self.auth(reference);

        let manifest: OciImageManifest = serde_json::from_slice(&request.manifest)
            .map_err(|e| failure("encode manifest", e))?;
        let layers: Vec<ImageLayer> = request
            .layers
            .into_iter()
            .map(|blob| ImageLayer::new(blob.data, blob.media_type, None))
            .collect();
        let config = Config::new(request.config.data, request.config.media_type, None);

        debug!(reference = %reference, layers = layers.len(), "Uploading artifact");
        let response = self
            .client
            .push(&oci_reference, &layers, config, &auth, Some(manifest))
            .await
            .map_err(|e| failure("push", e))?;
        trace!(manifest_url = %response.manifest_url, "Registry accepted manifest");

        // The client re-encodes the manifest, so ask the registry what it stored
        let (_, digest) = self
            .client
            .pull_image_manifest(&oci_reference, &auth)
            .await
            .map_err(|e| failure("resolve pushed manifest", e))?;
        parse_digest("resolve pushed manifest", &digest)
    }

    async fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
    ) -> Result<(Vec<u8>, Digest), TransportError> {
        let oci_reference = to_oci_reference(reference);
        let auth = self.auth(reference);

        let (manifest, digest) = self
            .client
            .pull_image_manifest(&oci_reference, &auth)
            .await
            .map_err(|e| failure("pull manifest", e))?;
        trace!(?manifest, "Got manifest");

        let bytes = serde_json::to_vec(&manifest).map_err(|e| failure("decode manifest", e))?;
        Ok((bytes, parse_digest("pull manifest", &digest)?))
    }

    async fn fetch_blob(
        &self,
        reference: &ArtifactReference,
        digest: &Digest,
    ) -> Result<Vec<u8>, TransportError> {
        let oci_reference = to_oci_reference(reference);
        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };

        debug!(%digest, "Pulling blob");
        let mut data = Vec::new();
        self.client
            .pull_blob(&oci_reference, &descriptor, &mut data)
            .await
            .map_err(|e| failure("pull blob", e))?;
        Ok(data)
    }

    async fn list_tags(
        &self,
        reference: &ArtifactReference,
    ) -> Result<Vec<String>, TransportError> {
        let oci_reference = to_oci_reference(reference);
        let auth = self.auth(reference);

        let response = self
            .client
            .list_tags(&oci_reference, &auth, None, None)
            .await
            .map_err(|e| failure("list tags", e))?;
        Ok(response.tags)
    }
}
