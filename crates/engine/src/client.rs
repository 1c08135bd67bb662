//! Push and pull orchestration.

use crate::archive::{ArchiveOptions, Archiver, SymlinkPolicy};
use crate::digest::Digest;
use crate::error::TransportError;
use crate::extract::{ExtractOptions, ExtractSummary, Extractor};
use crate::ignore_rules::IgnoreRules;
use crate::manifest::{CONFIG_BLOB, CONFIG_MEDIA_TYPE, Manifest};
use crate::metadata::Metadata;
use crate::reference::{ArtifactReference, DEFAULT_TAG};
use crate::transport::{Blob, PushRequest, RegistryTransport};
use crate::{Error, Result};
use flate2::Compression;
use std::future::Future;
use std::io::Cursor;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Client behavior settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Tag applied to references that name none.
    pub default_tag: String,
    /// Symlink handling while archiving.
    pub symlink_policy: SymlinkPolicy,
    /// Upper bound on extracted bytes per pull.
    pub max_extract_size: Option<u64>,
    /// Gzip level for pushed layers.
    pub compression_level: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_tag: DEFAULT_TAG.to_string(),
            symlink_policy: SymlinkPolicy::default(),
            max_extract_size: None,
            compression_level: Compression::default().level(),
        }
    }
}

/// A pulled artifact.
#[derive(Debug, Clone)]
pub struct PullOutcome {
    /// The manifest that was extracted.
    pub manifest: Manifest,
    /// Manifest digest reported by the registry.
    pub digest: Digest,
    /// What the extraction wrote.
    pub summary: ExtractSummary,
}

/// Pushes directories to, and pulls them from, a registry.
///
/// # Example
///
/// ```ignore
/// let client = ArtifactClient::new(transport);
/// let token = CancellationToken::new();
/// let digest = client
///     .push(&token, "ghcr.io/org/app:v1", dir, &metadata, &IgnoreRules::vcs())
///     .await?;
/// ```
#[derive(Debug)]
pub struct ArtifactClient<T> {
    transport: T,
    options: ClientOptions,
}

impl<T: RegistryTransport> ArtifactClient<T> {
    /// Create a client with default options.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Create a client with explicit options.
    pub const fn with_options(transport: T, options: ClientOptions) -> Self {
        Self { transport, options }
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The client options.
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Parse a reference, applying the configured default tag.
    pub fn parse_reference(&self, reference: &str) -> Result<ArtifactReference> {
        ArtifactReference::parse_with_default_tag(reference, &self.options.default_tag)
    }

    /// Archive `source` and publish it under `reference`.
    ///
    /// Returns the manifest digest confirmed by the registry. The tag is only
    /// updated once every blob has been uploaded.
    pub async fn push(
        &self,
        token: &CancellationToken,
        reference: &str,
        source: &Path,
        metadata: &Metadata,
        ignore: &IgnoreRules,
    ) -> Result<Digest> {
        let parsed = self.parse_reference(reference)?;
        if parsed.digest().is_some() {
            return Err(Error::reference(
                reference,
                "cannot push to a digest-pinned reference",
            ));
        }
        metadata.validate()?;
        if token.is_cancelled() {
            return Err(Error::cancelled("push"));
        }

        info!(reference = %parsed, source = %source.display(), "Pushing artifact");

        let archiver = Archiver::new(ArchiveOptions {
            symlinks: self.options.symlink_policy,
            compression_level: self.options.compression_level,
        });
        let source_dir = source.to_path_buf();
        let rules = ignore.clone();
        let task_token = token.clone();
        let output = tokio::task::spawn_blocking(move || {
            archiver.archive(&source_dir, &rules, &task_token)
        })
        .await
        .map_err(|e| Error::archive(source, format!("archive task failed: {e}")))??;

        debug!(
            digest = %output.layer.digest(),
            size = output.layer.size(),
            entries = output.entry_count,
            "Archived source directory"
        );

        let manifest = Manifest::build(&output.layer, metadata);
        manifest.validate_annotations()?;
        let manifest_bytes = manifest.to_json()?;
        let local_digest = Digest::sha256(&manifest_bytes);

        let request = PushRequest {
            manifest: manifest_bytes,
            config: Blob::new(CONFIG_MEDIA_TYPE, CONFIG_BLOB.to_vec()),
            layers: vec![Blob {
                media_type: output.layer.media_type().to_string(),
                digest: output.layer.digest().clone(),
                data: output.blob,
            }],
        };

        let digest =
            cancellable(token, "push", &parsed, self.transport.push(&parsed, request)).await?;
        if digest != local_digest {
            debug!(local = %local_digest, remote = %digest, "Registry re-encoded the manifest");
        }

        info!(
            reference = %parsed,
            digest = %digest,
            size = output.layer.size(),
            "Pushed artifact"
        );
        Ok(digest)
    }

    /// Fetch the artifact at `reference` and extract it into `destination`.
    ///
    /// The destination is created if missing. On error it may be partially
    /// populated.
    pub async fn pull(
        &self,
        token: &CancellationToken,
        reference: &str,
        destination: &Path,
    ) -> Result<Manifest> {
        self.pull_with_outcome(token, reference, destination)
            .await
            .map(|outcome| outcome.manifest)
    }

    /// Like [`pull`](Self::pull), also reporting the manifest digest and what
    /// was written.
    pub async fn pull_with_outcome(
        &self,
        token: &CancellationToken,
        reference: &str,
        destination: &Path,
    ) -> Result<PullOutcome> {
        let parsed = self.parse_reference(reference)?;
        if token.is_cancelled() {
            return Err(Error::cancelled("pull"));
        }
        let reference = parsed.to_string();
        info!(reference = %reference, destination = %destination.display(), "Pulling artifact");

        let (manifest_bytes, digest) =
            cancellable(token, "pull", &parsed, self.transport.fetch_manifest(&parsed)).await?;
        if let Some(pinned) = parsed.digest() {
            if &digest != pinned {
                return Err(Error::digest_mismatch(
                    &reference,
                    pinned.to_string(),
                    digest.to_string(),
                ));
            }
        }

        let manifest = Manifest::from_json(&manifest_bytes, &reference)?;
        let layer = manifest.content_layer(&reference)?;
        debug!(digest = %layer.digest, size = layer.size, "Resolved content layer");

        let blob = cancellable(
            token,
            "pull",
            &parsed,
            self.transport.fetch_blob(&parsed, &layer.digest),
        )
        .await?;
        verify_blob(&reference, &layer.digest, layer.size, &blob)?;

        let extractor = Extractor::new(ExtractOptions {
            max_size: self.options.max_extract_size,
        });
        let target = destination.to_path_buf();
        let task_token = token.clone();
        let summary = tokio::task::spawn_blocking(move || {
            extractor.extract(Cursor::new(blob), &target, &task_token)
        })
        .await
        .map_err(|e| {
            Error::extract(None, destination, 0, format!("extraction task failed: {e}"), None)
        })??;

        info!(
            reference = %reference,
            digest = %digest,
            entries = summary.entries,
            bytes = summary.bytes,
            "Pulled artifact"
        );
        Ok(PullOutcome {
            manifest,
            digest,
            summary,
        })
    }

    /// List the tags of a repository, sorted.
    ///
    /// Any tag or digest in `repository` is ignored.
    pub async fn list_tags(
        &self,
        token: &CancellationToken,
        repository: &str,
    ) -> Result<Vec<String>> {
        let parsed = self.parse_reference(repository)?;
        let mut tags =
            cancellable(token, "list tags", &parsed, self.transport.list_tags(&parsed)).await?;
        tags.sort();
        tags.dedup();
        debug!(repository = %parsed.repository_url(), count = tags.len(), "Listed tags");
        Ok(tags)
    }
}

/// Await a transport call unless the token fires first.
async fn cancellable<F, V>(
    token: &CancellationToken,
    operation: &str,
    reference: &ArtifactReference,
    call: F,
) -> Result<V>
where
    F: Future<Output = std::result::Result<V, TransportError>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::cancelled(operation)),
        result = call => result.map_err(|e| Error::transport(reference.to_string(), e)),
    }
}

fn verify_blob(reference: &str, expected: &Digest, size: u64, blob: &[u8]) -> Result<()> {
    let actual_size = blob.len() as u64;
    if actual_size != size {
        return Err(Error::digest_mismatch(
            reference,
            format!("{size} bytes"),
            format!("{actual_size} bytes"),
        ));
    }
    let actual = Digest::sha256(blob);
    if &actual != expected {
        return Err(Error::digest_mismatch(
            reference,
            expected.to_string(),
            actual.to_string(),
        ));
    }
    Ok(())
}
