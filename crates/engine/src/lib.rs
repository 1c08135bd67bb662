//! Directory artifacts over OCI registries.
//!
//! This crate provides functionality to:
//! - Archive a directory into a deterministic, content-addressed layer blob
//! - Describe that layer with an OCI image manifest carrying provenance
//! - Pull the artifact back and extract it safely into a destination
//!
//! Registry I/O goes through the [`RegistryTransport`] trait, so the engine
//! itself never speaks HTTP.
//!
//! # Example
//!
//! ```ignore
//! use dirpack_engine::{ArtifactClient, IgnoreRules, Metadata};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = ArtifactClient::new(transport);
//! let token = CancellationToken::new();
//!
//! let metadata = Metadata::new("github.com/org/repo", "main@sha1:abc123");
//! let digest = client
//!     .push(
//!         &token,
//!         "ghcr.io/org/configs:v1",
//!         "./configs".as_ref(),
//!         &metadata,
//!         &IgnoreRules::vcs(),
//!     )
//!     .await?;
//!
//! let manifest = client.pull(&token, "ghcr.io/org/configs:v1", "./out".as_ref()).await?;
//! ```

#![warn(missing_docs)]

mod archive;
mod client;
mod digest;
mod error;
mod extract;
mod ignore_rules;
mod manifest;
mod metadata;
mod reference;
mod transport;

pub use archive::{
    ArchiveEntry, ArchiveOptions, ArchiveOutput, Archiver, CONTENT_MEDIA_TYPE, LayerDescriptor,
    SymlinkPolicy,
};
pub use client::{ArtifactClient, ClientOptions, PullOutcome};
pub use digest::{Digest, DigestWriter};
pub use error::{BoxError, Error, Result, TransportError};
pub use extract::{ExtractOptions, ExtractSummary, Extractor};
pub use ignore_rules::{IgnoreMatcher, IgnoreRules, SOURCE_IGNORE_FILE, VCS_IGNORE_PATTERNS};
pub use manifest::{CONFIG_BLOB, CONFIG_MEDIA_TYPE, Descriptor, MANIFEST_MEDIA_TYPE, Manifest};
pub use metadata::{
    CREATED_ANNOTATION, Metadata, PROVENANCE_ANNOTATIONS, REVISION_ANNOTATION, SOURCE_ANNOTATION,
    format_timestamp,
};
pub use reference::{ArtifactReference, DEFAULT_TAG};
pub use transport::{Blob, PushRequest, RegistryTransport};
