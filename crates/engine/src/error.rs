//! Error types for archive, extraction, and registry round-trips.

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Result type for dirpack engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a registry transport implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while pushing or pulling directory artifacts.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Malformed artifact reference string.
    #[error("Invalid artifact reference '{reference}': {reason}")]
    #[diagnostic(
        code(dirpack::reference),
        help("References look like host[:port]/namespace/name[:tag], e.g. ghcr.io/org/app:v1.0.0")
    )]
    Reference {
        /// The reference as supplied by the caller.
        reference: String,
        /// Why the reference was rejected.
        reason: String,
    },

    /// Provenance metadata failed validation.
    #[error("Invalid metadata '{field}': {reason}")]
    #[diagnostic(code(dirpack::metadata))]
    Metadata {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Reading the source tree failed.
    #[error("Failed to archive {}: {message}", path.display())]
    #[diagnostic(
        code(dirpack::archive),
        help("Check that the source directory exists and every file under it is readable")
    )]
    Archive {
        /// Path that caused the failure.
        path: Box<Path>,
        /// Description of the failure.
        message: String,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The archive contains an entry that would land outside the destination.
    #[error(
        "Unsafe path '{path}' in archive for {}: {reason} ({entries_written} entries written before rejection)",
        destination.display()
    )]
    #[diagnostic(
        code(dirpack::unsafe_path),
        help("The artifact was rejected; the destination may be partially populated and should be discarded")
    )]
    UnsafePath {
        /// The entry path as recorded in the archive.
        path: String,
        /// Destination root of the extraction.
        destination: Box<Path>,
        /// Why the path is unsafe.
        reason: String,
        /// Number of entries materialized before the rejection.
        entries_written: usize,
    },

    /// Unpacking the archive failed.
    #[error(
        "Extraction into {} failed{}: {message} ({entries_written} entries written)",
        destination.display(),
        path.as_ref().map_or(String::new(), |p| format!(" at '{p}'"))
    )]
    #[diagnostic(
        code(dirpack::extract),
        help("The destination may be partially populated and should not be treated as complete")
    )]
    Extract {
        /// Entry being processed, if the failure is tied to one.
        path: Option<String>,
        /// Destination root of the extraction.
        destination: Box<Path>,
        /// Number of entries materialized before the failure.
        entries_written: usize,
        /// Description of the failure.
        message: String,
        /// Underlying I/O or decompression error, if any.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The pulled layer is not a dirpack content layer.
    #[error("Unsupported layer media type for '{reference}': expected {expected}, got {actual}")]
    #[diagnostic(
        code(dirpack::media_type),
        help("The reference does not point at a directory artifact produced by dirpack")
    )]
    UnsupportedMediaType {
        /// The reference that was pulled.
        reference: String,
        /// The media type this client understands.
        expected: String,
        /// The media type found in the manifest.
        actual: String,
    },

    /// Blob content does not match its descriptor.
    #[error("Digest mismatch for '{reference}': expected {expected}, got {actual}")]
    #[diagnostic(code(dirpack::digest_mismatch))]
    DigestMismatch {
        /// The reference that was pulled.
        reference: String,
        /// Digest (or size) declared by the manifest.
        expected: String,
        /// Digest (or size) of the received content.
        actual: String,
    },

    /// The manifest does not describe a single-layer directory artifact.
    #[error("Invalid manifest for '{reference}': {reason}")]
    #[diagnostic(code(dirpack::manifest))]
    InvalidManifest {
        /// The reference the manifest belongs to.
        reference: String,
        /// What is wrong with the manifest.
        reason: String,
    },

    /// The registry transport failed.
    #[error("Registry transport failed for '{reference}': {source}")]
    #[diagnostic(
        code(dirpack::transport),
        help("Check registry connectivity and credentials")
    )]
    Transport {
        /// The reference being pushed, pulled, or listed.
        reference: String,
        /// The transport failure.
        #[source]
        source: TransportError,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled: {operation}")]
    #[diagnostic(code(dirpack::cancelled))]
    Cancelled {
        /// The operation that observed the cancellation.
        operation: String,
    },
}

impl Error {
    /// Create an invalid reference error.
    #[must_use]
    pub fn reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid metadata error.
    #[must_use]
    pub fn metadata(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Metadata {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an archive error without an underlying I/O error.
    #[must_use]
    pub fn archive(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Archive {
            path: path.as_ref().into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an archive error wrapping an I/O error.
    #[must_use]
    pub fn archive_io(
        path: impl AsRef<Path>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Archive {
            path: path.as_ref().into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an unsafe path error.
    #[must_use]
    pub fn unsafe_path(
        path: impl Into<String>,
        destination: impl AsRef<Path>,
        reason: impl Into<String>,
        entries_written: usize,
    ) -> Self {
        Self::UnsafePath {
            path: path.into(),
            destination: destination.as_ref().into(),
            reason: reason.into(),
            entries_written,
        }
    }

    /// Create an extraction error.
    #[must_use]
    pub fn extract(
        path: Option<String>,
        destination: impl AsRef<Path>,
        entries_written: usize,
        message: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::Extract {
            path,
            destination: destination.as_ref().into(),
            entries_written,
            message: message.into(),
            source,
        }
    }

    /// Create an unsupported media type error.
    #[must_use]
    pub fn unsupported_media_type(
        reference: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::UnsupportedMediaType {
            reference: reference.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a digest mismatch error.
    #[must_use]
    pub fn digest_mismatch(
        reference: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::DigestMismatch {
            reference: reference.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid manifest error.
    #[must_use]
    pub fn invalid_manifest(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a transport failure with the reference it concerns.
    #[must_use]
    pub fn transport(reference: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            reference: reference.into(),
            source,
        }
    }

    /// Create a cancellation error.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Whether this error reports caller cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Opaque failure reported by a registry transport.
///
/// Retry policy belongs to the transport; the engine surfaces these as-is.
#[derive(Error, Debug)]
#[error("{operation} failed: {message}")]
pub struct TransportError {
    operation: String,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Create a transport error for the named operation.
    #[must_use]
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The transport operation that failed (e.g. "push manifest").
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Human-readable failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
