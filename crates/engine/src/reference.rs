//! Artifact reference parsing.
//!
//! Parses references like `ghcr.io/org/app:v1.0.0` into structured components.
//! Unlike container image references there is no implicit registry: the first
//! path component is always the registry host.

use crate::digest::Digest;
use crate::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Tag applied when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// Optional scheme prefix accepted in front of references.
const OCI_SCHEME: &str = "oci://";

static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\[[0-9A-Fa-f:]+\]|[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*)(:[0-9]+)?$",
    )
    .unwrap_or_else(|e| unreachable!("host pattern is valid: {e}"))
});

static PATH_COMPONENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*$")
        .unwrap_or_else(|e| unreachable!("path component pattern is valid: {e}"))
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$")
        .unwrap_or_else(|e| unreachable!("tag pattern is valid: {e}"))
});

/// Parsed registry address of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl ArtifactReference {
    /// Parse a reference, defaulting the tag to [`DEFAULT_TAG`].
    ///
    /// Supports formats:
    /// - `ghcr.io/org/app` → ghcr.io/org/app:latest
    /// - `localhost:5000/app:v1` → registry `localhost:5000`
    /// - `oci://ghcr.io/org/app:v1` → scheme prefix is stripped
    /// - `ghcr.io/org/app@sha256:<hex>` → pinned by digest, no tag
    pub fn parse(reference: &str) -> Result<Self> {
        Self::parse_with_default_tag(reference, DEFAULT_TAG)
    }

    /// Parse a reference, applying `default_tag` when neither a tag nor a
    /// digest is present.
    pub fn parse_with_default_tag(reference: &str, default_tag: &str) -> Result<Self> {
        let original = reference;
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::reference(original, "reference is empty"));
        }

        let reference = reference.strip_prefix(OCI_SCHEME).unwrap_or(reference);
        if reference.contains("://") {
            return Err(Error::reference(
                original,
                "only the oci:// scheme is supported",
            ));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                let digest = Digest::parse(digest).map_err(|e| Error::reference(original, e))?;
                (name, Some(digest))
            }
            None => (reference, None),
        };

        let Some((registry, path)) = name_tag.split_once('/') else {
            return Err(Error::reference(
                original,
                "missing registry host or repository (expected host/repository)",
            ));
        };
        if registry.is_empty() {
            return Err(Error::reference(original, "registry host is empty"));
        }
        if !HOST_RE.is_match(registry) {
            return Err(Error::reference(
                original,
                format!("invalid registry host '{registry}'"),
            ));
        }

        // The host is gone, so any remaining colon separates the tag
        let (repository, tag) = match path.rsplit_once(':') {
            Some((repository, tag)) => (repository, Some(tag)),
            None => (path, None),
        };
        if repository.is_empty() {
            return Err(Error::reference(original, "repository is empty"));
        }
        for component in repository.split('/') {
            if !PATH_COMPONENT_RE.is_match(component) {
                return Err(Error::reference(
                    original,
                    format!("invalid repository component '{component}'"),
                ));
            }
        }
        if let Some(tag) = tag {
            if !TAG_RE.is_match(tag) {
                return Err(Error::reference(original, format!("invalid tag '{tag}'")));
            }
        }
        if tag.is_none() && digest.is_none() && !TAG_RE.is_match(default_tag) {
            return Err(Error::reference(
                original,
                format!("invalid default tag '{default_tag}'"),
            ));
        }

        // Apply default tag if no tag and no digest
        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(default_tag.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Registry host, including the port when one was given.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry (e.g. `org/app`).
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, if the reference is not pinned by digest alone.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Digest pin, if present.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// `host/repository` without tag or digest.
    #[must_use]
    pub fn repository_url(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
