//! Provenance metadata recorded as manifest annotations.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Annotation key for the artifact creation timestamp (RFC 3339).
pub const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";

/// Annotation key for the origin URL of the packaged content.
pub const SOURCE_ANNOTATION: &str = "org.opencontainers.image.source";

/// Annotation key for the source revision (commit, version, ...).
pub const REVISION_ANNOTATION: &str = "org.opencontainers.image.revision";

/// The provenance keys every dirpack manifest carries.
pub const PROVENANCE_ANNOTATIONS: [&str; 3] =
    [CREATED_ANNOTATION, SOURCE_ANNOTATION, REVISION_ANNOTATION];

/// Caller-supplied provenance for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    /// Origin URL or identifier of the packaged content.
    pub source: String,
    /// Source revision identifier.
    pub revision: String,
    /// Creation time; `None` means "now" at push time.
    pub created_at: Option<DateTime<Utc>>,
    /// Extra annotations carried alongside the provenance keys.
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    /// Create metadata for a source and revision, created at push time.
    #[must_use]
    pub fn new(source: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            revision: revision.into(),
            ..Self::default()
        }
    }

    /// Pin the creation timestamp.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Add an extra annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Check the fields a pushed artifact must carry.
    ///
    /// Source and revision must be non-empty; extra annotations must have
    /// non-empty keys and may not shadow a provenance key.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::metadata("source", "must not be empty"));
        }
        if self.revision.trim().is_empty() {
            return Err(Error::metadata("revision", "must not be empty"));
        }
        for key in self.annotations.keys() {
            if key.trim().is_empty() {
                return Err(Error::metadata("annotations", "annotation keys must not be empty"));
            }
            if PROVENANCE_ANNOTATIONS.contains(&key.as_str()) {
                return Err(Error::metadata(
                    key.clone(),
                    "provenance annotations are set from source, revision and created_at",
                ));
            }
        }
        Ok(())
    }

    /// Render the annotation map, resolving a missing creation time to `now`.
    ///
    /// Provenance keys always win over extra annotations with the same key.
    #[must_use]
    pub fn to_annotations(&self, now: DateTime<Utc>) -> BTreeMap<String, String> {
        let created = self.created_at.unwrap_or(now);
        let mut annotations = self.annotations.clone();
        annotations.insert(CREATED_ANNOTATION.to_string(), format_timestamp(created));
        annotations.insert(SOURCE_ANNOTATION.to_string(), self.source.clone());
        annotations.insert(REVISION_ANNOTATION.to_string(), self.revision.clone());
        annotations
    }

    /// Recover metadata from manifest annotations.
    ///
    /// Fails if a provenance key is missing or the timestamp is not RFC 3339.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            annotations
                .get(key)
                .cloned()
                .ok_or_else(|| Error::metadata(key, "annotation not found"))
        };

        let created = get(CREATED_ANNOTATION)?;
        let created_at = DateTime::parse_from_rfc3339(&created)
            .map_err(|e| {
                Error::metadata(CREATED_ANNOTATION, format!("'{created}' is not RFC 3339: {e}"))
            })?
            .with_timezone(&Utc);

        let extra = annotations
            .iter()
            .filter(|(key, _)| !PROVENANCE_ANNOTATIONS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            source: get(SOURCE_ANNOTATION)?,
            revision: get(REVISION_ANNOTATION)?,
            created_at: Some(created_at),
            annotations: extra,
        })
    }
}

/// Format a timestamp the way it is stored in the `created` annotation.
///
/// Fractional seconds are kept only when present, so whole-second times
/// render as `2024-03-01T12:30:00Z`.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
