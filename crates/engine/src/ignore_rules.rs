//! Gitignore-style exclusion rules for archiving.

use crate::{Error, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Version-control metadata directories that are usually not worth shipping.
pub const VCS_IGNORE_PATTERNS: &[&str] = &[".git/", ".hg/", ".svn/", ".bzr/", ".jj/"];

/// Conventional name of a per-directory ignore file.
pub const SOURCE_IGNORE_FILE: &str = ".sourceignore";

/// An ordered set of gitignore patterns.
///
/// Patterns are compiled against the source root when archiving, so the same
/// rules can be applied to different directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    /// Build rules from gitignore patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Rules excluding version-control metadata.
    #[must_use]
    pub fn vcs() -> Self {
        Self::new(VCS_IGNORE_PATTERNS.iter().copied())
    }

    /// Load rules from an ignore file (one pattern per line, `#` comments).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::archive_io(path, "failed to read ignore file", e))?;
        Ok(Self::new(content.lines()))
    }

    /// Append a single pattern.
    pub fn push(&mut self, pattern: impl Into<String>) {
        self.patterns.push(pattern.into());
    }

    /// Append every pattern of `other`, preserving order.
    pub fn extend(&mut self, other: Self) {
        self.patterns.extend(other.patterns);
    }

    /// The raw patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether no patterns are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Compile the patterns for matching paths relative to `root`.
    ///
    /// `root` only labels errors. The matcher never strips it from candidate
    /// paths, so a source directory whose name recurs inside itself matches
    /// correctly.
    pub fn compile(&self, root: &Path) -> Result<IgnoreMatcher> {
        // "." disables the crate's root-prefix stripping
        let mut builder = GitignoreBuilder::new(".");
        for pattern in &self.patterns {
            builder.add_line(None, pattern).map_err(|e| {
                Error::archive(root, format!("invalid ignore pattern '{pattern}': {e}"))
            })?;
        }
        let gitignore = builder
            .build()
            .map_err(|e| Error::archive(root, format!("failed to compile ignore rules: {e}")))?;
        Ok(IgnoreMatcher { gitignore })
    }
}

/// Compiled ignore rules bound to a source root.
#[derive(Debug)]
pub struct IgnoreMatcher {
    gitignore: Gitignore,
}

impl IgnoreMatcher {
    /// Whether a path relative to the source root is excluded, either
    /// directly or through one of its parent directories.
    #[must_use]
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.gitignore
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}
