//! Deterministic directory archiving.
//!
//! A source directory is walked and written as a single gzip-compressed
//! tarball, with entries ordered bytewise by their `/`-separated relative
//! path (so `a`, `a.txt`, `a/x`). Every header field that varies between machines
//! or runs (timestamps, ownership, user names) is normalized, so archiving the
//! same tree twice yields byte-identical blobs and therefore the same digest.

use crate::digest::{Digest, DigestWriter};
use crate::ignore_rules::{IgnoreMatcher, IgnoreRules};
use crate::{Error, Result};
use flate2::{Compression, GzBuilder};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{EntryType, Header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Media type of the single content layer of a dirpack artifact.
pub const CONTENT_MEDIA_TYPE: &str = "application/vnd.dirpack.content.v1.tar+gzip";

/// How symbolic links found in the source tree are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkPolicy {
    /// Fail the archive with an error naming the link.
    #[default]
    Reject,
    /// Archive the link target's content in place of the link. Targets that
    /// resolve outside the source root are an error.
    Follow,
    /// Leave links out of the archive.
    Skip,
}

/// Archiver configuration.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Symlink handling.
    pub symlinks: SymlinkPolicy,
    /// Gzip level, 0 (store) to 9 (best).
    pub compression_level: u32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            symlinks: SymlinkPolicy::default(),
            compression_level: Compression::default().level(),
        }
    }
}

/// One filesystem object captured for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    relative_path: String,
    mode: u32,
    is_dir: bool,
    source: PathBuf,
}

impl ArchiveEntry {
    /// `/`-separated path relative to the source root.
    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Permission bits recorded in the header.
    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.mode
    }

    /// Whether this entry is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Location the content is read from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Descriptor of an archived layer, derived from the compressed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    digest: Digest,
    size: u64,
    media_type: String,
}

impl LayerDescriptor {
    pub(crate) fn new(digest: Digest, size: u64) -> Self {
        Self {
            digest,
            size,
            media_type: CONTENT_MEDIA_TYPE.to_string(),
        }
    }

    /// Digest of the compressed blob.
    #[must_use]
    pub const fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Size of the compressed blob in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Layer media type.
    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }
}

/// An archive held in memory together with its descriptor.
#[derive(Debug, Clone)]
pub struct ArchiveOutput {
    /// The compressed blob.
    pub blob: Vec<u8>,
    /// Digest, size, and media type of `blob`.
    pub layer: LayerDescriptor,
    /// Number of entries written.
    pub entry_count: usize,
}

/// Walks directories and writes deterministic layer blobs.
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    options: ArchiveOptions,
}

impl Archiver {
    /// Create an archiver with the given options.
    #[must_use]
    pub const fn new(options: ArchiveOptions) -> Self {
        Self { options }
    }

    /// Archive `source` into memory.
    pub fn archive(
        &self,
        source: &Path,
        ignore: &IgnoreRules,
        token: &CancellationToken,
    ) -> Result<ArchiveOutput> {
        let entries = self.entries(source, ignore, token)?;
        let entry_count = entries.len();
        let (layer, blob) = self.write_entries(source, &entries, Vec::new(), token)?;
        Ok(ArchiveOutput {
            blob,
            layer,
            entry_count,
        })
    }

    /// Archive `source`, streaming the compressed bytes into `writer`.
    ///
    /// Returns the layer descriptor and the writer.
    pub fn archive_to<W: Write>(
        &self,
        source: &Path,
        ignore: &IgnoreRules,
        writer: W,
        token: &CancellationToken,
    ) -> Result<(LayerDescriptor, W)> {
        let entries = self.entries(source, ignore, token)?;
        self.write_entries(source, &entries, writer, token)
    }

    /// List the entries that archiving `source` would capture, in archive order.
    pub fn entries(
        &self,
        source: &Path,
        ignore: &IgnoreRules,
        token: &CancellationToken,
    ) -> Result<Vec<ArchiveEntry>> {
        let metadata = fs::metadata(source).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::archive_io(source, "source directory does not exist", e)
            } else {
                Error::archive_io(source, "failed to read source directory", e)
            }
        })?;
        if !metadata.is_dir() {
            return Err(Error::archive(source, "source is not a directory"));
        }

        let canonical_root = fs::canonicalize(source)
            .map_err(|e| Error::archive_io(source, "failed to resolve source directory", e))?;
        let matcher = ignore.compile(source)?;
        let follow = self.options.symlinks == SymlinkPolicy::Follow;

        let walker = WalkDir::new(source)
            .follow_links(follow)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| keep_entry(source, &matcher, entry));

        let mut entries = Vec::new();
        for entry in walker {
            if token.is_cancelled() {
                return Err(Error::cancelled("archive"));
            }

            let entry = entry.map_err(|e| walk_error(source, e))?;
            if entry.depth() == 0 {
                continue;
            }
            let path = entry.path();
            let relative_path = relative_path(source, path)?;

            if entry.path_is_symlink() {
                match self.options.symlinks {
                    SymlinkPolicy::Reject => {
                        return Err(Error::archive(
                            path,
                            "symbolic links are not supported by the configured symlink policy",
                        ));
                    }
                    SymlinkPolicy::Skip => {
                        debug!(path = %relative_path, "Skipping symbolic link");
                        continue;
                    }
                    SymlinkPolicy::Follow => {}
                }
            }

            if follow {
                let resolved = fs::canonicalize(path)
                    .map_err(|e| Error::archive_io(path, "failed to resolve path", e))?;
                if !resolved.starts_with(&canonical_root) {
                    return Err(Error::archive(
                        path,
                        format!(
                            "resolves to {} outside the source root",
                            resolved.display()
                        ),
                    ));
                }
            }

            let metadata = entry
                .metadata()
                .map_err(|e| walk_error(source, e))?;
            let file_type = metadata.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                debug!(path = %relative_path, "Skipping special file");
                continue;
            }

            trace!(path = %relative_path, is_dir = file_type.is_dir(), "Collected archive entry");
            entries.push(ArchiveEntry {
                mode: permission_bits(&metadata),
                is_dir: file_type.is_dir(),
                source: path.to_path_buf(),
                relative_path,
            });
        }

        // A parent's path is a prefix of its children's, so directories still
        // precede their contents
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        debug!(
            source = %source.display(),
            entries = entries.len(),
            "Collected archive entries"
        );
        Ok(entries)
    }

    fn write_entries<W: Write>(
        &self,
        root: &Path,
        entries: &[ArchiveEntry],
        writer: W,
        token: &CancellationToken,
    ) -> Result<(LayerDescriptor, W)> {
        let sink = DigestWriter::new(writer);
        let encoder = GzBuilder::new()
            .mtime(0)
            .write(sink, Compression::new(self.options.compression_level));
        let mut builder = tar::Builder::new(encoder);

        for entry in entries {
            if token.is_cancelled() {
                return Err(Error::cancelled("archive"));
            }
            append_entry(&mut builder, entry, token)?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| Error::archive_io(root, "failed to finalize tar stream", e))?;
        let sink = encoder
            .finish()
            .map_err(|e| Error::archive_io(root, "failed to finalize gzip stream", e))?;
        let (digest, size, writer) = sink.finalize();

        debug!(%digest, size, entries = entries.len(), "Wrote layer blob");
        Ok((LayerDescriptor::new(digest, size), writer))
    }
}

fn keep_entry(root: &Path, matcher: &IgnoreMatcher, entry: &walkdir::DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    entry.path().strip_prefix(root).map_or(true, |relative| {
        let ignored = matcher.is_ignored(relative, entry.file_type().is_dir());
        if ignored {
            trace!(path = %relative.display(), "Ignored by rules");
        }
        !ignored
    })
}

fn walk_error(root: &Path, error: walkdir::Error) -> Error {
    let path = error.path().unwrap_or(root).to_path_buf();
    let message = if error.loop_ancestor().is_some() {
        "symbolic link loop detected".to_string()
    } else {
        "failed to read entry".to_string()
    };
    match error.into_io_error() {
        Some(source) => Error::archive_io(path, message, source),
        None => Error::archive(path, message),
    }
}

/// Convert a walked path into its canonical `/`-separated relative form.
fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::archive(path, "path escapes the source root"))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| Error::archive(path, "path is not valid UTF-8"))?;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::archive(path, "path escapes the source root"));
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

fn base_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    entry: &ArchiveEntry,
    token: &CancellationToken,
) -> Result<()> {
    trace!(path = %entry.relative_path, "Adding entry to archive");

    if entry.is_dir {
        let mut header = base_header(EntryType::Directory, entry.mode, 0);
        return builder
            .append_data(&mut header, &entry.relative_path, io::empty())
            .map_err(|e| Error::archive_io(&entry.source, "failed to add directory to archive", e));
    }

    let file = File::open(&entry.source)
        .map_err(|e| Error::archive_io(&entry.source, "failed to open file", e))?;
    let size = file
        .metadata()
        .map_err(|e| Error::archive_io(&entry.source, "failed to read file metadata", e))?
        .len();

    let mut header = base_header(EntryType::Regular, entry.mode, size);
    let mut reader = CancellableReader::new(file.take(size), token);
    builder
        .append_data(&mut header, &entry.relative_path, &mut reader)
        .map_err(|e| {
            if token.is_cancelled() {
                Error::cancelled("archive")
            } else {
                Error::archive_io(&entry.source, "failed to read file", e)
            }
        })?;

    if reader.bytes_read != size {
        return Err(Error::archive(
            &entry.source,
            format!(
                "file changed while being archived (expected {size} bytes, read {})",
                reader.bytes_read
            ),
        ));
    }
    Ok(())
}

/// Reader that stops with an error once the token is cancelled.
pub(crate) struct CancellableReader<'a, R> {
    inner: R,
    token: &'a CancellationToken,
    bytes_read: u64,
}

impl<'a, R: Read> CancellableReader<'a, R> {
    pub(crate) const fn new(inner: R, token: &'a CancellationToken) -> Self {
        Self {
            inner,
            token,
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(io::Error::other("operation cancelled"));
        }
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}
