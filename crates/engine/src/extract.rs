//! Safe extraction of layer blobs into a destination directory.
//!
//! Entry paths are normalized and checked before anything touches the
//! filesystem: absolute paths, `..` components, link entries, and paths that
//! would pass through a symbolic link already present in the destination are
//! all rejected.

use crate::archive::CancellableReader;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::EntryType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Extractor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Upper bound on the total bytes of file content written.
    pub max_size: Option<u64>,
}

/// What an extraction wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractSummary {
    /// Files and directories materialized.
    pub entries: usize,
    /// Bytes of file content written.
    pub bytes: u64,
}

/// Unpacks gzip-compressed tarballs.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    options: ExtractOptions,
}

impl Extractor {
    /// Create an extractor with the given options.
    #[must_use]
    pub const fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    /// Extract a gzip-compressed tarball from `reader` into `destination`.
    ///
    /// The destination is created if missing. Existing files are overwritten
    /// but nothing is deleted. On failure the destination may be partially
    /// populated; the error reports how many entries were written.
    pub fn extract<R: Read>(
        &self,
        reader: R,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<ExtractSummary> {
        fs::create_dir_all(destination).map_err(|e| {
            Error::extract(None, destination, 0, "failed to create destination", Some(e))
        })?;

        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let entries = archive.entries().map_err(|e| {
            Error::extract(None, destination, 0, "failed to read archive", Some(e))
        })?;

        let mut summary = ExtractSummary::default();
        let mut directories: Vec<(PathBuf, u32)> = Vec::new();

        for entry in entries {
            if token.is_cancelled() {
                return Err(Error::cancelled("extract"));
            }

            let mut entry = entry.map_err(|e| {
                Error::extract(
                    None,
                    destination,
                    summary.entries,
                    "failed to read archive entry",
                    Some(e),
                )
            })?;
            let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let entry_type = entry.header().entry_type();

            match entry_type {
                EntryType::XGlobalHeader | EntryType::XHeader => {
                    trace!(path = %raw_path, "Skipping extended header");
                    continue;
                }
                EntryType::Symlink | EntryType::Link => {
                    return Err(Error::unsafe_path(
                        raw_path,
                        destination,
                        "link entries are not allowed",
                        summary.entries,
                    ));
                }
                _ => {}
            }

            let relative = sanitize_path(&raw_path).map_err(|reason| {
                Error::unsafe_path(&raw_path, destination, reason, summary.entries)
            })?;
            if relative.as_os_str().is_empty() {
                trace!(path = %raw_path, "Skipping root entry");
                continue;
            }
            if let Some(link) = find_symlink(destination, &relative).map_err(|e| {
                Error::extract(
                    Some(raw_path.clone()),
                    destination,
                    summary.entries,
                    "failed to inspect destination",
                    Some(e),
                )
            })? {
                return Err(Error::unsafe_path(
                    raw_path,
                    destination,
                    format!("'{}' is a symbolic link", link.display()),
                    summary.entries,
                ));
            }

            let target = destination.join(&relative);
            let mode = entry.header().mode().ok();
            let fail = |message: &str, source: io::Error, written: usize| {
                Error::extract(
                    Some(raw_path.clone()),
                    destination,
                    written,
                    message,
                    Some(source),
                )
            };

            match entry_type {
                EntryType::Directory => {
                    if target.is_file() {
                        return Err(Error::extract(
                            Some(raw_path.clone()),
                            destination,
                            summary.entries,
                            "a file already exists where a directory is expected",
                            None,
                        ));
                    }
                    fs::create_dir_all(&target)
                        .map_err(|e| fail("failed to create directory", e, summary.entries))?;
                    trace!(path = %raw_path, "Created directory");
                    directories.push((target, mode.unwrap_or(DEFAULT_DIR_MODE)));
                }
                EntryType::Regular | EntryType::Continuous => {
                    let size = entry.header().size().unwrap_or(0);
                    if let Some(limit) = self.options.max_size {
                        if summary.bytes.saturating_add(size) > limit {
                            return Err(Error::extract(
                                Some(raw_path.clone()),
                                destination,
                                summary.entries,
                                format!(
                                    "archive exceeds the maximum extracted size of {limit} bytes"
                                ),
                                None,
                            ));
                        }
                    }
                    if target.is_dir() {
                        return Err(Error::extract(
                            Some(raw_path.clone()),
                            destination,
                            summary.entries,
                            "a directory already exists where a file is expected",
                            None,
                        ));
                    }
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).map_err(|e| {
                            fail("failed to create parent directory", e, summary.entries)
                        })?;
                    }
                    // A read-only file from an earlier pull cannot be opened
                    // for writing, so replace it instead
                    if target.is_file() {
                        fs::remove_file(&target).map_err(|e| {
                            fail("failed to replace existing file", e, summary.entries)
                        })?;
                    }

                    let mut file = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(&target)
                        .map_err(|e| fail("failed to create file", e, summary.entries))?;
                    let mut reader = CancellableReader::new(&mut entry, token);
                    let written = io::copy(&mut reader, &mut file).map_err(|e| {
                        if token.is_cancelled() {
                            Error::cancelled("extract")
                        } else {
                            fail("failed to write file", e, summary.entries)
                        }
                    })?;
                    drop(file);

                    set_mode(&target, mode.unwrap_or(DEFAULT_FILE_MODE))
                        .map_err(|e| fail("failed to set permissions", e, summary.entries))?;
                    summary.bytes += written;
                    trace!(path = %raw_path, bytes = written, "Wrote file");
                }
                other => {
                    warn!(path = %raw_path, entry_type = ?other, "Skipping unsupported entry type");
                    continue;
                }
            }
            summary.entries += 1;
        }

        // Deepest first, so restrictive parents don't block their children
        for (path, mode) in directories.iter().rev() {
            set_mode(path, *mode).map_err(|e| {
                Error::extract(
                    Some(path.display().to_string()),
                    destination,
                    summary.entries,
                    "failed to set directory permissions",
                    Some(e),
                )
            })?;
        }

        debug!(
            destination = %destination.display(),
            entries = summary.entries,
            bytes = summary.bytes,
            "Extracted archive"
        );
        Ok(summary)
    }
}

/// Normalize an archive entry path to a relative path, or explain why it is
/// unsafe. `.` components are dropped.
fn sanitize_path(raw: &str) -> std::result::Result<PathBuf, String> {
    let mut relative = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err("path contains a parent directory component".to_string());
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err("path is absolute".to_string());
            }
        }
    }
    Ok(relative)
}

/// Return the first existing symbolic link on the way from `root` to
/// `root/relative`, if any.
fn find_symlink(root: &Path, relative: &Path) -> io::Result<Option<PathBuf>> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => return Ok(Some(current)),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    if path.is_file() {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_readonly(mode & 0o200 == 0);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::Header;
    use tempfile::TempDir;

    enum Item<'a> {
        File(&'a str, &'a [u8], u32),
        Dir(&'a str, u32),
        Symlink(&'a str, &'a str),
        Hardlink(&'a str, &'a str),
    }

    /// Build a tarball with raw header paths, bypassing the tar crate's
    /// own path validation.
    fn tarball(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for item in items {
            let mut header = Header::new_gnu();
            let empty: &[u8] = &[];
            let (path, data, entry_type, mode) = match item {
                Item::File(path, data, mode) => (*path, *data, EntryType::Regular, *mode),
                Item::Dir(path, mode) => (*path, empty, EntryType::Directory, *mode),
                Item::Symlink(path, target) => {
                    header.set_link_name(target).unwrap();
                    (*path, empty, EntryType::Symlink, 0o777)
                }
                Item::Hardlink(path, target) => {
                    header.set_link_name(target).unwrap();
                    (*path, empty, EntryType::Link, 0o644)
                }
            };
            let name = &mut header.as_old_mut().name;
            name.fill(0);
            name[..path.len()].copy_from_slice(path.as_bytes());
            header.set_entry_type(entry_type);
            header.set_mode(mode);
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append(&header, data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn extract(blob: &[u8], destination: &Path) -> Result<ExtractSummary> {
        Extractor::default().extract(blob, destination, &CancellationToken::new())
    }

    #[test]
    fn test_extracts_files_and_directories() {
        let blob = tarball(&[
            Item::File("a.txt", b"alpha", 0o644),
            Item::Dir("sub", 0o755),
            Item::File("sub/b.txt", b"beta", 0o644),
        ]);
        let temp = TempDir::new().unwrap();
        let summary = extract(&blob, temp.path()).unwrap();

        assert_eq!(summary, ExtractSummary { entries: 3, bytes: 9 });
        assert_eq!(fs::read(temp.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(temp.path().join("sub/b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn test_creates_missing_destination_and_parents() {
        let blob = tarball(&[Item::File("deep/nested/file.txt", b"x", 0o644)]);
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("out");
        extract(&blob, &destination).unwrap();
        assert!(destination.join("deep/nested/file.txt").is_file());
    }

    #[test]
    fn test_overwrites_existing_and_keeps_unrelated_files() {
        let blob = tarball(&[Item::File("a.txt", b"new", 0o644)]);
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), b"old content").unwrap();
        fs::write(temp.path().join("other.txt"), b"keep").unwrap();

        extract(&blob, temp.path()).unwrap();
        assert_eq!(fs::read(temp.path().join("a.txt")).unwrap(), b"new");
        assert_eq!(fs::read(temp.path().join("other.txt")).unwrap(), b"keep");
    }

    #[test]
    fn test_dot_components_are_normalized() {
        let blob = tarball(&[Item::Dir("./", 0o755), Item::File("./sub/./b.txt", b"b", 0o644)]);
        let temp = TempDir::new().unwrap();
        let summary = extract(&blob, temp.path()).unwrap();
        assert_eq!(summary.entries, 1);
        assert!(temp.path().join("sub/b.txt").is_file());
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let blob = tarball(&[
            Item::File("ok.txt", b"ok", 0o644),
            Item::File("../escape.txt", b"evil", 0o644),
        ]);
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("out");

        match extract(&blob, &destination) {
            Err(Error::UnsafePath {
                path,
                entries_written,
                ..
            }) => {
                assert_eq!(path, "../escape.txt");
                assert_eq!(entries_written, 1);
            }
            other => panic!("expected unsafe path, got {other:?}"),
        }
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_rejects_embedded_traversal() {
        let blob = tarball(&[Item::File("sub/../../escape.txt", b"evil", 0o644)]);
        let temp = TempDir::new().unwrap();
        let result = extract(&blob, &temp.path().join("out"));
        assert!(matches!(result, Err(Error::UnsafePath { .. })));
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_rejects_absolute_path() {
        let blob = tarball(&[Item::File("/tmp/dirpack-absolute.txt", b"evil", 0o644)]);
        let temp = TempDir::new().unwrap();
        match extract(&blob, temp.path()) {
            Err(Error::UnsafePath { reason, .. }) => assert!(reason.contains("absolute")),
            other => panic!("expected unsafe path, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_link_entries() {
        let temp = TempDir::new().unwrap();

        let blob = tarball(&[Item::Symlink("link", "../outside")]);
        assert!(matches!(
            extract(&blob, temp.path()),
            Err(Error::UnsafePath { .. })
        ));

        let blob = tarball(&[Item::Hardlink("link", "a.txt")]);
        assert!(matches!(
            extract(&blob, temp.path()),
            Err(Error::UnsafePath { .. })
        ));
        assert!(!temp.path().join("link").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_existing_symlinked_directory() {
        let outside = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("sub")).unwrap();

        let blob = tarball(&[Item::File("sub/escape.txt", b"evil", 0o644)]);
        match extract(&blob, temp.path()) {
            Err(Error::UnsafePath { reason, .. }) => assert!(reason.contains("symbolic link")),
            other => panic!("expected unsafe path, got {other:?}"),
        }
        assert!(!outside.path().join("escape.txt").exists());
    }

    #[test]
    fn test_size_limit() {
        let blob = tarball(&[
            Item::File("a.bin", &[0u8; 600], 0o644),
            Item::File("b.bin", &[0u8; 600], 0o644),
        ]);
        let temp = TempDir::new().unwrap();
        let extractor = Extractor::new(ExtractOptions {
            max_size: Some(1000),
        });

        match extractor.extract(blob.as_slice(), temp.path(), &CancellationToken::new()) {
            Err(Error::Extract {
                path,
                entries_written,
                message,
                ..
            }) => {
                assert_eq!(path.as_deref(), Some("b.bin"));
                assert_eq!(entries_written, 1);
                assert!(message.contains("maximum extracted size"));
            }
            other => panic!("expected extract error, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_gzip() {
        let temp = TempDir::new().unwrap();
        let result = extract(b"definitely not gzip", temp.path());
        assert!(matches!(result, Err(Error::Extract { .. })));
    }

    #[test]
    fn test_cancelled() {
        let blob = tarball(&[Item::File("a.txt", b"alpha", 0o644)]);
        let temp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = Extractor::default().extract(blob.as_slice(), temp.path(), &token);
        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert!(!temp.path().join("a.txt").exists());
    }

    /// Reader that cancels `token` once `after` bytes have been handed out.
    struct CancelAfter<'a> {
        inner: &'a [u8],
        token: CancellationToken,
        after: usize,
        read: usize,
    }

    impl Read for CancelAfter<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read += n;
            if self.read >= self.after {
                self.token.cancel();
            }
            Ok(n)
        }
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state.to_le_bytes()[0]
            })
            .collect()
    }

    #[test]
    fn test_cancelled_while_writing_file() {
        let large = noise(1024 * 1024);
        let blob = tarball(&[
            Item::File("a.bin", &large, 0o644),
            Item::File("b.txt", b"never", 0o644),
        ]);
        let temp = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let reader = CancelAfter {
            inner: &blob,
            token: token.clone(),
            after: 16 * 1024,
            read: 0,
        };

        let result = Extractor::default().extract(reader, temp.path(), &token);
        assert!(matches!(result, Err(Error::Cancelled { .. })));
        let written = fs::metadata(temp.path().join("a.bin")).map_or(0, |m| m.len());
        assert!(written < large.len() as u64);
        assert!(!temp.path().join("b.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_replaces_read_only_file() {
        let temp = TempDir::new().unwrap();
        extract(&tarball(&[Item::File("ro.txt", b"first", 0o444)]), temp.path()).unwrap();
        extract(&tarball(&[Item::File("ro.txt", b"second", 0o444)]), temp.path()).unwrap();
        assert_eq!(fs::read(temp.path().join("ro.txt")).unwrap(), b"second");
    }

    #[cfg(unix)]
    #[test]
    fn test_preserves_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let blob = tarball(&[
            Item::Dir("bin", 0o750),
            Item::File("bin/run.sh", b"#!/bin/sh\n", 0o4755),
        ]);
        let temp = TempDir::new().unwrap();
        extract(&blob, temp.path()).unwrap();

        let file_mode = fs::metadata(temp.path().join("bin/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o7777, 0o755);
        let dir_mode = fs::metadata(temp.path().join("bin")).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o7777, 0o750);
    }
}
