//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dirpack_engine::{ArtifactReference, Digest, PushRequest, RegistryTransport, TransportError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use walkdir::WalkDir;

#[derive(Default)]
struct RegistryState {
    blobs: HashMap<Digest, Vec<u8>>,
    manifests: HashMap<(String, Digest), Vec<u8>>,
    tags: HashMap<String, BTreeMap<String, Digest>>,
}

/// Content-addressed registry held in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
    pushes: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed manifest pushes.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Tags currently recorded for `host/repository`.
    pub fn tags(&self, repository_url: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tags
            .get(repository_url)
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw manifest bytes behind a tagged reference.
    pub fn manifest_bytes(&self, reference: &str) -> Option<Vec<u8>> {
        let reference = ArtifactReference::parse(reference).ok()?;
        let state = self.state.lock().unwrap();
        let digest = state.tags.get(&reference.repository_url())?.get(reference.tag()?)?;
        state
            .manifests
            .get(&(reference.repository_url(), digest.clone()))
            .cloned()
    }

    /// Store a manifest and tag it without any validation.
    pub fn put_manifest(&self, reference: &str, manifest: Vec<u8>) -> Digest {
        let reference = ArtifactReference::parse(reference).unwrap();
        let digest = Digest::sha256(&manifest);
        let mut state = self.state.lock().unwrap();
        state
            .manifests
            .insert((reference.repository_url(), digest.clone()), manifest);
        state
            .tags
            .entry(reference.repository_url())
            .or_default()
            .insert(reference.tag().unwrap().to_string(), digest.clone());
        digest
    }

    /// Store a blob under an arbitrary digest.
    pub fn put_blob(&self, digest: Digest, data: Vec<u8>) {
        self.state.lock().unwrap().blobs.insert(digest, data);
    }
}

#[async_trait]
impl RegistryTransport for MemoryRegistry {
    async fn push(
        &self,
        reference: &ArtifactReference,
        request: PushRequest,
    ) -> Result<Digest, TransportError> {
        let tag = reference
            .tag()
            .ok_or_else(|| TransportError::new("push manifest", "reference has no tag"))?
            .to_string();

        let mut state = self.state.lock().unwrap();
        for blob in std::iter::once(request.config).chain(request.layers) {
            if Digest::sha256(&blob.data) != blob.digest {
                return Err(TransportError::new("push blob", "digest does not match content"));
            }
            state.blobs.insert(blob.digest, blob.data);
        }

        let digest = Digest::sha256(&request.manifest);
        state
            .manifests
            .insert((reference.repository_url(), digest.clone()), request.manifest);
        state
            .tags
            .entry(reference.repository_url())
            .or_default()
            .insert(tag, digest.clone());
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(digest)
    }

    async fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
    ) -> Result<(Vec<u8>, Digest), TransportError> {
        let state = self.state.lock().unwrap();
        let repository = reference.repository_url();
        let digest = match (reference.digest(), reference.tag()) {
            (Some(digest), _) => digest.clone(),
            (None, Some(tag)) => state
                .tags
                .get(&repository)
                .and_then(|tags| tags.get(tag))
                .cloned()
                .ok_or_else(|| TransportError::new("pull manifest", "manifest unknown"))?,
            (None, None) => return Err(TransportError::new("pull manifest", "no tag or digest")),
        };
        let manifest = state
            .manifests
            .get(&(repository, digest.clone()))
            .cloned()
            .ok_or_else(|| TransportError::new("pull manifest", "manifest unknown"))?;
        Ok((manifest, digest))
    }

    async fn fetch_blob(
        &self,
        _reference: &ArtifactReference,
        digest: &Digest,
    ) -> Result<Vec<u8>, TransportError> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| TransportError::new("pull blob", "blob unknown"))
    }

    async fn list_tags(
        &self,
        reference: &ArtifactReference,
    ) -> Result<Vec<String>, TransportError> {
        Ok(self.tags(&reference.repository_url()))
    }
}

/// Transport whose calls never complete.
pub struct StalledRegistry;

#[async_trait]
impl RegistryTransport for StalledRegistry {
    async fn push(
        &self,
        _reference: &ArtifactReference,
        _request: PushRequest,
    ) -> Result<Digest, TransportError> {
        std::future::pending().await
    }

    async fn fetch_manifest(
        &self,
        _reference: &ArtifactReference,
    ) -> Result<(Vec<u8>, Digest), TransportError> {
        std::future::pending().await
    }

    async fn fetch_blob(
        &self,
        _reference: &ArtifactReference,
        _digest: &Digest,
    ) -> Result<Vec<u8>, TransportError> {
        std::future::pending().await
    }

    async fn list_tags(
        &self,
        _reference: &ArtifactReference,
    ) -> Result<Vec<String>, TransportError> {
        std::future::pending().await
    }
}

/// Transport whose calls always fail.
pub struct UnreachableRegistry;

#[async_trait]
impl RegistryTransport for UnreachableRegistry {
    async fn push(
        &self,
        _reference: &ArtifactReference,
        _request: PushRequest,
    ) -> Result<Digest, TransportError> {
        Err(TransportError::new("push manifest", "connection refused"))
    }

    async fn fetch_manifest(
        &self,
        _reference: &ArtifactReference,
    ) -> Result<(Vec<u8>, Digest), TransportError> {
        Err(TransportError::new("pull manifest", "connection refused"))
    }

    async fn fetch_blob(
        &self,
        _reference: &ArtifactReference,
        _digest: &Digest,
    ) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::new("pull blob", "connection refused"))
    }

    async fn list_tags(
        &self,
        _reference: &ArtifactReference,
    ) -> Result<Vec<String>, TransportError> {
        Err(TransportError::new("list tags", "connection refused"))
    }
}

/// Write files (creating parents) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (path, content) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Snapshot of a directory tree: file contents and the set of directories.
#[derive(Debug, PartialEq, Eq)]
pub struct TreeSnapshot {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
}

/// Capture every file and directory under `root`, keyed by relative path.
pub fn snapshot(root: &Path) -> TreeSnapshot {
    let mut files = BTreeMap::new();
    let mut dirs = BTreeSet::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            dirs.insert(relative);
        } else {
            files.insert(relative, fs::read(entry.path()).unwrap());
        }
    }
    TreeSnapshot { files, dirs }
}

/// Path to the checked-in sample artifact.
pub fn testdata_artifact() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/testdata/artifact")
}
