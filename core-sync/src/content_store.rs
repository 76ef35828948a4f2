//! # Content-Addressed Storage
//!
//! Files are stored once per SHA-256 digest under the storage root:
//!
//! ```text
//! <root>/
//!   .staging/<uuid>.part        in-flight downloads
//!   3f/3fa8...c1.jpg            committed content, sharded by hash prefix
//! ```
//!
//! Downloads are streamed into a staging file while being hashed, flushed to
//! disk and then renamed into place. An MD5 is computed in the same pass so
//! the bytes can be checked against the digest the remote declares. A rename
//! within one filesystem is atomic, so a committed path never holds partial
//! content.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

pub const STAGING_DIR: &str = ".staging";
const STAGING_SUFFIX: &str = "part";
const FALLBACK_EXTENSION: &str = "bin";
const READ_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Hashing
// ============================================================================

/// Incremental SHA-256 producing lowercase hex digests.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher(Sha256);

impl ContentHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finalize_hex(self) -> String {
        format!("{:x}", self.0.finalize())
    }
}

/// Digest of an in-memory buffer.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// File extension for stored content.
///
/// Taken from the display name when it has a plausible one, otherwise guessed
/// from the content type, otherwise `bin`.
pub fn extension_for(display_name: &str, content_type: Option<&str>) -> String {
    let from_name = Path::new(display_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    if let Some(ext) = from_name {
        return ext;
    }

    let from_type = content_type.and_then(|ct| {
        let mime = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
        let ext = match mime.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/heic" | "image/heif" => "heic",
            "image/webp" => "webp",
            "video/mp4" => "mp4",
            "video/quicktime" => "mov",
            "video/x-msvideo" => "avi",
            _ => return None,
        };
        Some(ext.to_string())
    });

    from_type.unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

// ============================================================================
// Staging
// ============================================================================

/// A download in progress.
pub struct StagingFile {
    path: PathBuf,
    file: File,
    hasher: ContentHasher,
    md5: Md5,
    bytes_written: u64,
}

impl StagingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.md5.update(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flush to stable storage and close.
    ///
    /// The staging file is removed if the flush fails.
    pub async fn finish(mut self) -> io::Result<StagedContent> {
        let flushed = async {
            self.file.flush().await?;
            self.file.sync_all().await
        }
        .await;

        if let Err(e) = flushed {
            drop(self.file);
            remove_quietly(&self.path).await;
            return Err(e);
        }

        Ok(StagedContent {
            path: self.path,
            content_hash: self.hasher.finalize_hex(),
            md5: format!("{:x}", self.md5.finalize()),
            byte_size: self.bytes_written,
        })
    }
}

/// Fully written staging file with its streaming digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedContent {
    pub path: PathBuf,
    pub content_hash: String,
    /// Lowercase hex MD5 of the same bytes
    pub md5: String,
    pub byte_size: u64,
}

/// Files and bytes under the content tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiskUsage {
    pub files: u64,
    pub bytes: u64,
}

// ============================================================================
// Content Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    staging: PathBuf,
}

impl ContentStore {
    /// Open the store, creating the root and staging directories.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        Ok(Self { root, staging })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a content file relative to the root.
    pub fn relative_path(content_hash: &str, extension: &str) -> String {
        let shard = content_hash.get(..2).unwrap_or(content_hash);
        format!("{}/{}.{}", shard, content_hash, extension)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub async fn create_staging(&self) -> io::Result<StagingFile> {
        let path = self
            .staging
            .join(format!("{}.{}", Uuid::new_v4(), STAGING_SUFFIX));
        let file = File::create(&path).await?;

        Ok(StagingFile {
            path,
            file,
            hasher: ContentHasher::new(),
            md5: Md5::new(),
            bytes_written: 0,
        })
    }

    /// Move staged content to its content-addressed path.
    ///
    /// Returns the path relative to the root. An existing file at that path
    /// holds the same digest and is replaced.
    pub async fn promote(&self, staged: &StagedContent, extension: &str) -> io::Result<String> {
        let relative = Self::relative_path(&staged.content_hash, extension);
        let target = self.resolve(&relative);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&staged.path, &target).await?;

        debug!(
            content_hash = %staged.content_hash,
            path = %relative,
            bytes = staged.byte_size,
            "Promoted staged content"
        );

        Ok(relative)
    }

    /// Remove a staging file that will not be committed.
    pub async fn discard(&self, staged: &Path) {
        remove_quietly(staged).await;
    }

    /// Remove a committed file that lost a race for canonical ownership.
    pub async fn remove_redundant(&self, relative: &str) {
        remove_quietly(&self.resolve(relative)).await;
    }

    /// Delete leftovers of interrupted downloads.
    pub async fn clear_staging(&self) -> io::Result<u64> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Cleared stale staging files");
        }
        Ok(removed)
    }

    /// Stream a file through SHA-256.
    pub async fn hash_file(path: &Path) -> io::Result<(String, u64)> {
        let mut file = File::open(path).await?;
        let mut hasher = ContentHasher::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        Ok((hasher.finalize_hex(), total))
    }

    /// Find the stored file for a digest, whatever its extension.
    pub async fn locate(&self, content_hash: &str) -> io::Result<Option<PathBuf>> {
        let Some(shard) = content_hash.get(..2) else {
            return Ok(None);
        };

        let mut entries = match fs::read_dir(self.root.join(shard)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let stem_matches = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem == content_hash);
            if stem_matches {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Count committed files and their bytes, excluding staging.
    pub async fn disk_usage(&self) -> io::Result<DiskUsage> {
        let mut usage = DiskUsage::default();
        let mut shards = fs::read_dir(&self.root).await?;

        while let Some(shard) = shards.next_entry().await? {
            if shard.file_name() == STAGING_DIR || !shard.file_type().await?.is_dir() {
                continue;
            }

            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let metadata = file.metadata().await?;
                if metadata.is_file() {
                    usage.files += 1;
                    usage.bytes += metadata.len();
                }
            }
        }

        Ok(usage)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        assert_eq!(hash_bytes(b"hello"), HELLO_SHA256);
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("IMG_0001.JPG", None), "jpg");
        assert_eq!(extension_for("clip", Some("video/quicktime")), "mov");
        assert_eq!(extension_for("photo.", Some("image/png; q=1")), "png");
        assert_eq!(extension_for("weird.ex t", None), "bin");
        assert_eq!(extension_for("noext", Some("application/x-foo")), "bin");
    }

    #[test]
    fn test_relative_path_is_sharded() {
        assert_eq!(
            ContentStore::relative_path(HELLO_SHA256, "txt"),
            format!("2c/{}.txt", HELLO_SHA256)
        );
    }

    #[tokio::test]
    async fn test_stage_promote_and_locate() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let mut staging = store.create_staging().await.unwrap();
        staging.write_chunk(b"hel").await.unwrap();
        staging.write_chunk(b"lo").await.unwrap();
        let staged = staging.finish().await.unwrap();

        assert_eq!(staged.content_hash, HELLO_SHA256);
        assert_eq!(staged.md5, HELLO_MD5);
        assert_eq!(staged.byte_size, 5);

        let relative = store.promote(&staged, "txt").await.unwrap();
        assert!(!staged.path.exists());
        assert_eq!(
            fs::read(store.resolve(&relative)).await.unwrap(),
            b"hello".to_vec()
        );

        let located = store.locate(HELLO_SHA256).await.unwrap().unwrap();
        assert_eq!(located, store.resolve(&relative));
        assert!(store.locate(&"ff".repeat(32)).await.unwrap().is_none());

        let (rehash, size) = ContentStore::hash_file(&located).await.unwrap();
        assert_eq!((rehash.as_str(), size), (HELLO_SHA256, 5));
    }

    #[tokio::test]
    async fn test_disk_usage_skips_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let mut committed = store.create_staging().await.unwrap();
        committed.write_chunk(b"hello").await.unwrap();
        let committed = committed.finish().await.unwrap();
        store.promote(&committed, "txt").await.unwrap();

        let mut pending = store.create_staging().await.unwrap();
        pending.write_chunk(b"partial download").await.unwrap();
        let pending = pending.finish().await.unwrap();

        let usage = store.disk_usage().await.unwrap();
        assert_eq!(usage, DiskUsage { files: 1, bytes: 5 });

        assert_eq!(store.clear_staging().await.unwrap(), 1);
        assert!(!pending.path.exists());
    }

    #[tokio::test]
    async fn test_discard_removes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let mut staging = store.create_staging().await.unwrap();
        staging.write_chunk(b"bytes").await.unwrap();
        let staged = staging.finish().await.unwrap();

        store.discard(&staged.path).await;
        assert!(!staged.path.exists());
        store.discard(&staged.path).await;
    }
}
