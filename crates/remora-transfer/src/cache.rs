//! Local cache for remote files.
//!
//! Layout under the cache root:
//!
//! ```text
//! files/    one file per cached remote key
//! staging/  short-lived transfer staging files
//! ```
//!
//! Cached files are written to `<name>.part` and renamed into place, so a
//! reader never sees a partial file under its final name. Nothing is evicted
//! automatically; [`UnifiedFileCache::clear`] is the only removal path.

use remora_core::{EngineResult, UploadSource};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Longest file name the cache produces.
pub const MAX_NAME_LEN: usize = 120;
const PREFIX_LEN: usize = 40;
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct UnifiedFileCache {
    files: PathBuf,
    staging: PathBuf,
}

impl UnifiedFileCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> EngineResult<Self> {
        let root = root.as_ref();
        let files = root.join("files");
        let staging = root.join("staging");
        std::fs::create_dir_all(&files)?;
        std::fs::create_dir_all(&staging)?;
        let cache = Self { files, staging };
        cache.sweep_staging();
        Ok(cache)
    }

    /// Default location: `<platform cache dir>/remora`.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("remora")
    }

    /// Absolute path a key maps to, whether or not it is cached.
    pub fn path_for(&self, remote_key: &str) -> PathBuf {
        self.files.join(cache_name(remote_key))
    }

    pub async fn is_cached(&self, remote_key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(remote_key))
            .await
            .unwrap_or(false)
    }

    pub async fn cached_path(&self, remote_key: &str) -> Option<PathBuf> {
        let path = self.path_for(remote_key);
        self.is_cached(remote_key).await.then_some(path)
    }

    /// Copy `source` into the cache under `remote_key`, replacing any
    /// previous copy.
    pub async fn cache_file(&self, remote_key: &str, source: UploadSource<'_>) -> EngineResult<PathBuf> {
        let mut part = self.open_part(remote_key).await?;
        tokio::io::copy(source, part.file_mut()).await?;
        part.commit().await
    }

    /// Start writing `remote_key`. The returned [`PartFile`] must be
    /// committed; dropping it discards the partial file.
    pub async fn open_part(&self, remote_key: &str) -> EngineResult<PartFile> {
        let dest = self.path_for(remote_key);
        let mut part_name = dest.as_os_str().to_owned();
        part_name.push(PART_SUFFIX);
        let part = PathBuf::from(part_name);
        let file = tokio::fs::File::create(&part).await?;
        Ok(PartFile {
            file,
            part,
            dest,
            committed: false,
        })
    }

    pub async fn remove(&self, remote_key: &str) -> EngineResult<()> {
        match tokio::fs::remove_file(self.path_for(remote_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every cached file. Staging files of running transfers are left
    /// alone.
    pub async fn clear(&self) -> EngineResult<()> {
        let mut entries = tokio::fs::read_dir(&self.files).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
            removed += 1;
        }
        log::info!("Cleared {} cached files from {}", removed, self.files.display());
        Ok(())
    }

    /// Total size of cached files, in bytes.
    pub async fn size_bytes(&self) -> EngineResult<u64> {
        let mut entries = tokio::fs::read_dir(&self.files).await?;
        let mut total = 0u64;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// A fresh, empty staging file, deleted when the handle drops.
    pub async fn staging_file(&self) -> EngineResult<StagingFile> {
        let path = self
            .staging
            .join(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::File::create(&path).await?;
        Ok(StagingFile { path })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Staging files left behind by a crashed process.
    fn sweep_staging(&self) {
        let Ok(entries) = std::fs::read_dir(&self.staging) else {
            return;
        };
        for entry in entries.flatten() {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                log::warn!("Could not remove stale staging file {}: {}", entry.path().display(), e);
            }
        }
    }
}

/// A cache entry being written.
pub struct PartFile {
    file: tokio::fs::File,
    part: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PartFile {
    pub fn file_mut(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }

    /// Flush and move the file to its final name.
    pub async fn commit(mut self) -> EngineResult<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tokio::fs::rename(&self.part, &self.dest).await?;
        self.committed = true;
        Ok(self.dest.clone())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.part);
        }
    }
}

/// Scratch file for one transfer. Deleted on drop, on every exit path.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Could not remove staging file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// File-system-safe name for a remote key.
///
/// Keys made only of `[A-Za-z0-9._-]` that fit in [`MAX_NAME_LEN`] are used
/// as is. Anything else becomes a readable prefix, the hex SHA-256 of the
/// full key and the original extension, so distinct keys never collide.
pub fn cache_name(remote_key: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if !remote_key.is_empty()
        && remote_key.len() <= MAX_NAME_LEN
        && remote_key.chars().all(safe)
        && !remote_key.starts_with('.')
        && !remote_key.ends_with(PART_SUFFIX)
    {
        return remote_key.to_string();
    }

    let digest = hex::encode(Sha256::digest(remote_key.as_bytes()));
    let last = remote_key.rsplit(['/', '\\']).next().unwrap_or_default();
    let (stem, ext) = match last.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            (stem, format!(".{}", ext.to_ascii_lowercase()))
        }
        _ => (last, String::new()),
    };
    let prefix: String = stem
        .chars()
        .map(|c| if safe(c) && c != '.' { c } else { '_' })
        .take(PREFIX_LEN)
        .collect();
    let name = if prefix.is_empty() {
        format!("{}{}", digest, ext)
    } else {
        format!("{}-{}{}", prefix, digest, ext)
    };
    debug_assert!(name.len() <= MAX_NAME_LEN);
    name
}
