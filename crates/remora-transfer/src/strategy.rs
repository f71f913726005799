//! Copy and move between any two addressable resources.
//!
//! A [`TransferRegistry`] holds strategies with disjoint
//! `(source scheme, destination scheme)` coverage and dispatches each job to
//! the one that claims its pair:
//!
//! | strategy | pairs |
//! |---|---|
//! | [`LocalTransfer`] | file → file |
//! | [`SameProtocolTransfer`] | smb → smb, sftp → sftp, ftp → ftp |
//! | [`StagedTransfer`] | every pair with different schemes |
//!
//! Remote bytes always pass through a staging file in the
//! [`UnifiedFileCache`]: a pooled session cannot serve a download and an
//! upload at the same time.

use crate::cache::UnifiedFileCache;
use crate::local::LocalFs;
use async_trait::async_trait;
use remora_core::{
    CancellationToken, EngineError, EngineResult, OpContext, Priority, ProgressSink, RemoteFs,
    ResourceUri, Scheme,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferMode {
    #[default]
    Copy,
    /// Copy, then delete the source (or rename in place where possible).
    Move,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        })
    }
}

/// One copy or move request. Borrowed by the engine for the duration of the
/// call only.
pub struct TransferJob<'a> {
    pub source: ResourceUri,
    pub dest: ResourceUri,
    pub overwrite: bool,
    pub mode: TransferMode,
    pub source_credential_id: Option<String>,
    pub dest_credential_id: Option<String>,
    pub priority: Priority,
    pub progress: Option<&'a ProgressSink>,
    pub cancel: CancellationToken,
}

impl<'a> TransferJob<'a> {
    pub fn copy(source: ResourceUri, dest: ResourceUri) -> Self {
        Self {
            source,
            dest,
            overwrite: false,
            mode: TransferMode::Copy,
            source_credential_id: None,
            dest_credential_id: None,
            priority: Priority::High,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn moving(source: ResourceUri, dest: ResourceUri) -> Self {
        Self {
            mode: TransferMode::Move,
            ..Self::copy(source, dest)
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_credentials(mut self, source: Option<String>, dest: Option<String>) -> Self {
        self.source_credential_id = source;
        self.dest_credential_id = dest;
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    fn source_ctx(&self) -> OpContext {
        OpContext {
            priority: self.priority,
            credential_id: self.source_credential_id.clone(),
        }
    }

    fn dest_ctx(&self) -> OpContext {
        OpContext {
            priority: self.priority,
            credential_id: self.dest_credential_id.clone(),
        }
    }

    fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::cancelled(format!(
                "{} {} -> {} cancelled",
                self.mode, self.source, self.dest
            )));
        }
        Ok(())
    }
}

/// Filesystems by scheme.
#[derive(Clone, Default)]
pub struct FsTable {
    map: HashMap<Scheme, Arc<dyn RemoteFs>>,
}

impl FsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fs` under its own scheme, replacing any previous entry.
    pub fn insert(&mut self, fs: Arc<dyn RemoteFs>) {
        self.map.insert(fs.scheme(), fs);
    }

    pub fn get(&self, scheme: Scheme) -> EngineResult<Arc<dyn RemoteFs>> {
        self.map
            .get(&scheme)
            .cloned()
            .ok_or_else(|| EngineError::unsupported(format!("no filesystem for {}://", scheme)))
    }
}

#[async_trait]
pub trait TransferStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, source: Scheme, dest: Scheme) -> bool;

    /// Run the job. `Ok(false)` means there was nothing to do (source and
    /// destination are the same resource).
    async fn transfer(&self, job: &TransferJob<'_>) -> EngineResult<bool>;
}

// ─── Shared steps ────────────────────────────────────────────────────

async fn guard_destination(fs: &dyn RemoteFs, job: &TransferJob<'_>) -> EngineResult<()> {
    if !job.overwrite && fs.exists(&job.dest, &job.dest_ctx()).await? {
        return Err(EngineError::already_exists(format!("{} already exists", job.dest)));
    }
    Ok(())
}

/// Download into a staging file, then upload it. The staging file is
/// removed when this returns, whatever the outcome.
async fn staged_copy(
    source: &dyn RemoteFs,
    dest: &dyn RemoteFs,
    cache: &UnifiedFileCache,
    job: &TransferJob<'_>,
) -> EngineResult<u64> {
    let staging = cache.staging_file().await?;
    {
        let mut file = tokio::fs::File::create(staging.path()).await?;
        source
            .download(&job.source, &mut file, None, &job.source_ctx())
            .await?;
        file.flush().await?;
    }
    job.check_cancelled()?;

    let mut file = tokio::fs::File::open(staging.path()).await?;
    let size = file.metadata().await?.len();
    log::debug!("Staged {} bytes of {} at {}", size, job.source, staging.path().display());
    dest.upload(&job.dest, &mut file, Some(size), job.progress, &job.dest_ctx())
        .await
}

async fn finish_move(source: &dyn RemoteFs, job: &TransferJob<'_>) -> EngineResult<()> {
    if job.mode == TransferMode::Move {
        job.check_cancelled()?;
        source.delete(&job.source, &job.source_ctx()).await?;
    }
    Ok(())
}

// ─── Strategies ──────────────────────────────────────────────────────

/// `file://` to `file://`.
#[derive(Debug, Default)]
pub struct LocalTransfer {
    fs: LocalFs,
}

impl LocalTransfer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStrategy for LocalTransfer {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports(&self, source: Scheme, dest: Scheme) -> bool {
        source == Scheme::File && dest == Scheme::File
    }

    async fn transfer(&self, job: &TransferJob<'_>) -> EngineResult<bool> {
        if job.source == job.dest {
            return Ok(false);
        }
        job.check_cancelled()?;
        guard_destination(&self.fs, job).await?;

        if job.mode == TransferMode::Move {
            if let (Some(src), Some(dst)) = (job.source.as_local(), job.dest.as_local()) {
                match tokio::fs::rename(src, dst).await {
                    Ok(()) => {
                        if let Some(p) = job.progress {
                            let size = tokio::fs::metadata(dst).await.map(|m| m.len()).unwrap_or(0);
                            p.finish(size, Some(size));
                        }
                        return Ok(true);
                    }
                    // Typically a move across devices; fall through to copy + delete.
                    Err(e) => log::debug!("rename {} failed ({}), copying instead", src.display(), e),
                }
            }
        }

        let mut reader = {
            let path = job
                .source
                .as_local()
                .ok_or_else(|| EngineError::invalid_input(format!("{} is not local", job.source)))?;
            tokio::fs::File::open(path).await?
        };
        let size = reader.metadata().await?.len();
        self.fs
            .upload(&job.dest, &mut reader, Some(size), job.progress, &job.dest_ctx())
            .await?;
        drop(reader);
        finish_move(&self.fs, job).await?;
        Ok(true)
    }
}

/// Both ends on the same protocol. A move within one endpoint under one
/// identity is a server-side rename; everything else is staged.
pub struct SameProtocolTransfer {
    fs: Arc<FsTable>,
    cache: Arc<UnifiedFileCache>,
}

impl SameProtocolTransfer {
    pub fn new(fs: Arc<FsTable>, cache: Arc<UnifiedFileCache>) -> Self {
        Self { fs, cache }
    }

    fn can_rename(job: &TransferJob<'_>) -> bool {
        match (job.source.as_remote(), job.dest.as_remote()) {
            (Some(src), Some(dst)) => {
                src.same_endpoint(dst) && job.source_credential_id == job.dest_credential_id
            }
            _ => false,
        }
    }
}

#[async_trait]
impl TransferStrategy for SameProtocolTransfer {
    fn name(&self) -> &'static str {
        "same-protocol"
    }

    fn supports(&self, source: Scheme, dest: Scheme) -> bool {
        source == dest && source.protocol().is_some()
    }

    async fn transfer(&self, job: &TransferJob<'_>) -> EngineResult<bool> {
        if job.source == job.dest {
            return Ok(false);
        }
        let fs = self.fs.get(job.source.scheme())?;
        job.check_cancelled()?;
        guard_destination(fs.as_ref(), job).await?;

        if job.mode == TransferMode::Move && Self::can_rename(job) {
            log::debug!("Server-side rename {} -> {}", job.source, job.dest);
            fs.rename(&job.source, &job.dest, &job.source_ctx()).await?;
            if let Some(p) = job.progress {
                p.finish(0, Some(0));
            }
            return Ok(true);
        }

        staged_copy(fs.as_ref(), fs.as_ref(), &self.cache, job).await?;
        finish_move(fs.as_ref(), job).await?;
        Ok(true)
    }
}

/// Different schemes on either end.
pub struct StagedTransfer {
    fs: Arc<FsTable>,
    cache: Arc<UnifiedFileCache>,
}

impl StagedTransfer {
    pub fn new(fs: Arc<FsTable>, cache: Arc<UnifiedFileCache>) -> Self {
        Self { fs, cache }
    }
}

#[async_trait]
impl TransferStrategy for StagedTransfer {
    fn name(&self) -> &'static str {
        "staged"
    }

    fn supports(&self, source: Scheme, dest: Scheme) -> bool {
        source != dest
    }

    async fn transfer(&self, job: &TransferJob<'_>) -> EngineResult<bool> {
        let source = self.fs.get(job.source.scheme())?;
        let dest = self.fs.get(job.dest.scheme())?;
        job.check_cancelled()?;
        guard_destination(dest.as_ref(), job).await?;
        staged_copy(source.as_ref(), dest.as_ref(), &self.cache, job).await?;
        finish_move(source.as_ref(), job).await?;
        Ok(true)
    }
}

// ─── Registry ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct TransferRegistry {
    strategies: Vec<Arc<dyn TransferStrategy>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local, same-protocol and staged strategies over `fs`.
    pub fn standard(fs: Arc<FsTable>, cache: Arc<UnifiedFileCache>) -> EngineResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalTransfer::new()))?;
        registry.register(Arc::new(SameProtocolTransfer::new(fs.clone(), cache.clone())))?;
        registry.register(Arc::new(StagedTransfer::new(fs, cache)))?;
        Ok(registry)
    }

    /// Add a strategy. Fails if it claims a pair another strategy already
    /// handles.
    pub fn register(&mut self, strategy: Arc<dyn TransferStrategy>) -> EngineResult<()> {
        for existing in &self.strategies {
            for source in Scheme::ALL {
                for dest in Scheme::ALL {
                    if strategy.supports(source, dest) && existing.supports(source, dest) {
                        return Err(EngineError::invalid_input(format!(
                            "transfer strategy '{}' overlaps '{}' on {} -> {}",
                            strategy.name(),
                            existing.name(),
                            source,
                            dest
                        )));
                    }
                }
            }
        }
        self.strategies.push(strategy);
        Ok(())
    }

    pub fn find(&self, source: Scheme, dest: Scheme) -> Option<&Arc<dyn TransferStrategy>> {
        self.strategies.iter().find(|s| s.supports(source, dest))
    }

    pub async fn transfer(&self, job: &TransferJob<'_>) -> EngineResult<bool> {
        let (source, dest) = (job.source.scheme(), job.dest.scheme());
        let strategy = self.find(source, dest).ok_or_else(|| {
            EngineError::unsupported(format!("no transfer strategy for {} -> {}", source, dest))
        })?;
        log::info!(
            "{} {} -> {} via {} strategy",
            job.mode,
            job.source,
            job.dest,
            strategy.name()
        );
        strategy.transfer(job).await
    }
}
