//! Breadth-first media discovery.
//!
//! Every scan mode drives the same walk: directories are visited in
//! breadth-first order and entries within a directory are sorted by name, so
//! a paged scan sees exactly the sequence a full scan returns. Listings go
//! through the [`RemoteFs`], and therefore through the throttle and pool, at
//! the priority in [`ScanOptions`].
//!
//! Progress goes to the channel attached to the options of each call (see
//! [`ScanOptions::watch_progress`]), so concurrent scans on one scanner never
//! share a progress stream.

use crate::filter::{ScanFilter, ScanOptions, ScanProgress};
use remora_core::{
    EngineError, EngineResult, MediaFile, MediaType, RemoteFileInfo, RemoteFs, ResourceUri,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Result of [`MediaScanner::scan_chunked`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedScan {
    pub files: Vec<MediaFile>,
    /// `false` when the walk stopped early because more matches exist.
    pub completed: bool,
}

/// Result of [`MediaScanner::scan_page`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanPage {
    pub files: Vec<MediaFile>,
    pub offset: usize,
    /// True iff the page is full.
    pub has_more: bool,
}

/// What the walk does with each entry that matched by type.
enum Mode {
    /// Apply size bounds and hand a [`MediaFile`] to the visitor.
    Build,
    /// Hand `None` to the visitor; no record is built.
    Count,
}

pub struct MediaScanner {
    fs: Arc<dyn RemoteFs>,
}

impl MediaScanner {
    pub fn new(fs: Arc<dyn RemoteFs>) -> Self {
        Self { fs }
    }

    /// Every matching file below `root`.
    pub async fn scan(
        &self,
        root: &ResourceUri,
        filter: &ScanFilter,
        opts: &ScanOptions,
    ) -> EngineResult<Vec<MediaFile>> {
        let mut files = Vec::new();
        self.walk(root, filter, opts, Mode::Build, |file| {
            files.extend(file);
            ControlFlow::Continue(())
        })
        .await?;
        log::info!("Scan of {} found {} files", root, files.len());
        Ok(files)
    }

    /// At most `max_files` matches. The walk stops as soon as one more match
    /// is seen, so `completed` is exact.
    pub async fn scan_chunked(
        &self,
        root: &ResourceUri,
        filter: &ScanFilter,
        max_files: usize,
        opts: &ScanOptions,
    ) -> EngineResult<ChunkedScan> {
        let mut files = Vec::new();
        let completed = self
            .walk(root, filter, opts, Mode::Build, |file| {
                if files.len() == max_files {
                    return ControlFlow::Break(());
                }
                files.extend(file);
                ControlFlow::Continue(())
            })
            .await?;
        Ok(ChunkedScan { files, completed })
    }

    /// Matches `offset .. offset + limit` of the full scan order.
    pub async fn scan_page(
        &self,
        root: &ResourceUri,
        filter: &ScanFilter,
        offset: usize,
        limit: usize,
        opts: &ScanOptions,
    ) -> EngineResult<ScanPage> {
        if limit == 0 {
            return Err(EngineError::invalid_input("page limit must be at least 1"));
        }
        let mut skipped = 0usize;
        let mut files = Vec::with_capacity(limit.min(1024));
        self.walk(root, filter, opts, Mode::Build, |file| {
            if skipped < offset {
                skipped += 1;
                return ControlFlow::Continue(());
            }
            files.extend(file);
            if files.len() == limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await?;
        let has_more = files.len() == limit;
        Ok(ScanPage {
            files,
            offset,
            has_more,
        })
    }

    /// Number of files whose type matches. Size bounds are ignored.
    pub async fn count(
        &self,
        root: &ResourceUri,
        filter: &ScanFilter,
        opts: &ScanOptions,
    ) -> EngineResult<usize> {
        let mut count = 0usize;
        self.walk(root, filter, opts, Mode::Count, |_| {
            count += 1;
            ControlFlow::Continue(())
        })
        .await?;
        Ok(count)
    }

    /// Returns `true` when every directory was visited, `false` when `visit`
    /// stopped the walk.
    async fn walk<F>(
        &self,
        root: &ResourceUri,
        filter: &ScanFilter,
        opts: &ScanOptions,
        mode: Mode,
        mut visit: F,
    ) -> EngineResult<bool>
    where
        F: FnMut(Option<MediaFile>) -> ControlFlow<()>,
    {
        let extensions = filter.extension_set();
        let mut state = ScanProgress::default();
        opts.publish(&state);
        if extensions.is_empty() {
            state.finished = true;
            opts.publish(&state);
            return Ok(true);
        }

        let mut queue = VecDeque::from([root.clone()]);
        while let Some(dir) = queue.pop_front() {
            if opts.cancel.is_cancelled() {
                log::info!("Scan of {} cancelled after {} directories", root, state.directories_scanned);
                return Err(EngineError::cancelled(format!("scan of {} cancelled", root)));
            }

            let mut entries = match self.fs.list(&dir, &opts.ctx).await {
                Ok(entries) => entries,
                Err(e) if &dir == root => return Err(e),
                Err(e) => {
                    log::warn!("Skipping {} during scan: {}", dir, e);
                    continue;
                }
            };
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            state.directories_scanned += 1;
            state.current = Some(dir.to_string());

            for entry in entries {
                if entry.is_directory {
                    if filter.scan_subdirectories {
                        queue.push_back(dir.join(&entry.name)?);
                    }
                    continue;
                }
                let Some(media_type) = extensions.classify(&entry.name) else {
                    continue;
                };
                let file = match mode {
                    Mode::Count => None,
                    Mode::Build if !filter.size_matches(entry.size) => continue,
                    Mode::Build => Some(media_file(&dir, entry, media_type)?),
                };
                if visit(file).is_break() {
                    opts.publish(&state);
                    return Ok(false);
                }
                state.files_matched += 1;
            }
            opts.publish(&state);
        }

        state.finished = true;
        opts.publish(&state);
        Ok(true)
    }
}

fn media_file(dir: &ResourceUri, entry: RemoteFileInfo, media_type: MediaType) -> EngineResult<MediaFile> {
    let uri = dir.join(&entry.name)?;
    Ok(MediaFile {
        name: entry.name,
        path: uri.to_string(),
        size: entry.size,
        created_date: entry.last_modified,
        media_type,
    })
}
