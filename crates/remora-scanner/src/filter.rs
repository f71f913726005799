//! Scan parameters and progress reporting types.

use remora_core::{CancellationToken, ExtensionSet, MediaType, OpContext, Priority};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Which files a scan reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanFilter {
    #[serde(default = "default_media_types")]
    pub media_types: Vec<MediaType>,
    /// Inclusive lower bound in bytes.
    #[serde(default)]
    pub min_size: Option<u64>,
    /// Inclusive upper bound in bytes.
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default = "default_true")]
    pub scan_subdirectories: bool,
}

fn default_media_types() -> Vec<MediaType> {
    MediaType::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            media_types: default_media_types(),
            min_size: None,
            max_size: None,
            scan_subdirectories: true,
        }
    }
}

impl ScanFilter {
    pub fn types(types: impl IntoIterator<Item = MediaType>) -> Self {
        Self {
            media_types: types.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_size_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn top_level_only(mut self) -> Self {
        self.scan_subdirectories = false;
        self
    }

    pub(crate) fn extension_set(&self) -> ExtensionSet {
        ExtensionSet::new(self.media_types.iter().copied())
    }

    pub(crate) fn size_matches(&self, size: u64) -> bool {
        self.min_size.map_or(true, |min| size >= min) && self.max_size.map_or(true, |max| size <= max)
    }
}

/// Per-call options: operation context, cancellation token and an optional
/// progress channel.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub ctx: OpContext,
    pub cancel: CancellationToken,
    progress: Option<Arc<watch::Sender<ScanProgress>>>,
}

impl ScanOptions {
    /// Background scan (low priority), never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.ctx.priority = priority;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_credential(mut self, id: impl Into<String>) -> Self {
        self.ctx.credential_id = Some(id.into());
        self
    }

    /// Attach a fresh progress channel to these options and return its
    /// receiving end. Clones of the options publish to the same channel.
    pub fn watch_progress(&mut self) -> watch::Receiver<ScanProgress> {
        let (tx, rx) = watch::channel(ScanProgress::default());
        self.progress = Some(Arc::new(tx));
        rx
    }

    pub(crate) fn publish(&self, state: &ScanProgress) {
        if let Some(tx) = &self.progress {
            tx.send_replace(state.clone());
        }
    }
}

/// Snapshot published after every directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub directories_scanned: usize,
    pub files_matched: usize,
    /// Directory most recently listed.
    pub current: Option<String>,
    pub finished: bool,
}
