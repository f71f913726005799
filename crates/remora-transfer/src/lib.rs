//! # remora-transfer
//!
//! Moving bytes between resources:
//! - `cache`: the unified local file cache and transfer staging files
//! - `local`: `file://` resources as a [`remora_core::RemoteFs`]
//! - `strategy`: copy/move strategies and the registry that picks one

pub mod cache;
pub mod local;
pub mod strategy;

pub use cache::{PartFile, StagingFile, UnifiedFileCache};
pub use local::LocalFs;
pub use strategy::{
    FsTable, LocalTransfer, SameProtocolTransfer, StagedTransfer, TransferJob, TransferMode,
    TransferRegistry, TransferStrategy,
};
