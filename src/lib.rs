//! Remote media access engine.
//!
//! Pooled, throttled access to SMB, SFTP and FTP servers behind one
//! resource-URI based interface, with media scanning, cross-protocol
//! transfers and a local file cache. [`RemoteEngine`] owns every shared
//! component; build one per process and share it.

pub mod clients;
pub mod config;
pub mod engine;
pub mod logging;

pub use clients::RemoteClient;
pub use config::{CredentialsConfig, EngineConfig, LoggingConfig};
pub use engine::RemoteEngine;
pub use logging::init_logging;

pub use remora_core::{
    CancellationToken, EngineError, EngineResult, ErrorCategory, ErrorKind, MediaFile, MediaType,
    OpContext, Priority, ProgressSink, ProgressStream, Protocol, RemoteFileInfo, RemoteFs,
    ResourceUri, TransferProgress,
};
pub use remora_pool::{GateStats, PoolStats};
pub use remora_scanner::{ChunkedScan, MediaScanner, ScanFilter, ScanOptions, ScanPage, ScanProgress};
pub use remora_transfer::{TransferJob, TransferMode};
