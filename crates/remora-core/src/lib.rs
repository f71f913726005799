//! Shared model for the remote resource access engine.

pub mod client;
pub mod credentials;
pub mod error;
pub mod media;
pub mod progress;
pub mod types;
pub mod uri;

pub use client::{DownloadSink, ProtocolClient, RemoteFs, UploadSource};
pub use credentials::ResolvedCredentials;
pub use error::{EngineError, EngineResult, ErrorCategory, ErrorKind};
pub use media::{ExtensionSet, MediaType};
pub use progress::{progress_channel, ProgressSink, ProgressStream, TransferProgress};
pub use types::{
    ConnectionDescriptor, MediaFile, OpContext, Priority, Protocol, RemoteFileInfo, Scheme,
};
pub use uri::{RemoteLocation, ResourceUri};

pub use tokio_util::sync::CancellationToken;
