//! The two filesystem seams of the engine.
//!
//! [`ProtocolClient`] is what each protocol crate implements: raw operations
//! on an already-authenticated session, with paths relative to that session.
//! [`RemoteFs`] is what callers use: URI-addressed operations that hide
//! pooling, throttling and credential resolution.

use crate::credentials::ResolvedCredentials;
use crate::error::EngineResult;
use crate::progress::ProgressSink;
use crate::types::{ConnectionDescriptor, OpContext, Protocol, RemoteFileInfo, Scheme};
use crate::uri::ResourceUri;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte sink for downloads.
pub type DownloadSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);
/// Byte source for uploads.
pub type UploadSource<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// A protocol driver. Paths follow [`crate::RemoteLocation::path`]: relative
/// to the share for SMB, absolute server paths for SFTP and FTP.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// Authenticated connection state.
    type Session: Send + 'static;

    fn protocol(&self) -> Protocol;

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<Self::Session>;

    async fn list(&self, session: &mut Self::Session, path: &str)
        -> EngineResult<Vec<RemoteFileInfo>>;

    /// Stream `path` into `sink`. Returns the number of bytes written.
    async fn download(
        &self,
        session: &mut Self::Session,
        path: &str,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64>;

    /// Stream `source` to `path`, replacing any existing file. `size` is only
    /// used for progress reporting.
    async fn upload(
        &self,
        session: &mut Self::Session,
        path: &str,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64>;

    async fn delete(&self, session: &mut Self::Session, path: &str) -> EngineResult<()>;

    async fn rename(&self, session: &mut Self::Session, from: &str, to: &str) -> EngineResult<()>;

    async fn mkdir(&self, session: &mut Self::Session, path: &str) -> EngineResult<()>;

    async fn exists(&self, session: &mut Self::Session, path: &str) -> EngineResult<bool>;

    /// Cheap liveness round trip.
    async fn probe(&self, session: &mut Self::Session) -> bool;

    /// Local health flag; `false` once a failure left the session in an
    /// unknown state.
    fn is_healthy(&self, _session: &Self::Session) -> bool {
        true
    }

    async fn close(&self, session: Self::Session);

    /// Connect, probe, and close immediately.
    async fn test_connection(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<bool> {
        let mut session = self.connect(descriptor, credentials).await?;
        let alive = self.probe(&mut session).await;
        self.close(session).await;
        Ok(alive)
    }
}

/// URI-addressed file operations.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    fn scheme(&self) -> Scheme;

    async fn list(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<Vec<RemoteFileInfo>>;

    async fn download(
        &self,
        uri: &ResourceUri,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
        ctx: &OpContext,
    ) -> EngineResult<u64>;

    async fn upload(
        &self,
        uri: &ResourceUri,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
        ctx: &OpContext,
    ) -> EngineResult<u64>;

    async fn delete(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<()>;

    async fn rename(&self, from: &ResourceUri, to: &ResourceUri, ctx: &OpContext)
        -> EngineResult<()>;

    async fn mkdir(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<()>;

    async fn exists(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<bool>;
}
