//! The closed set of remote clients.
//!
//! Each variant is a protocol driver wired to its own pool, the shared
//! throttle manager and the credential resolver. Callers only see
//! [`RemoteFs`]; nothing outside this module matches on the protocol.

use async_trait::async_trait;
use remora_core::{
    CancellationToken, DownloadSink, EngineResult, OpContext, ProgressSink, Protocol,
    RemoteFileInfo, RemoteFs, ResourceUri, Scheme, UploadSource,
};
use remora_ftp::FtpClient;
use remora_pool::{spawn_maintenance, Endpoint, PoolStats};
use remora_sftp::SftpClient;
use remora_smb::SmbClient;
use tokio::task::JoinHandle;

pub enum RemoteClient {
    Smb(Endpoint<SmbClient>),
    Sftp(Endpoint<SftpClient>),
    Ftp(Endpoint<FtpClient>),
}

macro_rules! each {
    ($self:expr, $ep:ident => $body:expr) => {
        match $self {
            RemoteClient::Smb($ep) => $body,
            RemoteClient::Sftp($ep) => $body,
            RemoteClient::Ftp($ep) => $body,
        }
    };
}

impl RemoteClient {
    pub fn protocol(&self) -> Protocol {
        match self {
            RemoteClient::Smb(_) => Protocol::Smb,
            RemoteClient::Sftp(_) => Protocol::Sftp,
            RemoteClient::Ftp(_) => Protocol::Ftp,
        }
    }

    /// Connect, probe and disconnect without touching the pool.
    pub async fn test_connection(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<bool> {
        each!(self, ep => ep.test_connection(uri, ctx).await)
    }

    pub async fn pool_stats(&self) -> PoolStats {
        each!(self, ep => ep.pool().stats().await)
    }

    pub async fn evict_idle(&self) -> usize {
        each!(self, ep => ep.pool().evict_idle().await)
    }

    pub async fn close_all(&self) {
        each!(self, ep => ep.pool().close_all().await)
    }

    /// Periodic idle eviction until `shutdown` is cancelled.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        each!(self, ep => spawn_maintenance(ep.pool().clone(), shutdown))
    }
}

#[async_trait]
impl RemoteFs for RemoteClient {
    fn scheme(&self) -> Scheme {
        self.protocol().scheme()
    }

    async fn list(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<Vec<RemoteFileInfo>> {
        each!(self, ep => ep.list(uri, ctx).await)
    }

    async fn download(
        &self,
        uri: &ResourceUri,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
        ctx: &OpContext,
    ) -> EngineResult<u64> {
        each!(self, ep => ep.download(uri, sink, progress, ctx).await)
    }

    async fn upload(
        &self,
        uri: &ResourceUri,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
        ctx: &OpContext,
    ) -> EngineResult<u64> {
        each!(self, ep => ep.upload(uri, source, size, progress, ctx).await)
    }

    async fn delete(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<()> {
        each!(self, ep => ep.delete(uri, ctx).await)
    }

    async fn rename(&self, from: &ResourceUri, to: &ResourceUri, ctx: &OpContext) -> EngineResult<()> {
        each!(self, ep => ep.rename(from, to, ctx).await)
    }

    async fn mkdir(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<()> {
        each!(self, ep => ep.mkdir(uri, ctx).await)
    }

    async fn exists(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<bool> {
        each!(self, ep => ep.exists(uri, ctx).await)
    }
}
