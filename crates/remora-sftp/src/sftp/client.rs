// ── ProtocolClient implementation ────────────────────────────────────────────

use crate::sftp::session::SftpSession;
use crate::sftp::types::SftpConfig;
use async_trait::async_trait;
use remora_core::{
    ConnectionDescriptor, DownloadSink, EngineResult, ProgressSink, Protocol, ProtocolClient,
    RemoteFileInfo, ResolvedCredentials, UploadSource,
};

#[derive(Debug, Clone, Default)]
pub struct SftpClient {
    config: SftpConfig,
}

impl SftpClient {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SftpConfig {
        &self.config
    }
}

#[async_trait]
impl ProtocolClient for SftpClient {
    type Session = SftpSession;

    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<SftpSession> {
        SftpSession::connect(&self.config, descriptor.host(), descriptor.port(), credentials).await
    }

    async fn list(&self, session: &mut SftpSession, path: &str) -> EngineResult<Vec<RemoteFileInfo>> {
        session.list(path).await
    }

    async fn download(
        &self,
        session: &mut SftpSession,
        path: &str,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        session.download(path, sink, progress).await
    }

    async fn upload(
        &self,
        session: &mut SftpSession,
        path: &str,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        session.upload(path, source, size, progress).await
    }

    async fn delete(&self, session: &mut SftpSession, path: &str) -> EngineResult<()> {
        session.delete(path).await
    }

    async fn rename(&self, session: &mut SftpSession, from: &str, to: &str) -> EngineResult<()> {
        session.rename(from, to).await
    }

    async fn mkdir(&self, session: &mut SftpSession, path: &str) -> EngineResult<()> {
        session.mkdir(path).await
    }

    async fn exists(&self, session: &mut SftpSession, path: &str) -> EngineResult<bool> {
        session.exists(path).await
    }

    async fn probe(&self, session: &mut SftpSession) -> bool {
        session.probe().await
    }

    fn is_healthy(&self, session: &SftpSession) -> bool {
        session.is_healthy()
    }

    async fn close(&self, session: SftpSession) {
        session.disconnect().await;
    }
}
