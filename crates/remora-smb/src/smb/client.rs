//! [`ProtocolClient`] implementation over [`SmbSession`].

use crate::smb::session::SmbSession;
use crate::smb::types::SmbConfig;
use async_trait::async_trait;
use remora_core::{
    ConnectionDescriptor, DownloadSink, EngineResult, ProgressSink, Protocol, ProtocolClient,
    RemoteFileInfo, ResolvedCredentials, UploadSource,
};

#[derive(Debug, Clone, Default)]
pub struct SmbClient {
    config: SmbConfig,
}

impl SmbClient {
    pub fn new(config: SmbConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmbConfig {
        &self.config
    }
}

#[async_trait]
impl ProtocolClient for SmbClient {
    type Session = SmbSession;

    fn protocol(&self) -> Protocol {
        Protocol::Smb
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<SmbSession> {
        SmbSession::connect(&self.config, descriptor, credentials).await
    }

    async fn list(&self, session: &mut SmbSession, path: &str) -> EngineResult<Vec<RemoteFileInfo>> {
        session.list(path).await
    }

    async fn download(
        &self,
        session: &mut SmbSession,
        path: &str,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        session.download(path, sink, progress).await
    }

    async fn upload(
        &self,
        session: &mut SmbSession,
        path: &str,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        session.upload(path, source, size, progress).await
    }

    async fn delete(&self, session: &mut SmbSession, path: &str) -> EngineResult<()> {
        session.delete(path).await
    }

    async fn rename(&self, session: &mut SmbSession, from: &str, to: &str) -> EngineResult<()> {
        session.rename(from, to).await
    }

    async fn mkdir(&self, session: &mut SmbSession, path: &str) -> EngineResult<()> {
        session.mkdir(path).await
    }

    async fn exists(&self, session: &mut SmbSession, path: &str) -> EngineResult<bool> {
        session.exists(path).await
    }

    async fn probe(&self, session: &mut SmbSession) -> bool {
        session.probe().await
    }

    fn is_healthy(&self, session: &SmbSession) -> bool {
        session.is_healthy()
    }

    async fn close(&self, session: SmbSession) {
        // Dropping the session removes its auth file.
        drop(session);
    }
}
