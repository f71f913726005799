//! [`ProtocolClient`] implementation over [`FtpSession`].

use crate::ftp::session::FtpSession;
use crate::ftp::types::FtpConfig;
use async_trait::async_trait;
use remora_core::{
    ConnectionDescriptor, DownloadSink, EngineResult, ProgressSink, Protocol, ProtocolClient,
    RemoteFileInfo, ResolvedCredentials, UploadSource,
};

/// Stateless FTP driver; all connection state lives in [`FtpSession`].
#[derive(Debug, Clone, Default)]
pub struct FtpClient {
    config: FtpConfig,
}

impl FtpClient {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FtpConfig {
        &self.config
    }
}

#[async_trait]
impl ProtocolClient for FtpClient {
    type Session = FtpSession;

    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<FtpSession> {
        FtpSession::connect(&self.config, descriptor, credentials).await
    }

    async fn list(&self, session: &mut FtpSession, path: &str) -> EngineResult<Vec<RemoteFileInfo>> {
        session.list(path).await
    }

    async fn download(
        &self,
        session: &mut FtpSession,
        path: &str,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        session.retrieve(path, sink, progress).await
    }

    async fn upload(
        &self,
        session: &mut FtpSession,
        path: &str,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        session.store(path, source, size, progress).await
    }

    async fn delete(&self, session: &mut FtpSession, path: &str) -> EngineResult<()> {
        session.delete(path).await
    }

    async fn rename(&self, session: &mut FtpSession, from: &str, to: &str) -> EngineResult<()> {
        session.rename(from, to).await
    }

    async fn mkdir(&self, session: &mut FtpSession, path: &str) -> EngineResult<()> {
        session.mkdir(path).await
    }

    async fn exists(&self, session: &mut FtpSession, path: &str) -> EngineResult<bool> {
        session.exists(path).await
    }

    async fn probe(&self, session: &mut FtpSession) -> bool {
        session.noop().await
    }

    fn is_healthy(&self, session: &FtpSession) -> bool {
        session.is_healthy()
    }

    async fn close(&self, session: FtpSession) {
        session.quit().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::testing::{ScriptedServer, CLOSED, PASSWORD};
    use remora_core::{progress_channel, ErrorKind};
    use remora_pool::{ConnectionPool, PoolConfig};
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, ReadBuf};

    fn config() -> FtpConfig {
        FtpConfig {
            connect_timeout_secs: 5,
            command_timeout_secs: 5,
            data_timeout_secs: 5,
            ..FtpConfig::default()
        }
    }

    fn descriptor(server: &ScriptedServer) -> ConnectionDescriptor {
        ConnectionDescriptor::new(Protocol::Ftp, "127.0.0.1", Some(server.addr.port()), "", "alice", None)
    }

    fn credentials() -> ResolvedCredentials {
        ResolvedCredentials::password("alice", PASSWORD)
    }

    /// Yields one chunk, then fails like a vanished local file.
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "local read failed")))
            } else {
                self.sent = true;
                buf.put_slice(b"partial");
                Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn full_round_trip_over_mlsd() {
        let server = ScriptedServer::start().await;
        server.put_dir("/media");
        server.put_file("/media/a.jpg", b"jpeg bytes");
        let client = FtpClient::new(config());
        let mut session = client.connect(&descriptor(&server), &credentials()).await.unwrap();
        assert!(session.features().mlsd);
        assert_eq!(session.home(), "/");

        let listing = client.list(&mut session, "/media").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, "/media/a.jpg");
        assert_eq!(listing[0].size, 10);
        assert!(!listing[0].is_directory);

        let (sink, stream) = progress_channel(Duration::ZERO);
        let mut out = Vec::new();
        let n = client
            .download(&mut session, "/media/a.jpg", &mut out, Some(&sink))
            .await
            .unwrap();
        assert_eq!((n, out.as_slice()), (10, &b"jpeg bytes"[..]));
        assert!(stream.latest().finished);

        let mut src: &[u8] = b"new content";
        client
            .upload(&mut session, "/media/b.txt", &mut src, Some(11), None)
            .await
            .unwrap();
        assert_eq!(server.file("/media/b.txt").unwrap(), b"new content");

        client.rename(&mut session, "/media/b.txt", "/media/c.txt").await.unwrap();
        assert!(client.exists(&mut session, "/media/c.txt").await.unwrap());
        assert!(!client.exists(&mut session, "/media/b.txt").await.unwrap());
        assert!(!client.exists(&mut session, "/missing/x").await.unwrap());

        client.mkdir(&mut session, "/media/sub").await.unwrap();
        client.mkdir(&mut session, "/media/sub").await.unwrap();
        assert!(server.has_dir("/media/sub"));

        client.delete(&mut session, "/media/c.txt").await.unwrap();
        client.delete(&mut session, "/media/sub").await.unwrap();
        assert!(server.file("/media/c.txt").is_none());
        assert!(!server.has_dir("/media/sub"));

        assert!(client.probe(&mut session).await);
        client.close(session).await;
        server.wait_closed(1).await;
        let commands = server.commands();
        assert!(commands.iter().any(|c| c == "QUIT"));
        // TYPE I precedes every transfer.
        for (i, c) in commands.iter().enumerate() {
            if c.starts_with("RETR") || c.starts_with("STOR") {
                assert!(commands[..i].iter().rev().any(|p| p == "TYPE I"));
            }
        }
    }

    #[tokio::test]
    async fn relative_paths_are_checked_against_the_login_directory() {
        let server = ScriptedServer::start().await;
        server.put_file("/top.jpg", b"x");
        let client = FtpClient::new(config());
        let mut session = client.connect(&descriptor(&server), &credentials()).await.unwrap();

        assert!(client.exists(&mut session, "top.jpg").await.unwrap());
        assert!(!client.exists(&mut session, "nothing.jpg").await.unwrap());
        assert!(!client.exists(&mut session, "nothing/").await.unwrap());
        assert!(client.exists(&mut session, "/").await.unwrap());
        assert!(server.commands().iter().any(|c| c == "MLSD /"));
    }

    #[tokio::test]
    async fn wrong_password_is_auth_failure() {
        let server = ScriptedServer::start().await;
        let err = FtpClient::new(config())
            .connect(&descriptor(&server), &ResolvedCredentials::password("alice", "nope"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::AuthFailed);
        assert!(!err.message.contains("nope"));
    }

    #[tokio::test]
    async fn falls_back_to_list_without_mlsd() {
        let server = ScriptedServer::start_with(false).await;
        server.put_dir("/docs");
        server.put_dir("/docs/old");
        server.put_file("/docs/readme.txt", b"hello");
        let client = FtpClient::new(config());
        let mut session = client.connect(&descriptor(&server), &credentials()).await.unwrap();

        let mut listing = client.list(&mut session, "/docs").await.unwrap();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(listing.len(), 2);
        assert!(listing[0].is_directory);
        assert_eq!(listing[1].name, "readme.txt");
        assert_eq!(listing[1].size, 5);
        assert!(server.commands().iter().any(|c| c == "CWD /docs"));
        assert!(!server.commands().iter().any(|c| c.starts_with("MLSD")));
    }

    #[tokio::test]
    async fn missing_file_keeps_session_healthy() {
        let server = ScriptedServer::start().await;
        let client = FtpClient::new(config());
        let mut session = client.connect(&descriptor(&server), &credentials()).await.unwrap();
        let mut out = Vec::new();
        let err = client
            .download(&mut session, "/nope.bin", &mut out, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(client.is_healthy(&session));
        assert!(client.probe(&mut session).await);
    }

    #[tokio::test]
    async fn failed_upload_sends_nothing_further() {
        let server = ScriptedServer::start().await;
        let client = FtpClient::new(config());
        let mut session = client.connect(&descriptor(&server), &credentials()).await.unwrap();

        let mut src = FailingReader { sent: false };
        let err = client
            .upload(&mut session, "/broken.bin", &mut src, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
        assert!(!client.is_healthy(&session));
        assert!(!client.probe(&mut session).await);

        client.close(session).await;
        server.wait_closed(1).await;
        let commands = server.commands();
        let stor = commands.iter().position(|c| c == "STOR /broken.bin").unwrap();
        assert_eq!(&commands[stor + 1..], &[CLOSED.to_string()]);
    }

    #[tokio::test]
    async fn pool_replaces_session_after_failed_upload() {
        let server = ScriptedServer::start().await;
        let pool = ConnectionPool::new(Arc::new(FtpClient::new(config())), PoolConfig::default());
        let desc = descriptor(&server);

        let lease = pool.acquire(&desc, &credentials()).await.unwrap();
        {
            let mut session = lease.lock().await.unwrap();
            let mut src = FailingReader { sent: false };
            assert!(pool
                .client()
                .upload(&mut session, "/x.bin", &mut src, None, None)
                .await
                .is_err());
        }
        drop(lease);

        let lease = pool.acquire(&desc, &credentials()).await.unwrap();
        {
            let mut session = lease.lock().await.unwrap();
            assert!(pool.client().list(&mut session, "/").await.is_ok());
        }
        assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
        drop(lease);
        pool.close_all().await;
    }
}
