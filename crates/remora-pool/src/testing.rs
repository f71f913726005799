//! Scriptable in-memory protocol client for pool and endpoint tests.

use async_trait::async_trait;
use remora_core::{
    ConnectionDescriptor, DownloadSink, EngineError, EngineResult, ProgressSink, Protocol,
    ProtocolClient, RemoteFileInfo, ResolvedCredentials, UploadSource,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub(crate) struct FakeSession {
    pub id: usize,
    pub healthy: bool,
    pub probe_ok: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct FakeClient {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub probes: AtomicUsize,
    pub connect_delay: Duration,
    /// Shared by every session; flip to make probes fail.
    pub probe_ok: Arc<AtomicBool>,
    pub fail_next_op: Mutex<Option<EngineError>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub last_username: Mutex<String>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            probe_ok: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            ..Self::new()
        }
    }

    fn take_failure(&self) -> EngineResult<()> {
        match self.fail_next_op.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    type Session = FakeSession;

    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<FakeSession> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if descriptor.host() == "unreachable" {
            return Err(EngineError::network("connection refused"));
        }
        *self.last_username.lock().unwrap() = credentials.username.clone();
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeSession {
            id,
            healthy: true,
            probe_ok: self.probe_ok.clone(),
        })
    }

    async fn list(&self, _s: &mut FakeSession, path: &str) -> EngineResult<Vec<RemoteFileInfo>> {
        self.take_failure()?;
        let files = self.files.lock().unwrap();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(files
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| RemoteFileInfo {
                name: k.rsplit('/').next().unwrap_or_default().to_string(),
                path: k.clone(),
                size: v.len() as u64,
                is_directory: false,
                last_modified: None,
            })
            .collect())
    }

    async fn download(
        &self,
        _s: &mut FakeSession,
        path: &str,
        sink: DownloadSink<'_>,
        _progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        self.take_failure()?;
        let data = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::not_found(path))?;
        sink.write_all(&data).await?;
        Ok(data.len() as u64)
    }

    async fn upload(
        &self,
        session: &mut FakeSession,
        path: &str,
        source: UploadSource<'_>,
        _size: Option<u64>,
        _progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        if let Err(e) = self.take_failure() {
            session.healthy = false;
            return Err(e);
        }
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        let n = data.len() as u64;
        self.files.lock().unwrap().insert(path.to_string(), data);
        Ok(n)
    }

    async fn delete(&self, _s: &mut FakeSession, path: &str) -> EngineResult<()> {
        self.take_failure()?;
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(path))
    }

    async fn rename(&self, _s: &mut FakeSession, from: &str, to: &str) -> EngineResult<()> {
        self.take_failure()?;
        let mut files = self.files.lock().unwrap();
        let data = files.remove(from).ok_or_else(|| EngineError::not_found(from))?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    async fn mkdir(&self, _s: &mut FakeSession, _path: &str) -> EngineResult<()> {
        self.take_failure()
    }

    async fn exists(&self, _s: &mut FakeSession, path: &str) -> EngineResult<bool> {
        self.take_failure()?;
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn probe(&self, session: &mut FakeSession) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        session.probe_ok.load(Ordering::SeqCst)
    }

    fn is_healthy(&self, session: &FakeSession) -> bool {
        session.healthy
    }

    async fn close(&self, _session: FakeSession) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn descriptor(host: &str) -> ConnectionDescriptor {
    ConnectionDescriptor::new(Protocol::Sftp, host, None, "", "user", None)
}
