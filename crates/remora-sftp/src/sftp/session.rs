// ── SFTP session – libssh2 on the blocking pool ──────────────────────────────
//
// libssh2 calls block, so every operation runs inside `spawn_blocking` with
// the handle behind an `Arc<Mutex<_>>`. Transfers stream through a bounded
// channel between the blocking side and the async sink/source.

use crate::sftp::auth::authenticate;
use crate::sftp::error::map_ssh_error;
use crate::sftp::hostkey::verify_host_key;
use crate::sftp::types::SftpConfig;
use chrono::{TimeZone, Utc};
use remora_core::{
    DownloadSink, EngineError, EngineResult, ErrorKind, ProgressSink, RemoteFileInfo,
    ResolvedCredentials, UploadSource,
};
use ssh2::{FileStat, RenameFlags, Session, Sftp};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

const CHUNK: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 4;

pub(crate) struct Handle {
    session: Session,
    sftp: Sftp,
    _tcp: TcpStream,
}

pub struct SftpSession {
    shared: Arc<Mutex<Handle>>,
    endpoint: String,
    home: String,
    healthy: bool,
}

enum Chunk {
    Total(Option<u64>),
    Data(Vec<u8>),
}

fn lock(shared: &Mutex<Handle>) -> EngineResult<MutexGuard<'_, Handle>> {
    shared
        .lock()
        .map_err(|_| EngineError::io("SFTP session lock poisoned"))
}

impl SftpSession {
    pub async fn connect(
        config: &SftpConfig,
        host: &str,
        port: u16,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<Self> {
        let config = config.clone();
        let host = host.to_string();
        let credentials = credentials.clone();
        let endpoint = format!("{}:{}", host, port);
        let (handle, home) =
            tokio::task::spawn_blocking(move || open(&config, &host, port, &credentials)).await??;
        Ok(Self {
            shared: Arc::new(Mutex::new(handle)),
            endpoint,
            home,
            healthy: true,
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Directory the server placed us in after login.
    pub fn home(&self) -> &str {
        &self.home
    }

    fn track<T>(&mut self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e) = &result {
            if matches!(e.kind, ErrorKind::NetworkUnreachable | ErrorKind::Timeout) {
                log::warn!("SFTP session {} lost: {}", self.endpoint, e);
                self.healthy = false;
            }
        }
        result
    }

    async fn blocking<T, F>(&mut self, op: F) -> EngineResult<T>
    where
        F: FnOnce(&Handle) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let joined = tokio::task::spawn_blocking(move || {
            let guard = lock(&shared)?;
            op(&guard)
        })
        .await;
        let result = joined.map_err(EngineError::from).and_then(|r| r);
        self.track(result)
    }

    // ── Directory operations ─────────────────────────────────────────────────

    pub async fn list(&mut self, path: &str) -> EngineResult<Vec<RemoteFileInfo>> {
        let dir = path.to_string();
        self.blocking(move |h| {
            let entries = h
                .sftp
                .readdir(Path::new(&dir))
                .map_err(|e| map_ssh_error(e, &format!("readdir {}", dir)))?;
            let mut out = Vec::with_capacity(entries.len());
            for (entry_path, stat) in entries {
                let Some(name) = entry_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                    continue;
                };
                if name == "." || name == ".." {
                    continue;
                }
                let full = child_path(&dir, &name);
                // Follow one level of symlink; a dangling link lists as an empty file.
                let stat = if stat.file_type().is_symlink() {
                    h.sftp.stat(Path::new(&full)).unwrap_or(FileStat {
                        perm: None,
                        ..stat
                    })
                } else {
                    stat
                };
                out.push(file_info(&name, full, &stat));
            }
            Ok(out)
        })
        .await
    }

    pub async fn delete(&mut self, path: &str) -> EngineResult<()> {
        let target = path.to_string();
        self.blocking(move |h| {
            let p = Path::new(&target);
            let stat = h
                .sftp
                .lstat(p)
                .map_err(|e| map_ssh_error(e, &format!("stat {}", target)))?;
            let removed = if stat.is_dir() {
                h.sftp.rmdir(p)
            } else {
                h.sftp.unlink(p)
            };
            removed.map_err(|e| map_ssh_error(e, &format!("delete {}", target)))
        })
        .await
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> EngineResult<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.blocking(move |h| {
            let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
            let (src, dst) = (Path::new(&from), Path::new(&to));
            match h.sftp.rename(src, dst, flags) {
                Ok(()) => Ok(()),
                // SFTPv3 servers ignore OVERWRITE; clear the target and retry once.
                Err(first) if h.sftp.stat(dst).is_ok() => {
                    log::debug!("SFTP rename onto existing {} failed ({}), replacing", to, first);
                    h.sftp
                        .unlink(dst)
                        .and_then(|_| h.sftp.rename(src, dst, flags))
                        .map_err(|e| map_ssh_error(e, &format!("rename {} -> {}", from, to)))
                }
                Err(e) => Err(map_ssh_error(e, &format!("rename {} -> {}", from, to))),
            }
        })
        .await
    }

    pub async fn mkdir(&mut self, path: &str) -> EngineResult<()> {
        let target = path.to_string();
        self.blocking(move |h| {
            let p = Path::new(&target);
            match h.sftp.mkdir(p, 0o755) {
                Ok(()) => Ok(()),
                Err(_) if h.sftp.stat(p).map(|s| s.is_dir()).unwrap_or(false) => Ok(()),
                Err(e) => Err(map_ssh_error(e, &format!("mkdir {}", target))),
            }
        })
        .await
    }

    pub async fn exists(&mut self, path: &str) -> EngineResult<bool> {
        let target = path.to_string();
        self.blocking(move |h| match h.sftp.stat(Path::new(&target)) {
            Ok(_) => Ok(true),
            Err(e) => {
                let mapped = map_ssh_error(e, &format!("stat {}", target));
                if mapped.kind == ErrorKind::NotFound {
                    Ok(false)
                } else {
                    Err(mapped)
                }
            }
        })
        .await
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    pub async fn download(
        &mut self,
        path: &str,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        let (tx, mut rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);
        let shared = Arc::clone(&self.shared);
        let remote = path.to_string();
        let reader = tokio::task::spawn_blocking(move || -> EngineResult<()> {
            let guard = lock(&shared)?;
            let mut file = guard
                .sftp
                .open(Path::new(&remote))
                .map_err(|e| map_ssh_error(e, &format!("open {}", remote)))?;
            let total = file.stat().ok().and_then(|s| s.size);
            if tx.blocking_send(Chunk::Total(total)).is_err() {
                return Ok(());
            }
            let mut buf = vec![0u8; CHUNK];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                if tx.blocking_send(Chunk::Data(buf[..n].to_vec())).is_err() {
                    return Ok(());
                }
            }
        });

        let mut total = None;
        let mut transferred = 0u64;
        let mut write_failure = None;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Total(t) => total = t,
                Chunk::Data(bytes) => {
                    if let Err(e) = sink.write_all(&bytes).await {
                        write_failure = Some(EngineError::from(e));
                        break;
                    }
                    transferred += bytes.len() as u64;
                    if let Some(p) = progress {
                        p.report(transferred, total);
                    }
                }
            }
        }
        drop(rx);

        let read = reader.await.map_err(EngineError::from).and_then(|r| r);
        self.track(read)?;
        if let Some(e) = write_failure {
            return Err(e);
        }
        sink.flush().await?;
        if let Some(p) = progress {
            p.finish(transferred, total.or(Some(transferred)));
        }
        Ok(transferred)
    }

    pub async fn upload(
        &mut self,
        path: &str,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let shared = Arc::clone(&self.shared);
        let remote = path.to_string();
        let writer = tokio::task::spawn_blocking(move || -> EngineResult<u64> {
            let guard = lock(&shared)?;
            let mut file = guard
                .sftp
                .create(Path::new(&remote))
                .map_err(|e| map_ssh_error(e, &format!("create {}", remote)))?;
            let mut written = 0u64;
            while let Some(bytes) = rx.blocking_recv() {
                file.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
            file.flush()?;
            Ok(written)
        });

        let mut buf = vec![0u8; CHUNK];
        let mut sent = 0u64;
        let mut read_failure = None;
        loop {
            let n = match source.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    read_failure = Some(EngineError::from(e));
                    break;
                }
            };
            if n == 0 {
                break;
            }
            if tx.send(buf[..n].to_vec()).await.is_err() {
                // The writer stopped early; its result carries the reason.
                break;
            }
            sent += n as u64;
            if let Some(p) = progress {
                p.report(sent, size);
            }
        }
        drop(tx);

        let written = writer.await.map_err(EngineError::from).and_then(|r| r);
        let written = self.track(written)?;
        if let Some(e) = read_failure {
            return Err(e);
        }
        if let Some(p) = progress {
            p.finish(written, size.or(Some(written)));
        }
        Ok(written)
    }

    // ── Liveness / teardown ──────────────────────────────────────────────────

    /// Keepalive plus a `realpath` round trip.
    pub async fn probe(&mut self) -> bool {
        if !self.healthy {
            return false;
        }
        let alive = self
            .blocking(|h| {
                h.session
                    .keepalive_send()
                    .map_err(|e| map_ssh_error(e, "keepalive"))?;
                h.sftp
                    .realpath(Path::new("."))
                    .map_err(|e| map_ssh_error(e, "realpath ."))?;
                Ok(())
            })
            .await;
        alive.is_ok()
    }

    pub async fn disconnect(self) {
        let shared = self.shared;
        let endpoint = self.endpoint;
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(h) = shared.lock() {
                let _ = h.session.disconnect(None, "closing", None);
            }
        })
        .await;
        log::debug!("SFTP session {} closed", endpoint);
    }
}

fn open(
    config: &SftpConfig,
    host: &str,
    port: u16,
    credentials: &ResolvedCredentials,
) -> EngineResult<(Handle, String)> {
    let tcp = connect_tcp(config, host, port)?;

    let mut session = Session::new().map_err(|e| map_ssh_error(e, "SSH session init"))?;
    session.set_compress(config.compress);
    session.set_tcp_stream(tcp.try_clone()?);
    let timeout_ms = config.operation_timeout_secs.saturating_mul(1000).min(u64::from(u32::MAX));
    session.set_timeout(timeout_ms as u32);
    session
        .handshake()
        .map_err(|e| map_ssh_error(e, &format!("SSH handshake with {}:{}", host, port)))?;

    verify_host_key(
        &session,
        host,
        port,
        config.known_hosts_policy,
        config.known_hosts_file().as_deref(),
    )?;
    let method = authenticate(&session, credentials)?;

    let sftp = session
        .sftp()
        .map_err(|e| map_ssh_error(e, "open SFTP subsystem"))?;
    session.set_keepalive(
        config.keepalive_interval_secs > 0,
        config.keepalive_interval_secs.min(u64::from(u32::MAX)) as u32,
    );
    let home = sftp
        .realpath(Path::new("."))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "/".to_string());

    log::info!(
        "SFTP authenticated to {}:{} as {} via {}",
        host,
        port,
        credentials.username,
        method
    );
    Ok((
        Handle {
            session,
            sftp,
            _tcp: tcp,
        },
        home,
    ))
}

fn connect_tcp(config: &SftpConfig, host: &str, port: u16) -> EngineResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| EngineError::network(format!("Cannot resolve {}: {}", host, e)))?
        .collect();
    let mut last = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, config.connect_timeout()) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
    }
    let err = last.map(EngineError::from).unwrap_or_else(|| EngineError::network("no address"));
    Err(EngineError::new(
        err.kind,
        format!("Cannot reach {}:{}: {}", host, port, err.message),
    ))
}

fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

pub(crate) fn file_info(name: &str, path: String, stat: &FileStat) -> RemoteFileInfo {
    RemoteFileInfo {
        name: name.to_string(),
        path,
        size: if stat.is_dir() { 0 } else { stat.size.unwrap_or(0) },
        is_directory: stat.is_dir(),
        last_modified: stat
            .mtime
            .and_then(|t| Utc.timestamp_opt(t as i64, 0).single()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(perm: u32, size: u64, mtime: u64) -> FileStat {
        FileStat {
            size: Some(size),
            uid: None,
            gid: None,
            perm: Some(perm),
            atime: None,
            mtime: Some(mtime),
        }
    }

    #[test]
    fn stat_conversion() {
        let f = file_info("a.jpg", "/m/a.jpg".into(), &stat(0o100644, 42, 1_700_000_000));
        assert!(!f.is_directory);
        assert_eq!(f.size, 42);
        assert_eq!(f.last_modified.unwrap().timestamp(), 1_700_000_000);

        let d = file_info("sub", "/m/sub".into(), &stat(0o040755, 4096, 0));
        assert!(d.is_directory);
        assert_eq!(d.size, 0);
    }

    #[test]
    fn child_paths() {
        assert_eq!(child_path("/", "x"), "/x");
        assert_eq!(child_path("/home/me", "x"), "/home/me/x");
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = SftpSession::connect(
            &SftpConfig::default(),
            "127.0.0.1",
            port,
            &ResolvedCredentials::password("me", "pw"),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind, ErrorKind::NetworkUnreachable);
    }

    #[tokio::test]
    async fn non_ssh_server_fails_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock.write_all(b"220 this is not ssh\r\n").await;
            }
        });
        let config = SftpConfig {
            operation_timeout_secs: 5,
            ..SftpConfig::default()
        };
        let result =
            SftpSession::connect(&config, "127.0.0.1", port, &ResolvedCredentials::password("me", "pw")).await;
        assert!(result.is_err());
    }
}
