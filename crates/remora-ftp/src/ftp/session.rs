//! One authenticated FTP control connection.
//!
//! Lifecycle: TCP connect → 220 banner → USER/PASS → FEAT → `OPTS UTF8 ON`
//! → PWD → `TYPE I`.
//!
//! Transfers follow one rule: when the data phase fails, the session is
//! marked unhealthy and nothing else is sent on the control channel. The
//! completion reply is left unread and the pool discards the connection.

use crate::ftp::error::from_reply;
use crate::ftp::parser;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::transfer;
use crate::ftp::types::{FtpConfig, FtpEntryKind, FtpResponse, ServerFeatures};
use remora_core::{
    ConnectionDescriptor, DownloadSink, EngineError, EngineResult, ErrorKind, ProgressSink,
    RemoteFileInfo, ResolvedCredentials, UploadSource,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{error::Elapsed, timeout};

/// Streaming chunk size (64 KiB).
const CHUNK: usize = 65_536;

pub struct FtpSession {
    codec: FtpCodec,
    peer: SocketAddr,
    config: FtpConfig,
    features: ServerFeatures,
    home: String,
    healthy: bool,
}

impl FtpSession {
    pub async fn connect(
        config: &FtpConfig,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<Self> {
        let addr = format!("{}:{}", descriptor.host(), descriptor.port());
        let stream = match timeout(config.connect_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(EngineError::network(format!("Cannot reach {}: {}", addr, e)).with_cause(e))
            }
            Err(_) => return Err(EngineError::timeout(format!("Connecting to {} timed out", addr))),
        };
        let peer = stream.peer_addr()?;

        let mut session = Self {
            codec: FtpCodec::from_tcp(stream),
            peer,
            config: config.clone(),
            features: ServerFeatures::default(),
            home: "/".into(),
            healthy: true,
        };

        let banner = session.reply().await?;
        if banner.code != 220 {
            return Err(from_reply(banner.code, banner.message()));
        }

        session.login(credentials).await?;
        session.features = session.probe_features().await;
        if session.config.utf8 && session.features.utf8 {
            let _ = session.command("OPTS UTF8 ON").await;
        }
        if let Ok(dir) = session.pwd().await {
            session.home = dir;
        }
        session.expect_completion("TYPE I").await?;

        log::info!("FTP session established to {} (home {})", descriptor, session.home);
        Ok(session)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn features(&self) -> &ServerFeatures {
        &self.features
    }

    /// Working directory reported right after login.
    pub fn home(&self) -> &str {
        &self.home
    }

    // ─── Control channel ─────────────────────────────────────────

    async fn command(&mut self, cmd: &str) -> EngineResult<FtpResponse> {
        let outcome = timeout(self.config.command_timeout(), self.codec.execute(cmd)).await;
        self.track(outcome, verb(cmd))
    }

    async fn reply(&mut self) -> EngineResult<FtpResponse> {
        let outcome = timeout(self.config.command_timeout(), self.codec.read_response()).await;
        self.track(outcome, "reply")
    }

    /// Any control-channel failure leaves the conversation out of sync.
    fn track(
        &mut self,
        outcome: Result<EngineResult<FtpResponse>, Elapsed>,
        what: &str,
    ) -> EngineResult<FtpResponse> {
        match outcome {
            Ok(Ok(resp)) => {
                if resp.code == 421 {
                    self.healthy = false;
                }
                Ok(resp)
            }
            Ok(Err(e)) => {
                self.healthy = false;
                Err(e)
            }
            Err(_) => {
                self.healthy = false;
                Err(EngineError::timeout(format!(
                    "No {} reply within {}s",
                    what, self.config.command_timeout_secs
                )))
            }
        }
    }

    async fn expect_completion(&mut self, cmd: &str) -> EngineResult<FtpResponse> {
        let resp = self.command(cmd).await?;
        if resp.is_completion() {
            Ok(resp)
        } else {
            Err(from_reply(resp.code, resp.message()))
        }
    }

    fn abort_transfer(&mut self, err: EngineError, path: &str) -> EngineError {
        log::warn!("FTP transfer of {} aborted, discarding session: {}", path, err);
        self.healthy = false;
        err
    }

    // ─── Login / negotiation ─────────────────────────────────────

    async fn login(&mut self, credentials: &ResolvedCredentials) -> EngineResult<()> {
        let (user, pass) = if credentials.username.is_empty() {
            ("anonymous", "anonymous@")
        } else {
            (credentials.username.as_str(), credentials.password_str())
        };

        let resp = self.command(&format!("USER {}", user)).await?;
        let resp = match resp.code {
            230 => return Ok(()),
            331 => self.command(&format!("PASS {}", pass)).await?,
            _ => resp,
        };
        match resp.code {
            230 | 202 => Ok(()),
            421 => Err(from_reply(resp.code, resp.message())),
            _ => Err(EngineError::auth_failed(format!(
                "FTP login for '{}' rejected: {} {}",
                user,
                resp.code,
                resp.message()
            ))),
        }
    }

    async fn probe_features(&mut self) -> ServerFeatures {
        let resp = match self.command("FEAT").await {
            Ok(r) if r.code == 211 => r,
            _ => return ServerFeatures::default(),
        };
        parse_features(&resp)
    }

    async fn pwd(&mut self) -> EngineResult<String> {
        let resp = self.expect_completion("PWD").await?;
        parse_pwd(&resp.text())
            .ok_or_else(|| EngineError::protocol(format!("Cannot parse PWD reply: {}", resp.text())))
    }

    async fn size(&mut self, path: &str) -> Option<u64> {
        match self.command(&format!("SIZE {}", path)).await {
            Ok(r) if r.code == 213 => r.message().parse().ok(),
            _ => None,
        }
    }

    async fn open_data(&mut self) -> EngineResult<TcpStream> {
        let limit = self.config.command_timeout() + self.config.data_timeout();
        let opened = timeout(
            limit,
            transfer::open_data_channel(
                &mut self.codec,
                self.config.data_channel_mode,
                self.peer,
                self.config.data_timeout(),
            ),
        )
        .await;
        match opened {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                if matches!(e.kind, ErrorKind::NetworkUnreachable | ErrorKind::Timeout) {
                    self.healthy = false;
                }
                Err(e)
            }
            Err(_) => {
                self.healthy = false;
                Err(EngineError::timeout("Opening the data channel timed out"))
            }
        }
    }

    // ─── Directory operations ────────────────────────────────────

    pub async fn list(&mut self, path: &str) -> EngineResult<Vec<RemoteFileInfo>> {
        let cmd = if self.config.prefer_mlsd && self.features.mlsd {
            format!("MLSD {}", path)
        } else {
            // LIST arguments are interpreted as `ls` flags by some servers.
            self.expect_completion(&format!("CWD {}", path)).await?;
            "LIST".to_string()
        };
        let body = self.read_listing(&cmd, path).await?;

        Ok(parser::parse_listing(&body)
            .into_iter()
            .filter(|e| e.kind != FtpEntryKind::Unknown)
            .map(|e| RemoteFileInfo {
                path: child_path(path, &e.name),
                is_directory: e.kind == FtpEntryKind::Directory,
                size: e.size,
                last_modified: e.modified,
                name: e.name,
            })
            .collect())
    }

    async fn read_listing(&mut self, cmd: &str, path: &str) -> EngineResult<String> {
        let mut data = self.open_data().await?;
        let resp = self.command(cmd).await?;
        if !resp.is_preliminary() && !resp.is_completion() {
            return Err(from_reply(resp.code, resp.message()));
        }

        let mut body = Vec::new();
        match timeout(self.config.data_timeout(), data.read_to_end(&mut body)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(self.abort_transfer(e.into(), path)),
            Err(_) => {
                return Err(self.abort_transfer(EngineError::timeout("Listing data timed out"), path))
            }
        }
        drop(data);

        if resp.is_preliminary() {
            let done = self.reply().await?;
            if !done.is_completion() {
                return Err(from_reply(done.code, done.message()));
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn delete(&mut self, path: &str) -> EngineResult<()> {
        let resp = self.command(&format!("DELE {}", path)).await?;
        if resp.is_completion() {
            return Ok(());
        }
        let dele_err = from_reply(resp.code, resp.message());
        // Not a file; maybe an empty directory.
        let rmd = self.command(&format!("RMD {}", path)).await?;
        if rmd.is_completion() {
            Ok(())
        } else {
            Err(dele_err)
        }
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> EngineResult<()> {
        let resp = self.command(&format!("RNFR {}", from)).await?;
        if resp.code != 350 {
            return Err(from_reply(resp.code, resp.message()));
        }
        self.expect_completion(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    /// Create a directory. An existing directory at `path` is success.
    pub async fn mkdir(&mut self, path: &str) -> EngineResult<()> {
        let resp = self.command(&format!("MKD {}", path)).await?;
        if resp.is_completion() {
            return Ok(());
        }
        let err = from_reply(resp.code, resp.message());
        if resp.code == 521 || err.kind == ErrorKind::AlreadyExists {
            log::debug!("FTP directory {} already exists", path);
            return Ok(());
        }
        // Servers often answer 550 for both "exists" and "missing parent".
        match self.command(&format!("CWD {}", path)).await? {
            r if r.is_completion() => Ok(()),
            _ => Err(err),
        }
    }

    /// Whether `path` names an entry, found by listing its parent. Relative
    /// paths are taken from the login directory; the root always exists.
    pub async fn exists(&mut self, path: &str) -> EngineResult<bool> {
        let absolute = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.home.trim_end_matches('/'), path)
        };
        let trimmed = absolute.trim_end_matches('/');
        let Some((parent, name)) = trimmed.rsplit_once('/') else {
            return Ok(true);
        };
        let parent = if parent.is_empty() { "/" } else { parent };
        match self.list(parent).await {
            Ok(entries) => Ok(entries.iter().any(|e| e.name == name)),
            Err(e) if e.kind == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ─── Transfers ───────────────────────────────────────────────

    pub async fn retrieve(
        &mut self,
        path: &str,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        self.expect_completion("TYPE I").await?;
        let total = if self.features.size {
            self.size(path).await
        } else {
            None
        };

        let mut data = self.open_data().await?;
        let resp = self.command(&format!("RETR {}", path)).await?;
        if !resp.is_preliminary() {
            return Err(from_reply(resp.code, resp.message()));
        }

        let data_timeout = self.config.data_timeout();
        let mut buf = vec![0u8; CHUNK];
        let mut transferred = 0u64;
        loop {
            let n = match timeout(data_timeout, data.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(self.abort_transfer(e.into(), path)),
                Err(_) => {
                    return Err(self.abort_transfer(EngineError::timeout("Download stalled"), path))
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = sink.write_all(&buf[..n]).await {
                return Err(self.abort_transfer(e.into(), path));
            }
            transferred += n as u64;
            if let Some(p) = progress {
                p.report(transferred, total);
            }
        }
        drop(data);

        let done = self.reply().await?;
        if !done.is_completion() {
            return Err(from_reply(done.code, done.message()));
        }
        sink.flush().await?;
        if let Some(p) = progress {
            p.finish(transferred, total.or(Some(transferred)));
        }
        Ok(transferred)
    }

    pub async fn store(
        &mut self,
        path: &str,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        self.expect_completion("TYPE I").await?;
        let mut data = self.open_data().await?;
        let resp = self.command(&format!("STOR {}", path)).await?;
        if !resp.is_preliminary() {
            return Err(from_reply(resp.code, resp.message()));
        }

        let data_timeout = self.config.data_timeout();
        let mut buf = vec![0u8; CHUNK];
        let mut transferred = 0u64;
        loop {
            let n = match source.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => return Err(self.abort_transfer(e.into(), path)),
            };
            if n == 0 {
                break;
            }
            match timeout(data_timeout, data.write_all(&buf[..n])).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(self.abort_transfer(e.into(), path)),
                Err(_) => {
                    return Err(self.abort_transfer(EngineError::timeout("Upload stalled"), path))
                }
            }
            transferred += n as u64;
            if let Some(p) = progress {
                p.report(transferred, size);
            }
        }
        match timeout(data_timeout, data.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.abort_transfer(e.into(), path)),
            Err(_) => {
                return Err(self.abort_transfer(EngineError::timeout("Upload stalled"), path))
            }
        }
        drop(data);

        let done = self.reply().await?;
        if !done.is_completion() {
            return Err(from_reply(done.code, done.message()));
        }
        if let Some(p) = progress {
            p.finish(transferred, size.or(Some(transferred)));
        }
        Ok(transferred)
    }

    // ─── Liveness / teardown ─────────────────────────────────────

    pub async fn noop(&mut self) -> bool {
        if !self.healthy {
            return false;
        }
        matches!(self.command("NOOP").await, Ok(r) if r.is_completion())
    }

    /// Send QUIT when the control channel is still in sync, then close.
    pub async fn quit(mut self) {
        if self.healthy {
            let _ = self.command("QUIT").await;
        }
        self.codec.shutdown().await;
    }
}

/// First word of a command, so errors never echo arguments such as passwords.
fn verb(cmd: &str) -> &str {
    cmd.split_whitespace().next().unwrap_or(cmd)
}

fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// `211-Features:` / ` MLSD` / ` SIZE` / `211 End`
fn parse_features(resp: &FtpResponse) -> ServerFeatures {
    let mut features = ServerFeatures::default();
    let inner = resp
        .lines
        .iter()
        .skip(1)
        .take(resp.lines.len().saturating_sub(2));
    for line in inner {
        let feat = line.trim().to_string();
        let name = feat
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match name.as_str() {
            "MLSD" | "MLST" => features.mlsd = true,
            "SIZE" => features.size = true,
            "MDTM" => features.mdtm = true,
            "UTF8" => features.utf8 = true,
            "EPSV" => features.epsv = true,
            _ => {}
        }
        if !feat.is_empty() {
            features.raw_features.push(feat);
        }
    }
    features
}

/// `257 "/home/user" is the current directory`, with `""` as an escaped quote.
fn parse_pwd(text: &str) -> Option<String> {
    let start = text.find('"')? + 1;
    let rest = &text[start..];
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                out.push('"');
                chars.next();
            } else {
                return Some(out);
            }
        } else {
            out.push(c);
        }
    }
    None
}
