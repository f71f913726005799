//! One SMB "session": a share target plus a private auth file.
//!
//! Every operation is a separate `smbclient -c` invocation. Credentials go
//! through `-A <authfile>` (mode 0600, removed when the session is dropped)
//! so they never appear on the command line.

use crate::smb::command::{list_mask, local_arg, remote_arg};
use crate::smb::parser::parse_ls;
use crate::smb::status;
use crate::smb::types::SmbConfig;
use remora_core::{
    ConnectionDescriptor, DownloadSink, EngineError, EngineResult, ErrorKind, ProgressSink,
    RemoteFileInfo, ResolvedCredentials, UploadSource,
};
use std::io::Write;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

const CHUNK: usize = 64 * 1024;

pub struct SmbSession {
    target: String,
    port: u16,
    auth_file: Option<NamedTempFile>,
    config: SmbConfig,
    healthy: bool,
}

impl SmbSession {
    /// Write the auth file and verify it with a `pwd` round trip.
    pub async fn connect(
        config: &SmbConfig,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<Self> {
        if descriptor.share().is_empty() {
            return Err(EngineError::invalid_input(format!(
                "{} names no share",
                descriptor
            )));
        }
        let auth_file = if credentials.username.is_empty() {
            None
        } else {
            Some(write_auth_file(credentials)?)
        };
        let mut session = Self {
            target: format!("//{}/{}", descriptor.host(), descriptor.share()),
            port: descriptor.port(),
            auth_file,
            config: config.clone(),
            healthy: true,
        };
        session.run("pwd", &format!("connect {}", session.target)).await?;
        log::info!(
            "SMB share {} reachable as {}",
            session.target,
            if credentials.username.is_empty() { "guest" } else { credentials.username.as_str() }
        );
        Ok(session)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    #[cfg(test)]
    pub(crate) fn auth_file_path(&self) -> Option<&std::path::Path> {
        self.auth_file.as_ref().map(|f| f.path())
    }

    /// Run one `-c` command string and return stdout.
    async fn run(&mut self, commands: &str, context: &str) -> EngineResult<String> {
        let mut cmd = Command::new(&self.config.smbclient_path);
        cmd.arg(&self.target).arg("-p").arg(self.port.to_string());
        match &self.auth_file {
            Some(f) => {
                cmd.arg("-A").arg(f.path());
            }
            None => {
                cmd.arg("-N");
            }
        }
        if let Some(proto) = &self.config.max_protocol {
            cmd.arg("-m").arg(proto);
        }
        cmd.arg("-c")
            .arg(commands)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("smbclient {} -c '{}'", self.target, commands);
        let output = match timeout(self.config.command_timeout(), cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::unsupported(format!(
                    "smbclient not found at {}",
                    self.config.smbclient_path.display()
                )))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                self.healthy = false;
                return Err(EngineError::timeout(format!(
                    "{}: smbclient did not finish within {}s",
                    context, self.config.command_timeout_secs
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}\n{}", stdout, stderr);
        let code = status::extract(&combined);
        if code.is_none() && output.status.success() {
            return Ok(stdout);
        }
        let err = status::to_error(code, context, &combined);
        if matches!(err.kind, ErrorKind::NetworkUnreachable | ErrorKind::Timeout) {
            self.healthy = false;
        }
        Err(err)
    }

    // ─── Directory operations ────────────────────────────────────

    pub async fn list(&mut self, path: &str) -> EngineResult<Vec<RemoteFileInfo>> {
        let mask = list_mask(path)?;
        let output = match self.run(&format!("ls {}", mask), &format!("list {}", path)).await {
            Ok(out) => out,
            // An empty directory matches nothing for the mask.
            Err(e) if e.message.contains("NT_STATUS_NO_SUCH_FILE") => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(parse_ls(&output)
            .into_iter()
            .map(|e| RemoteFileInfo {
                path: child_path(path, &e.name),
                name: e.name,
                size: e.size,
                is_directory: e.is_directory,
                last_modified: e.modified,
            })
            .collect())
    }

    pub async fn delete(&mut self, path: &str) -> EngineResult<()> {
        let remote = remote_arg(path)?;
        let context = format!("delete {}", path);
        match self.run(&format!("del {}", remote), &context).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.kind, ErrorKind::NotFound | ErrorKind::ProtocolError) => {
                // `del` only matches files; try it as a directory.
                match self.run(&format!("rmdir {}", remote), &context).await {
                    Ok(_) => Ok(()),
                    Err(_) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> EngineResult<()> {
        let (src, dst) = (remote_arg(from)?, remote_arg(to)?);
        let context = format!("rename {} -> {}", from, to);
        match self.run(&format!("rename {} {}", src, dst), &context).await {
            Err(e) if e.kind == ErrorKind::AlreadyExists => {
                self.run(&format!("del {}", dst), &context).await?;
                self.run(&format!("rename {} {}", src, dst), &context).await?;
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    pub async fn mkdir(&mut self, path: &str) -> EngineResult<()> {
        let remote = remote_arg(path)?;
        match self.run(&format!("mkdir {}", remote), &format!("mkdir {}", path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&mut self, path: &str) -> EngineResult<bool> {
        if path.trim_matches('/').is_empty() {
            return Ok(true);
        }
        let remote = remote_arg(path)?;
        match self.run(&format!("allinfo {}", remote), &format!("stat {}", path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ─── Transfers (staged through a private temp file) ──────────

    pub async fn download(
        &mut self,
        path: &str,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        let remote = remote_arg(path)?;
        let staging = tempfile::Builder::new().prefix("remora-smb-get-").tempfile()?;
        let local = local_arg(staging.path())?;
        self.run(&format!("get {} {}", remote, local), &format!("download {}", path))
            .await?;

        let mut file = tokio::fs::File::open(staging.path()).await?;
        let total = file.metadata().await?.len();
        let mut buf = vec![0u8; CHUNK];
        let mut copied = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await?;
            copied += n as u64;
            if let Some(p) = progress {
                p.report(copied, Some(total));
            }
        }
        sink.flush().await?;
        if let Some(p) = progress {
            p.finish(copied, Some(total));
        }
        Ok(copied)
    }

    pub async fn upload(
        &mut self,
        path: &str,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<u64> {
        let remote = remote_arg(path)?;
        let staging = tempfile::Builder::new().prefix("remora-smb-put-").tempfile()?;
        let local = local_arg(staging.path())?;

        let mut file = tokio::fs::File::create(staging.path()).await?;
        let staged = tokio::io::copy(source, &mut file).await?;
        file.flush().await?;
        drop(file);

        self.run(&format!("put {} {}", local, remote), &format!("upload {}", path))
            .await?;
        if let Some(p) = progress {
            p.finish(staged, size.or(Some(staged)));
        }
        Ok(staged)
    }

    pub async fn probe(&mut self) -> bool {
        self.run("pwd", "probe").await.is_ok()
    }
}

fn child_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn write_auth_file(credentials: &ResolvedCredentials) -> EngineResult<NamedTempFile> {
    let fields = [
        Some(credentials.username.as_str()),
        Some(credentials.password_str()),
        credentials.domain.as_deref(),
    ];
    if fields.iter().flatten().any(|f| f.contains('\n') || f.contains('\r')) {
        return Err(EngineError::invalid_input("SMB credentials may not contain line breaks"));
    }

    let mut file = tempfile::Builder::new().prefix("remora-smb-auth-").tempfile()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
    }
    writeln!(file, "username = {}", credentials.username)?;
    writeln!(file, "password = {}", credentials.password_str())?;
    if let Some(domain) = &credentials.domain {
        writeln!(file, "domain = {}", domain)?;
    }
    file.flush()?;
    Ok(file)
}
