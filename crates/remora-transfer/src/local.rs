//! `file://` resources behind the same [`RemoteFs`] seam as remote ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remora_core::{
    DownloadSink, EngineError, EngineResult, OpContext, ProgressSink, RemoteFileInfo, RemoteFs,
    ResourceUri, Scheme, UploadSource,
};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

fn local_path(uri: &ResourceUri) -> EngineResult<&Path> {
    uri.as_local()
        .ok_or_else(|| EngineError::invalid_input(format!("{} is not a local resource", uri)))
}

/// Attach the path to an I/O error message.
fn at(path: &Path) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
    move |e| {
        let mut err = EngineError::from(e);
        err.message = format!("{}: {}", path.display(), err.message);
        err
    }
}

async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: Option<u64>,
    progress: Option<&ProgressSink>,
) -> std::io::Result<u64>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        if let Some(p) = progress {
            p.report(copied, total);
        }
    }
    writer.flush().await?;
    if let Some(p) = progress {
        p.finish(copied, total.or(Some(copied)));
    }
    Ok(copied)
}

#[async_trait]
impl RemoteFs for LocalFs {
    fn scheme(&self) -> Scheme {
        Scheme::File
    }

    async fn list(&self, uri: &ResourceUri, _ctx: &OpContext) -> EngineResult<Vec<RemoteFileInfo>> {
        let dir = local_path(uri)?;
        let mut entries = tokio::fs::read_dir(dir).await.map_err(at(dir))?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(at(dir))? {
            let path = entry.path();
            // Follows symlinks; a dangling link is skipped.
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            out.push(RemoteFileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: path.to_string_lossy().into_owned(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_directory: meta.is_dir(),
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        Ok(out)
    }

    async fn download(
        &self,
        uri: &ResourceUri,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
        _ctx: &OpContext,
    ) -> EngineResult<u64> {
        let path = local_path(uri)?;
        let mut file = tokio::fs::File::open(path).await.map_err(at(path))?;
        let total = file.metadata().await.map_err(at(path))?.len();
        Ok(copy_with_progress(&mut file, sink, Some(total), progress)
            .await
            .map_err(at(path))?)
    }

    async fn upload(
        &self,
        uri: &ResourceUri,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
        _ctx: &OpContext,
    ) -> EngineResult<u64> {
        let path = local_path(uri)?;
        let mut file = tokio::fs::File::create(path).await.map_err(at(path))?;
        Ok(copy_with_progress(source, &mut file, size, progress)
            .await
            .map_err(at(path))?)
    }

    async fn delete(&self, uri: &ResourceUri, _ctx: &OpContext) -> EngineResult<()> {
        let path = local_path(uri)?;
        let meta = tokio::fs::symlink_metadata(path).await.map_err(at(path))?;
        if meta.is_dir() {
            tokio::fs::remove_dir(path).await.map_err(at(path))
        } else {
            tokio::fs::remove_file(path).await.map_err(at(path))
        }
    }

    async fn rename(&self, from: &ResourceUri, to: &ResourceUri, _ctx: &OpContext) -> EngineResult<()> {
        let src = local_path(from)?;
        let dst = local_path(to)?;
        tokio::fs::rename(src, dst).await.map_err(at(src))
    }

    async fn mkdir(&self, uri: &ResourceUri, _ctx: &OpContext) -> EngineResult<()> {
        let path = local_path(uri)?;
        tokio::fs::create_dir_all(path).await.map_err(at(path))
    }

    async fn exists(&self, uri: &ResourceUri, _ctx: &OpContext) -> EngineResult<bool> {
        let path = local_path(uri)?;
        tokio::fs::try_exists(path).await.map_err(at(path))
    }
}
