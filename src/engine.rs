//! The engine facade: one object that owns every shared component.
//!
//! Nothing here is global. [`RemoteEngine::new`] builds the throttle
//! manager, the per-protocol pools, the credential resolver, the cache and
//! the transfer registry; [`RemoteEngine::shutdown`] tears them down.

use crate::clients::RemoteClient;
use crate::config::EngineConfig;
use remora_core::{
    progress_channel, CancellationToken, EngineError, EngineResult, OpContext, ProgressSink,
    ProgressStream, Protocol, RemoteFileInfo, RemoteFs, ResourceUri,
};
use remora_credentials::{
    CredentialResolver, CredentialStore, DefaultCredentials, InMemoryCredentialStore,
    JsonFileCredentialStore, PasswordCipher,
};
use remora_ftp::FtpClient;
use remora_pool::{
    spawn_pruning, ConnectionPool, ConnectionThrottleManager, Endpoint, GateStats, PoolStats,
};
use remora_scanner::MediaScanner;
use remora_sftp::SftpClient;
use remora_smb::SmbClient;
use remora_transfer::{FsTable, LocalFs, TransferJob, TransferRegistry, UnifiedFileCache};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub struct RemoteEngine {
    config: EngineConfig,
    throttle: Arc<ConnectionThrottleManager>,
    resolver: Arc<CredentialResolver>,
    clients: Vec<Arc<RemoteClient>>,
    filesystems: Arc<FsTable>,
    cache: Arc<UnifiedFileCache>,
    transfers: TransferRegistry,
    shutdown: CancellationToken,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl RemoteEngine {
    /// Build an engine whose credential store is the JSON file named in the
    /// configuration, or an in-memory store when none is configured.
    pub async fn new(config: EngineConfig, master_secret: &SecretString) -> EngineResult<Self> {
        let store: Arc<dyn CredentialStore> = match &config.credentials.store_path {
            Some(path) => Arc::new(JsonFileCredentialStore::open(path).await?),
            None => Arc::new(InMemoryCredentialStore::new()),
        };
        Self::with_store(config, store, master_secret).await
    }

    /// Build an engine over a caller-supplied credential store.
    pub async fn with_store(
        config: EngineConfig,
        store: Arc<dyn CredentialStore>,
        master_secret: &SecretString,
    ) -> EngineResult<Self> {
        let cipher = Arc::new(PasswordCipher::from_master(
            master_secret,
            config.credentials.pbkdf2_iterations,
        ));
        let resolver = Arc::new(CredentialResolver::new(
            store,
            cipher,
            DefaultCredentials {
                username: config.credentials.default_username.clone(),
                password: config.credentials.default_password.clone(),
            },
        )?);
        let throttle = Arc::new(ConnectionThrottleManager::new(config.throttle.clone()));

        let clients: Vec<Arc<RemoteClient>> = vec![
            Arc::new(RemoteClient::Smb(Endpoint::new(
                Arc::new(ConnectionPool::new(
                    Arc::new(SmbClient::new(config.smb.clone())),
                    config.pool.clone(),
                )),
                throttle.clone(),
                resolver.clone(),
            ))),
            Arc::new(RemoteClient::Sftp(Endpoint::new(
                Arc::new(ConnectionPool::new(
                    Arc::new(SftpClient::new(config.sftp.clone())),
                    config.pool.clone(),
                )),
                throttle.clone(),
                resolver.clone(),
            ))),
            Arc::new(RemoteClient::Ftp(Endpoint::new(
                Arc::new(ConnectionPool::new(
                    Arc::new(FtpClient::new(config.ftp.clone())),
                    config.pool.clone(),
                )),
                throttle.clone(),
                resolver.clone(),
            ))),
        ];

        let mut table = FsTable::new();
        table.insert(Arc::new(LocalFs::new()));
        for client in &clients {
            table.insert(client.clone());
        }
        let filesystems = Arc::new(table);

        let cache = Arc::new(UnifiedFileCache::new(&config.cache_dir)?);
        let transfers = TransferRegistry::standard(filesystems.clone(), cache.clone())?;

        let shutdown = CancellationToken::new();
        let mut maintenance: Vec<JoinHandle<()>> = clients
            .iter()
            .map(|c| c.spawn_maintenance(shutdown.clone()))
            .collect();
        maintenance.push(spawn_pruning(
            throttle.clone(),
            config.pool.maintenance_interval(),
            shutdown.clone(),
        ));

        tracing::info!(cache = %config.cache_dir.display(), "remote engine started");
        Ok(Self {
            config,
            throttle,
            resolver,
            clients,
            filesystems,
            cache,
            transfers,
            shutdown,
            maintenance: Mutex::new(maintenance),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<UnifiedFileCache> {
        &self.cache
    }

    pub fn transfers(&self) -> &TransferRegistry {
        &self.transfers
    }

    /// The filesystem serving `uri`. `cloud://` resources have none.
    pub fn filesystem(&self, uri: &ResourceUri) -> EngineResult<Arc<dyn RemoteFs>> {
        self.filesystems.get(uri.scheme())
    }

    /// Progress channel with the configured publish interval.
    pub fn progress_channel(&self) -> (ProgressSink, ProgressStream) {
        progress_channel(self.config.progress_interval())
    }

    pub async fn list(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<Vec<RemoteFileInfo>> {
        self.filesystem(uri)?.list(uri, ctx).await
    }

    /// A scanner over the filesystem that serves `root`.
    pub fn scanner(&self, root: &ResourceUri) -> EngineResult<MediaScanner> {
        Ok(MediaScanner::new(self.filesystem(root)?))
    }

    /// Run a prepared copy or move job.
    pub async fn transfer(&self, job: &TransferJob<'_>) -> EngineResult<bool> {
        self.transfers.transfer(job).await
    }

    pub async fn copy(
        &self,
        source: &ResourceUri,
        dest: &ResourceUri,
        overwrite: bool,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<bool> {
        let mut job = TransferJob::copy(source.clone(), dest.clone()).with_overwrite(overwrite);
        job.progress = progress;
        self.transfer(&job).await
    }

    pub async fn move_file(
        &self,
        source: &ResourceUri,
        dest: &ResourceUri,
        overwrite: bool,
        progress: Option<&ProgressSink>,
    ) -> EngineResult<bool> {
        let mut job = TransferJob::moving(source.clone(), dest.clone()).with_overwrite(overwrite);
        job.progress = progress;
        self.transfer(&job).await
    }

    /// Check that `uri` is reachable with the credentials that would be used
    /// for it. Remote endpoints get a fresh connect/probe/close, bypassing
    /// the pool.
    pub async fn test_connection(&self, uri: &ResourceUri, credential_id: Option<&str>) -> EngineResult<bool> {
        let mut ctx = OpContext::interactive();
        ctx.credential_id = credential_id.map(str::to_string);
        match uri {
            ResourceUri::Remote(loc) => {
                let client = self.client(loc.protocol)?;
                let ok = client.test_connection(uri, &ctx).await?;
                tracing::info!(uri = %uri, ok, "connection test");
                Ok(ok)
            }
            ResourceUri::Local(_) => self.filesystem(uri)?.exists(uri, &ctx).await,
            ResourceUri::Cloud { .. } => Err(EngineError::unsupported(format!(
                "{} has no client in this engine",
                uri
            ))),
        }
    }

    /// Download `uri` into the cache for local editing and return the local
    /// path. Replaces any earlier cached copy.
    pub async fn open_for_edit(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<PathBuf> {
        let fs = self.filesystem(uri)?;
        let key = uri.to_string();
        let mut part = self.cache.open_part(&key).await?;
        fs.download(uri, part.file_mut(), None, ctx).await?;
        let path = part.commit().await?;
        tracing::debug!(uri = %uri, path = %path.display(), "opened for edit");
        Ok(path)
    }

    /// Upload the cached copy of `uri` back to where it came from.
    pub async fn commit_edit(
        &self,
        uri: &ResourceUri,
        progress: Option<&ProgressSink>,
        ctx: &OpContext,
    ) -> EngineResult<u64> {
        let key = uri.to_string();
        let path = self
            .cache
            .cached_path(&key)
            .await
            .ok_or_else(|| EngineError::not_found(format!("{} is not open for editing", uri)))?;
        let fs = self.filesystem(uri)?;
        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        let written = fs.upload(uri, &mut file, Some(size), progress, ctx).await?;
        tracing::info!(uri = %uri, bytes = written, "edit committed");
        Ok(written)
    }

    pub async fn pool_stats(&self) -> Vec<(Protocol, PoolStats)> {
        let mut out = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            out.push((client.protocol(), client.pool_stats().await));
        }
        out
    }

    pub fn throttle_stats(&self) -> Vec<GateStats> {
        self.throttle.stats()
    }

    /// Stop pool maintenance and gate pruning, then close every pooled
    /// session. The engine stays usable; later operations open new sessions.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = match self.maintenance.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "pool maintenance task ended abnormally");
            }
        }
        for client in &self.clients {
            client.close_all().await;
        }
        tracing::info!("remote engine shut down");
    }

    fn client(&self, protocol: Protocol) -> EngineResult<&Arc<RemoteClient>> {
        self.clients
            .iter()
            .find(|c| c.protocol() == protocol)
            .ok_or_else(|| EngineError::unsupported(format!("no {} client", protocol)))
    }
}
