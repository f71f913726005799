//! A protocol client wired to its pool, the throttle manager and the
//! credential resolver, exposed as a URI-addressed [`RemoteFs`].
//!
//! Every operation runs the same sequence: resolve credentials, take a
//! throttle lease, check out a pooled session, lock it, run the command.
//! Network and timeout failures mark the session unhealthy so the next
//! acquire replaces it.

use crate::pool::{ConnectionPool, SessionLease};
use crate::throttle::{ConnectionThrottleManager, ThrottleLease};
use async_trait::async_trait;
use remora_core::{
    DownloadSink, EngineError, EngineResult, ErrorKind, OpContext, ProgressSink, ProtocolClient,
    RemoteFileInfo, RemoteFs, RemoteLocation, ResourceUri, Scheme, UploadSource,
};
use remora_credentials::CredentialResolver;
use std::sync::Arc;

pub struct Endpoint<C: ProtocolClient> {
    pool: Arc<ConnectionPool<C>>,
    throttle: Arc<ConnectionThrottleManager>,
    resolver: Arc<CredentialResolver>,
}

impl<C: ProtocolClient> Endpoint<C> {
    pub fn new(
        pool: Arc<ConnectionPool<C>>,
        throttle: Arc<ConnectionThrottleManager>,
        resolver: Arc<CredentialResolver>,
    ) -> Self {
        Self {
            pool,
            throttle,
            resolver,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    fn client(&self) -> &C {
        self.pool.client()
    }

    fn location<'a>(&self, uri: &'a ResourceUri) -> EngineResult<&'a RemoteLocation> {
        let protocol = self.client().protocol();
        match uri.as_remote() {
            Some(loc) if loc.protocol == protocol => Ok(loc),
            _ => Err(EngineError::invalid_input(format!(
                "{} is not a {} resource",
                uri, protocol
            ))),
        }
    }

    async fn checkout(
        &self,
        loc: &RemoteLocation,
        ctx: &OpContext,
    ) -> EngineResult<(ThrottleLease, SessionLease<C>)> {
        let credentials = self
            .resolver
            .resolve(&loc.host, &loc.share, ctx.credential_id.as_deref())
            .await?;
        let descriptor = loc.descriptor(&credentials.username, credentials.domain.as_deref());
        let throttle = self
            .throttle
            .acquire(loc.protocol, &loc.resource_key(), ctx.priority)
            .await?;
        let lease = self.pool.acquire(&descriptor, &credentials).await?;
        Ok((throttle, lease))
    }

    /// Propagate session health from the outcome of one command.
    fn settle<T>(
        &self,
        lease: &SessionLease<C>,
        session: &C::Session,
        result: EngineResult<T>,
    ) -> EngineResult<T> {
        let broken = matches!(
            &result,
            Err(e) if matches!(e.kind, ErrorKind::NetworkUnreachable | ErrorKind::Timeout)
        );
        if broken || !self.client().is_healthy(session) {
            lease.mark_unhealthy();
        }
        result
    }

    /// Connect with the resolved credentials, probe, and disconnect. Bypasses
    /// the pool so a stale pooled session cannot mask a failure.
    pub async fn test_connection(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<bool> {
        let loc = self.location(uri)?;
        let credentials = self
            .resolver
            .resolve(&loc.host, &loc.share, ctx.credential_id.as_deref())
            .await?;
        let descriptor = loc.descriptor(&credentials.username, credentials.domain.as_deref());
        let _throttle = self
            .throttle
            .acquire(loc.protocol, &loc.resource_key(), ctx.priority)
            .await?;
        self.client().test_connection(&descriptor, &credentials).await
    }
}

#[async_trait]
impl<C: ProtocolClient> RemoteFs for Endpoint<C> {
    fn scheme(&self) -> Scheme {
        self.client().protocol().scheme()
    }

    async fn list(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<Vec<RemoteFileInfo>> {
        let loc = self.location(uri)?;
        let (_throttle, lease) = self.checkout(loc, ctx).await?;
        let mut session = lease.lock().await?;
        let result = self.client().list(&mut session, &loc.path).await;
        self.settle(&lease, &session, result)
    }

    async fn download(
        &self,
        uri: &ResourceUri,
        sink: DownloadSink<'_>,
        progress: Option<&ProgressSink>,
        ctx: &OpContext,
    ) -> EngineResult<u64> {
        let loc = self.location(uri)?;
        let (_throttle, lease) = self.checkout(loc, ctx).await?;
        let mut session = lease.lock().await?;
        let result = self
            .client()
            .download(&mut session, &loc.path, sink, progress)
            .await;
        self.settle(&lease, &session, result)
    }

    async fn upload(
        &self,
        uri: &ResourceUri,
        source: UploadSource<'_>,
        size: Option<u64>,
        progress: Option<&ProgressSink>,
        ctx: &OpContext,
    ) -> EngineResult<u64> {
        let loc = self.location(uri)?;
        let (_throttle, lease) = self.checkout(loc, ctx).await?;
        let mut session = lease.lock().await?;
        let result = self
            .client()
            .upload(&mut session, &loc.path, source, size, progress)
            .await;
        self.settle(&lease, &session, result)
    }

    async fn delete(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<()> {
        let loc = self.location(uri)?;
        let (_throttle, lease) = self.checkout(loc, ctx).await?;
        let mut session = lease.lock().await?;
        let result = self.client().delete(&mut session, &loc.path).await;
        self.settle(&lease, &session, result)
    }

    async fn rename(&self, from: &ResourceUri, to: &ResourceUri, ctx: &OpContext) -> EngineResult<()> {
        let src = self.location(from)?;
        let dst = self.location(to)?;
        if !src.same_endpoint(dst) {
            return Err(EngineError::invalid_input(format!(
                "Cannot rename across endpoints: {} -> {}",
                from, to
            )));
        }
        let (_throttle, lease) = self.checkout(src, ctx).await?;
        let mut session = lease.lock().await?;
        let result = self.client().rename(&mut session, &src.path, &dst.path).await;
        self.settle(&lease, &session, result)
    }

    async fn mkdir(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<()> {
        let loc = self.location(uri)?;
        let (_throttle, lease) = self.checkout(loc, ctx).await?;
        let mut session = lease.lock().await?;
        let result = self.client().mkdir(&mut session, &loc.path).await;
        self.settle(&lease, &session, result)
    }

    async fn exists(&self, uri: &ResourceUri, ctx: &OpContext) -> EngineResult<bool> {
        let loc = self.location(uri)?;
        let (_throttle, lease) = self.checkout(loc, ctx).await?;
        let mut session = lease.lock().await?;
        let result = self.client().exists(&mut session, &loc.path).await;
        self.settle(&lease, &session, result)
    }
}
