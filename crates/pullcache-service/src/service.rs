//! Construction of the shared pullcache service.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::{
    ArtifactStore, CacheIndex, CacheResult, ResolvedArtifact, Resolver, Sweeper,
};
use crate::config::Config;
use crate::download::{HttpDownloader, OriginClient};

/// The shared service handle used by the request-handling layer.
///
/// Owns the cache engine's lifecycle: the index and store are created here,
/// handed to the resolver and the sweeper, and torn down when the last clone
/// is dropped.
#[derive(Debug, Clone)]
pub struct PullService {
    resolver: Resolver,
}

impl PullService {
    /// Creates the cache engine and spawns the eviction sweeper.
    ///
    /// Must be called from within a tokio runtime, which the sweeper task is
    /// spawned onto.
    pub async fn create(config: Config) -> Result<Self> {
        let store =
            Arc::new(ArtifactStore::new(&config.cache_dir).context("failed to create artifact store")?);
        // The index is in-memory; artifacts from a previous process are
        // unreachable and only take up space.
        store.clear().context("failed to clear artifact storage")?;

        let index = Arc::new(CacheIndex::new());

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context("failed to create origin HTTP client")?;
        let origin: Arc<dyn OriginClient> = Arc::new(HttpDownloader::new(client));

        let resolver = Resolver::new(
            Arc::clone(&index),
            Arc::clone(&store),
            origin,
            config.fetch_timeout,
        );

        let sweeper = Sweeper::new(index, store, config.retention_window);
        tokio::spawn(sweeper.run(config.sweep_interval()));

        tracing::info!(
            cache_dir = %config.cache_dir.display(),
            retention_window = ?config.retention_window,
            "created cache service"
        );

        Ok(Self { resolver })
    }

    /// Resolves a request key to an opened artifact.
    ///
    /// See [`Resolver::resolve`] for the exact semantics.
    pub async fn resolve(&self, key: &str) -> CacheResult<ResolvedArtifact> {
        self.resolver.resolve(key).await
    }
}
