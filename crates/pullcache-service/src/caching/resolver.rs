use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::TryStreamExt;
use tokio::fs::File;
use tokio::sync::watch;

use crate::download::OriginClient;

use super::error::{CacheError, CacheResult};
use super::index::{CacheIndex, ClaimToken, Lookup, PopulationOutcome};
use super::store::{ArtifactId, ArtifactStore};

/// A fully populated artifact, opened for reading.
///
/// The handle stays readable even if the sweeper evicts the entry while the
/// caller is still streaming it.
#[derive(Debug)]
pub struct ResolvedArtifact {
    pub id: ArtifactId,
    pub file: File,
    pub len: u64,
}

/// Entry point of the cache: orchestrates index lookup, single-flight
/// population and artifact delivery.
///
/// Cheap to clone; all clones share the same index and store.
#[derive(Clone)]
pub struct Resolver {
    index: Arc<CacheIndex>,
    store: Arc<ArtifactStore>,
    origin: Arc<dyn OriginClient>,
    fetch_timeout: Duration,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("entries", &self.index.len())
            .field("origin", &self.origin)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl Resolver {
    pub fn new(
        index: Arc<CacheIndex>,
        store: Arc<ArtifactStore>,
        origin: Arc<dyn OriginClient>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            index,
            store,
            origin,
            fetch_timeout,
        }
    }

    /// Resolves `key` to an opened artifact, fetching from the origin on miss.
    ///
    /// Concurrent calls for the same cold key result in exactly one origin
    /// fetch; all callers receive the same artifact, or the same error if the
    /// population attempt failed.
    pub async fn resolve(&self, key: &str) -> CacheResult<ResolvedArtifact> {
        match self.index.lookup_or_claim(key, SystemTime::now()) {
            Lookup::Hit(artifact) => {
                tracing::debug!(key, %artifact, "serving cached artifact");
                self.open(artifact).await
            }
            Lookup::InProgress(rx) => {
                let artifact = await_population(rx).await?;
                self.open(artifact).await
            }
            Lookup::Claimed(token) => {
                tracing::debug!(key, "cache miss, fetching from origin");

                // The population runs detached: if this caller disconnects
                // mid-fetch, waiters on the same key must still see the claim
                // resolve.
                let this = self.clone();
                let owned_key = key.to_owned();
                let population =
                    tokio::spawn(async move { this.populate(token, &owned_key).await });

                let artifact = match population.await {
                    Ok(result) => result?,
                    Err(_) => return Err(CacheError::InternalError),
                };
                self.open(artifact).await
            }
        }
    }

    /// Runs one population attempt and resolves the claim either way.
    async fn populate(&self, token: ClaimToken, key: &str) -> CacheResult<ArtifactId> {
        let fetch = self.fetch_into_store(key);
        let result = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.fetch_timeout)),
        };

        match result {
            Ok(artifact) => {
                if let Err(err) = self.index.complete(token, artifact) {
                    // The claim was reaped as orphaned while the fetch ran;
                    // nothing references this artifact anymore.
                    let _ = self.store.delete(artifact).await;
                    return Err(err);
                }
                tracing::debug!(key, %artifact, "populated cache entry");
                Ok(artifact)
            }
            Err(err) => {
                tracing::debug!(key, error = %err, "population failed");
                // Releases all waiters with the error and clears the entry so
                // the next request retries fresh. A reaped claim is fine here.
                let _ = self.index.fail(token, err.clone());
                Err(err)
            }
        }
    }

    /// Streams the origin's bytes into a fresh artifact and finalizes it.
    ///
    /// Any error drops the writer, which removes the staged file; partial
    /// artifacts are never published.
    async fn fetch_into_store(&self, key: &str) -> CacheResult<ArtifactId> {
        let mut stream = self.origin.fetch_stream(key).await?;
        let mut writer = self.store.create()?;

        while let Some(chunk) = stream.try_next().await? {
            writer.write(&chunk).await?;
        }

        writer.finalize().await
    }

    async fn open(&self, artifact: ArtifactId) -> CacheResult<ResolvedArtifact> {
        let file = match self.store.open(artifact).await {
            Ok(file) => file,
            Err(CacheError::NotFound) => {
                // A `Ready` entry always refers to a finalized artifact, and
                // only the sweeper deletes artifacts, together with their
                // entries. Reaching this means index and store went out of
                // sync.
                tracing::error!(%artifact, "ready entry references a missing artifact");
                return Err(CacheError::NotFound);
            }
            Err(err) => return Err(err),
        };

        let len = file.metadata().await?.len();
        Ok(ResolvedArtifact {
            id: artifact,
            file,
            len,
        })
    }
}

/// Suspends until the in-flight population for a key resolves.
async fn await_population(mut rx: watch::Receiver<PopulationOutcome>) -> CacheResult<ArtifactId> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // Claims always resolve before their channel is dropped.
            tracing::error!("population channel closed without an outcome");
            return Err(CacheError::InternalError);
        }
    }
}
