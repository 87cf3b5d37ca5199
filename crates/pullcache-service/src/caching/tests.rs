use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncReadExt;

use crate::download::{ByteStream, OriginClient};

use super::*;

const KEY: &str = "http://origin.test/a.png";
const CHUNK: usize = 64 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const RETENTION: Duration = Duration::from_secs(2 * 3600);

/// A scriptable origin: serves canned payloads in chunks, counts fetches, and
/// can inject latency, pre-stream failures and mid-stream disconnects.
#[derive(Debug, Default)]
struct StubOrigin {
    payloads: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
    /// Fail this many fetches before serving normally.
    fail_first: AtomicUsize,
    /// Cut the stream with a transport error after this many chunks.
    truncate_after: Mutex<Option<usize>>,
}

impl StubOrigin {
    fn new() -> Self {
        Default::default()
    }

    fn with_payload(mut self, key: &str, payload: Vec<u8>) -> Self {
        self.payloads.insert(key.to_owned(), payload);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_failures(self, count: usize) -> Self {
        self.fail_first.store(count, Ordering::SeqCst);
        self
    }

    fn with_truncation(self, chunks: usize) -> Self {
        *self.truncate_after.lock().unwrap() = Some(chunks);
        self
    }

    fn heal(&self) {
        *self.truncate_after.lock().unwrap() = None;
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginClient for StubOrigin {
    async fn fetch_stream(&self, url: &str) -> CacheResult<ByteStream> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CacheError::Origin("503 Service Unavailable".into()));
        }

        let Some(payload) = self.payloads.get(url) else {
            return Err(CacheError::Origin("404 Not Found".into()));
        };

        let mut chunks: Vec<CacheResult<Bytes>> = payload
            .chunks(CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if let Some(after) = *self.truncate_after.lock().unwrap() {
            chunks.truncate(after);
            chunks.push(Err(CacheError::Unreachable("connection reset".into())));
        }

        Ok(futures::stream::iter(chunks).boxed())
    }
}

struct TestCache {
    dir: tempfile::TempDir,
    origin: Arc<StubOrigin>,
    index: Arc<CacheIndex>,
    store: Arc<ArtifactStore>,
    resolver: Resolver,
}

impl TestCache {
    fn new(origin: StubOrigin) -> Self {
        Self::with_fetch_timeout(origin, FETCH_TIMEOUT)
    }

    fn with_fetch_timeout(origin: StubOrigin, fetch_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()).unwrap());
        let index = Arc::new(CacheIndex::new());
        let origin = Arc::new(origin);
        let resolver = Resolver::new(
            Arc::clone(&index),
            Arc::clone(&store),
            Arc::clone(&origin) as Arc<dyn OriginClient>,
            fetch_timeout,
        );

        Self {
            dir,
            origin,
            index,
            store,
            resolver,
        }
    }

    fn sweeper(&self) -> Sweeper {
        Sweeper::new(Arc::clone(&self.index), Arc::clone(&self.store), RETENTION)
    }

    fn stored_artifacts(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("artifacts"))
            .unwrap()
            .count()
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("tmp")).unwrap().count()
    }
}

async fn read_all(artifact: &mut ResolvedArtifact) -> Vec<u8> {
    let mut buf = Vec::new();
    artifact.file.read_to_end(&mut buf).await.unwrap();
    buf
}

fn payload_of_size(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_miss_then_hit() {
    let payload = b"pretend this is a png".to_vec();
    let cache = TestCache::new(StubOrigin::new().with_payload(KEY, payload.clone()));

    let mut first = cache.resolver.resolve(KEY).await.unwrap();
    assert_eq!(cache.origin.fetches(), 1);
    assert_eq!(first.len, payload.len() as u64);
    assert_eq!(read_all(&mut first).await, payload);

    // Served from disk, without a second origin fetch.
    let mut second = cache.resolver.resolve(KEY).await.unwrap();
    assert_eq!(cache.origin.fetches(), 1);
    assert_eq!(second.id, first.id);
    assert_eq!(read_all(&mut second).await, payload);
}

#[tokio::test]
async fn test_round_trip_streaming_boundaries() {
    // Zero bytes, a single byte, and a payload spanning many chunks.
    for size in [0, 1, 5 * 1024 * 1024] {
        let payload = payload_of_size(size);
        let cache = TestCache::new(StubOrigin::new().with_payload(KEY, payload.clone()));

        let mut artifact = cache.resolver.resolve(KEY).await.unwrap();
        assert_eq!(artifact.len, size as u64);
        assert_eq!(read_all(&mut artifact).await, payload);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_flight() {
    let payload = payload_of_size(1024 * 1024);
    let origin = StubOrigin::new()
        .with_payload(KEY, payload.clone())
        .with_delay(Duration::from_millis(100));
    let cache = TestCache::new(origin);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let resolver = cache.resolver.clone();
            tokio::spawn(async move {
                let mut artifact = resolver.resolve(KEY).await.unwrap();
                (artifact.id, read_all(&mut artifact).await)
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let (id, bytes) = task.await.unwrap();
        assert_eq!(bytes, payload);
        ids.push(id);
    }

    // All callers got the same artifact, produced by exactly one fetch.
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(cache.origin.fetches(), 1);
    assert_eq!(cache.stored_artifacts(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unrelated_keys_do_not_block_each_other() {
    let other = "http://origin.test/b.png";
    let origin = StubOrigin::new()
        .with_payload(KEY, b"a".to_vec())
        .with_payload(other, b"b".to_vec())
        .with_delay(Duration::from_millis(50));
    let cache = TestCache::new(origin);

    let (a, b) = tokio::join!(cache.resolver.resolve(KEY), cache.resolver.resolve(other));
    assert_eq!(read_all(&mut a.unwrap()).await, b"a");
    assert_eq!(read_all(&mut b.unwrap()).await, b"b");
    assert_eq!(cache.origin.fetches(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_population_failure_reaches_all_waiters() {
    let origin = StubOrigin::new()
        .with_payload(KEY, b"eventually fine".to_vec())
        .with_delay(Duration::from_millis(300))
        .with_failures(1);
    let cache = TestCache::new(origin);

    let resolver = cache.resolver.clone();
    let claimer = tokio::spawn(async move { resolver.resolve(KEY).await.map(|a| a.id) });

    // Attach waiters while the failing fetch is still in flight.
    while cache.origin.fetches() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let resolver = cache.resolver.clone();
            tokio::spawn(async move { resolver.resolve(KEY).await.map(|a| a.id) })
        })
        .collect();

    let expected = CacheError::Origin("503 Service Unavailable".into());
    assert_eq!(claimer.await.unwrap().unwrap_err(), expected);
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().unwrap_err(), expected);
    }
    assert_eq!(cache.origin.fetches(), 1);
    assert!(cache.index.is_empty());
}

#[tokio::test]
async fn test_retry_after_failure() {
    let payload = b"second time lucky".to_vec();
    let origin = StubOrigin::new()
        .with_payload(KEY, payload.clone())
        .with_failures(1);
    let cache = TestCache::new(origin);

    let err = cache.resolver.resolve(KEY).await.unwrap_err();
    assert_eq!(err, CacheError::Origin("503 Service Unavailable".into()));
    assert!(cache.index.is_empty());

    // The failure was not cached; the next request goes back to the origin.
    let mut artifact = cache.resolver.resolve(KEY).await.unwrap();
    assert_eq!(read_all(&mut artifact).await, payload);
    assert_eq!(cache.origin.fetches(), 2);
}

#[tokio::test]
async fn test_no_partial_exposure() {
    let payload = payload_of_size(5 * CHUNK);
    let origin = StubOrigin::new()
        .with_payload(KEY, payload.clone())
        .with_truncation(2);
    let cache = TestCache::new(origin);

    let err = cache.resolver.resolve(KEY).await.unwrap_err();
    assert_eq!(err, CacheError::Unreachable("connection reset".into()));

    // The truncated bytes were never published, nor left staged.
    assert!(cache.index.is_empty());
    assert_eq!(cache.stored_artifacts(), 0);
    assert_eq!(cache.staged_files(), 0);

    // Once the origin recovers, a full artifact is served.
    cache.origin.heal();
    let mut artifact = cache.resolver.resolve(KEY).await.unwrap();
    assert_eq!(read_all(&mut artifact).await, payload);
    assert_eq!(cache.origin.fetches(), 2);
}

#[tokio::test]
async fn test_fetch_timeout() {
    let origin = StubOrigin::new()
        .with_payload(KEY, b"too slow".to_vec())
        .with_delay(Duration::from_millis(200));
    let cache = TestCache::with_fetch_timeout(origin, Duration::from_millis(50));

    let err = cache.resolver.resolve(KEY).await.unwrap_err();
    assert_eq!(err, CacheError::Timeout(Duration::from_millis(50)));

    // The timed-out attempt leaves nothing behind.
    assert!(cache.index.is_empty());
    assert_eq!(cache.stored_artifacts(), 0);
}

#[tokio::test]
async fn test_eviction_scenario() {
    let payload = payload_of_size(5 * 1024 * 1024);
    let cache = TestCache::new(StubOrigin::new().with_payload(KEY, payload.clone()));
    let sweeper = cache.sweeper();

    // First call populates the cache.
    let mut artifact = cache.resolver.resolve(KEY).await.unwrap();
    assert_eq!(read_all(&mut artifact).await, payload);
    assert_eq!(cache.origin.fetches(), 1);

    // Within the retention window the entry survives a sweep and is served
    // without touching the origin.
    let stats = sweeper.sweep(SystemTime::now()).await;
    assert_eq!(stats, SweepStats::default());
    cache.resolver.resolve(KEY).await.unwrap();
    assert_eq!(cache.origin.fetches(), 1);

    // Past the retention window the sweep evicts entry and artifact.
    let past_retention = SystemTime::now() + RETENTION + Duration::from_secs(1);
    let stats = sweeper.sweep(past_retention).await;
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.delete_failures, 0);
    assert!(cache.index.is_empty());
    assert_eq!(cache.stored_artifacts(), 0);

    // The next request populates afresh.
    let mut artifact = cache.resolver.resolve(KEY).await.unwrap();
    assert_eq!(read_all(&mut artifact).await, payload);
    assert_eq!(cache.origin.fetches(), 2);
}

#[tokio::test]
async fn test_eviction_keeps_open_readers_intact() {
    let payload = payload_of_size(3 * CHUNK);
    let cache = TestCache::new(StubOrigin::new().with_payload(KEY, payload.clone()));
    let sweeper = cache.sweeper();

    let mut artifact = cache.resolver.resolve(KEY).await.unwrap();

    // Evict while the reader still holds the open handle.
    let past_retention = SystemTime::now() + RETENTION + Duration::from_secs(1);
    assert_eq!(sweeper.sweep(past_retention).await.evicted, 1);
    assert_eq!(cache.stored_artifacts(), 0);

    // The unlinked file remains fully readable.
    assert_eq!(read_all(&mut artifact).await, payload);
}
