use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use uuid::Uuid;

use super::error::{CacheError, CacheResult};
use super::store::ArtifactId;

/// Extra slack granted to `Pending` entries before the sweeper reaps them.
///
/// A claim normally resolves within the fetch timeout. A claim that outlives
/// the retention window by this much belongs to a population attempt that
/// died without completing or failing, and is removed so the key recovers.
const ORPHANED_CLAIM_GRACE: Duration = Duration::from_secs(15 * 60);

/// The resolution of a population attempt, broadcast to all waiters.
///
/// `None` while the fetch is still in flight.
pub type PopulationOutcome = Option<CacheResult<ArtifactId>>;

/// Exclusive right to populate the entry for one key.
///
/// Tokens are handed out by [`CacheIndex::lookup_or_claim`] and consumed by
/// [`CacheIndex::complete`] or [`CacheIndex::fail`], so a claim cannot be
/// resolved twice.
#[derive(Debug)]
pub struct ClaimToken {
    key: String,
    claim_id: Uuid,
}

/// Result of an atomic index lookup.
#[derive(Debug)]
pub enum Lookup {
    /// A `Ready` entry exists; serve its artifact.
    Hit(ArtifactId),
    /// No entry existed. The caller now holds the only claim for the key and
    /// must populate it, then `complete` or `fail` the token.
    Claimed(ClaimToken),
    /// Another population for this key is in flight; await the outcome on the
    /// channel instead of fetching again.
    InProgress(watch::Receiver<PopulationOutcome>),
}

enum EntryState {
    Pending {
        claim_id: Uuid,
        outcome: watch::Sender<PopulationOutcome>,
    },
    Ready {
        artifact: ArtifactId,
    },
}

struct CacheEntry {
    /// Set when the key is first claimed, not when population completes.
    created_at: SystemTime,
    state: EntryState,
}

/// The single source of truth for cache entry state.
///
/// Maps request keys to entries and enforces the single-flight discipline: at
/// most one entry per key, at most one outstanding claim per entry. All
/// operations take the lock once and are atomic with respect to each other.
pub struct CacheIndex {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for CacheIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("CacheIndex").field("entries", &entries).finish()
    }
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheIndex {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up `key`, claiming it if no entry exists.
    ///
    /// `now` becomes the entry's creation time when a claim is handed out.
    pub fn lookup_or_claim(&self, key: &str, now: SystemTime) -> Lookup {
        let mut entries = self.entries.lock().unwrap();

        match entries.entry(key.to_owned()) {
            MapEntry::Occupied(occupied) => match &occupied.get().state {
                EntryState::Ready { artifact } => Lookup::Hit(*artifact),
                EntryState::Pending { outcome, .. } => Lookup::InProgress(outcome.subscribe()),
            },
            MapEntry::Vacant(vacant) => {
                let claim_id = Uuid::new_v4();
                let (outcome, _) = watch::channel(None);
                vacant.insert(CacheEntry {
                    created_at: now,
                    state: EntryState::Pending { claim_id, outcome },
                });
                Lookup::Claimed(ClaimToken {
                    key: key.to_owned(),
                    claim_id,
                })
            }
        }
    }

    /// Transitions the claimed entry to `Ready` and notifies all waiters.
    ///
    /// The artifact must be fully durable before this is called. Returns
    /// [`CacheError::InvalidToken`] if the claim no longer matches, e.g.
    /// because the sweeper reaped it as orphaned in the meantime.
    pub fn complete(&self, token: ClaimToken, artifact: ArtifactId) -> CacheResult<()> {
        let mut entries = self.entries.lock().unwrap();

        let Some(entry) = entries.get_mut(&token.key) else {
            return Err(CacheError::InvalidToken);
        };
        if !token.matches(&entry.state) {
            return Err(CacheError::InvalidToken);
        }

        let prev = std::mem::replace(&mut entry.state, EntryState::Ready { artifact });
        if let EntryState::Pending { outcome, .. } = prev {
            outcome.send_replace(Some(Ok(artifact)));
        }
        Ok(())
    }

    /// Records a failed population attempt and removes the entry.
    ///
    /// The error is broadcast to all waiters; the next lookup for this key
    /// returns a fresh claim, so failures are never sticky.
    pub fn fail(&self, token: ClaimToken, error: CacheError) -> CacheResult<()> {
        let mut entries = self.entries.lock().unwrap();

        let MapEntry::Occupied(occupied) = entries.entry(token.key.clone()) else {
            return Err(CacheError::InvalidToken);
        };
        if !token.matches(&occupied.get().state) {
            return Err(CacheError::InvalidToken);
        }

        let removed = occupied.remove();
        if let EntryState::Pending { outcome, .. } = removed.state {
            outcome.send_replace(Some(Err(error)));
        }
        Ok(())
    }

    /// Atomically removes all entries older than `max_age` as of `now`.
    ///
    /// Returns the artifact ids of evicted `Ready` entries for deletion by
    /// the caller. `Pending` entries get [`ORPHANED_CLAIM_GRACE`] on top of
    /// `max_age`; reaped claims release their waiters with a timeout error.
    pub fn evict_older_than(&self, max_age: Duration, now: SystemTime) -> Vec<ArtifactId> {
        let stale_claim_age = max_age + ORPHANED_CLAIM_GRACE;
        let mut evicted = Vec::new();

        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_key, entry| {
            let age = now
                .duration_since(entry.created_at)
                .unwrap_or(Duration::ZERO);
            match &entry.state {
                EntryState::Ready { artifact } => {
                    if age > max_age {
                        evicted.push(*artifact);
                        false
                    } else {
                        true
                    }
                }
                EntryState::Pending { outcome, .. } => {
                    if age > stale_claim_age {
                        outcome.send_replace(Some(Err(CacheError::Timeout(stale_claim_age))));
                        false
                    } else {
                        true
                    }
                }
            }
        });

        evicted
    }

    /// Number of entries currently in the index.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClaimToken {
    fn matches(&self, state: &EntryState) -> bool {
        matches!(state, EntryState::Pending { claim_id, .. } if *claim_id == self.claim_id)
    }
}
