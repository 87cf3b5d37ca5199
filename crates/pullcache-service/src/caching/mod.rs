//! # The pullcache caching engine
//!
//! This module contains everything that maps request keys to on-disk
//! artifacts: the [`CacheIndex`], the [`ArtifactStore`], the [`Resolver`]
//! and the eviction [`Sweeper`], along with the central [`CacheError`] type.
//!
//! ## Entry lifecycle
//!
//! A request key is either unknown, being populated, or ready:
//!
//! - The first resolver to ask for an unknown key receives a [`ClaimToken`]
//!   and becomes responsible for populating the entry. The entry is created
//!   in a pending state at that moment, which is also when its age starts
//!   counting.
//! - Everyone else asking for the key while the fetch is in flight gets a
//!   channel on which the outcome is broadcast. There is never more than one
//!   outbound fetch per key.
//! - On success the artifact is flushed, fsynced and atomically renamed into
//!   the artifact directory *before* the entry becomes ready, so a ready
//!   entry always refers to complete bytes.
//! - On failure the entry is removed in the same step that broadcasts the
//!   error. Failures are never cached; the next request starts over.
//!
//! ## Eviction
//!
//! The [`Sweeper`] periodically removes ready entries older than the
//! retention window and deletes their artifacts. Pending entries get a grace
//! period on top, after which they are treated as orphaned claims from a
//! dead population attempt and reaped, releasing any waiters. Nothing on the
//! read path ever evicts.
//!
//! ## Errors
//!
//! [`CacheError`] is the typed outcome of every fallible operation here. It
//! is cloneable because a single population failure is delivered to the
//! claiming caller and to every waiter on the same key.

mod error;
mod index;
mod resolver;
mod store;
mod sweeper;

#[cfg(test)]
mod tests;

pub use error::{CacheError, CacheResult};
pub use index::{CacheIndex, ClaimToken, Lookup, PopulationOutcome};
pub use resolver::{ResolvedArtifact, Resolver};
pub use store::{ArtifactId, ArtifactStore, ArtifactWriter};
pub use sweeper::{SweepStats, Sweeper};
