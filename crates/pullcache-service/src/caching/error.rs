use std::time::Duration;

use thiserror::Error;

/// An error that happens while populating or reading a cache entry.
///
/// Population failures are broadcast to every caller waiting on the same
/// key, which is why this type is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// An artifact was referenced from the index but is absent from the store.
    ///
    /// This should not occur under correct operation and is treated as an
    /// internal-invariant violation when observed.
    #[error("artifact missing from the store")]
    NotFound,
    /// The origin could not be reached due to a transport problem, like
    /// connection loss, DNS resolution, or an invalid URL.
    ///
    /// The attached string contains the underlying transport error.
    #[error("origin unreachable: {0}")]
    Unreachable(String),
    /// The origin responded, but with a non-success status.
    ///
    /// The attached string contains the origin's status line.
    #[error("origin responded with {0}")]
    Origin(String),
    /// Writing the artifact to scratch storage failed.
    #[error("storage write failed: {0}")]
    WriteFailure(String),
    /// The population attempt did not finish within the configured bound.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The claim token no longer matches its cache entry.
    ///
    /// Seen when a claim was reaped as orphaned before its population
    /// attempt resolved, or on a spurious double completion.
    #[error("claim token does not match the current claim")]
    InvalidToken,
    /// An unexpected error in pullcache itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        let dynerr: &dyn std::error::Error = &err; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr, "artifact storage error");
        Self::WriteFailure(err.to_string())
    }
}

/// The result of a cache operation, either `Ok(T)` or a [`CacheError`]
/// denoting why an entry could not be populated or served.
pub type CacheResult<T = ()> = Result<T, CacheError>;
