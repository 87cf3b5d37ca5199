//! Streaming access to the origins of cached resources.
//!
//! The cache core only depends on the [`OriginClient`] trait; the production
//! implementation is [`HttpDownloader`], which streams response bodies over a
//! shared reqwest client.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::caching::{CacheError, CacheResult};

mod http;

pub use self::http::HttpDownloader;

/// User agent the downloader identifies as.
pub const USER_AGENT: &str = concat!("pullcache/", env!("CARGO_PKG_VERSION"));

/// A stream of artifact bytes from an origin.
///
/// Transport failures during the transfer surface as stream items.
pub type ByteStream = BoxStream<'static, CacheResult<Bytes>>;

/// Streaming transport to an origin server.
///
/// Implementations must not buffer whole payloads; the resolver writes chunks
/// to scratch storage as they arrive.
#[async_trait]
pub trait OriginClient: fmt::Debug + Send + Sync {
    /// Opens a streaming read for the resource at `url`.
    ///
    /// An origin that answers with a non-success status is an
    /// [`Origin`](CacheError::Origin) error, distinct from transport-level
    /// [`Unreachable`](CacheError::Unreachable) failures.
    async fn fetch_stream(&self, url: &str) -> CacheResult<ByteStream>;
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        // The innermost source is the most useful part of reqwest's error
        // chains.
        let mut source: &dyn std::error::Error = &error;
        while let Some(inner) = source.source() {
            source = inner;
        }
        Self::Unreachable(source.to_string())
    }
}
