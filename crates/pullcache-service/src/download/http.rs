//! Support to download from HTTP origins.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Url, header};

use crate::caching::{CacheError, CacheResult};

use super::{ByteStream, OriginClient, USER_AGENT};

/// Downloader implementation for HTTP(S) origins.
#[derive(Debug)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OriginClient for HttpDownloader {
    async fn fetch_stream(&self, url: &str) -> CacheResult<ByteStream> {
        let url = Url::parse(url)
            .map_err(|e| CacheError::Unreachable(format!("invalid origin URL: {e}")))?;

        tracing::debug!(%url, "fetching resource from origin");

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Origin(status.to_string()));
        }

        Ok(response.bytes_stream().map_err(CacheError::from).boxed())
    }
}
