use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Response, StatusCode, header};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use pullcache_service::PullService;

use super::ResponseError;

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    /// Source URL of the resource to serve.
    url: Option<String>,
}

/// Serves a remote resource through the cache.
///
/// The response streams the artifact from disk; the bytes are identical to
/// what the origin sent when the entry was populated.
pub async fn fetch_resource(
    State(service): State<PullService>,
    Query(query): Query<FetchQuery>,
) -> Result<Response<Body>, ResponseError> {
    let Some(url) = query.url else {
        return Err((StatusCode::BAD_REQUEST, "missing `url` query parameter").into());
    };

    let artifact = service.resolve(&url).await?;

    let stream = ReaderStream::new(artifact.file);
    Ok(Response::builder()
        .header(header::CONTENT_LENGTH, artifact.len)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(stream))?)
}
