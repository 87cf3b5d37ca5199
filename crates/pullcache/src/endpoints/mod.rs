use axum::Router;
use axum::routing::get;

use pullcache_service::PullService;

mod error;
mod fetch;

pub use error::ResponseError;

use fetch::fetch_resource;

pub async fn healthcheck() -> &'static str {
    "ok"
}

pub fn create_app(service: PullService) -> Router {
    Router::new()
        .route("/", get(fetch_resource))
        .with_state(service)
        // the healthcheck is last, as it does not need the service state
        .route("/healthcheck", get(healthcheck))
}
