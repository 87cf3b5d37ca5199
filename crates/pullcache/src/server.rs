use std::net::SocketAddr;

use anyhow::{Context, Result};

use pullcache_service::PullService;
use pullcache_service::config::Config;

use crate::endpoints;

/// Creates the cache service and runs the HTTP server based on loaded config.
pub fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("pullcache")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let service = PullService::create(config.clone())
            .await
            .context("failed to create the cache service")?;

        let socket = config.bind.parse::<SocketAddr>()?;
        tracing::info!("Starting HTTP server on {}", socket);
        axum_server::bind(socket)
            .serve(endpoints::create_app(service).into_make_service())
            .await?;
        tracing::info!("System shutdown complete");

        Ok(())
    })
}
