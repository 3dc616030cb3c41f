use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum_server::Handle;
use isrcache_service::config::Config;
use isrcache_service::metric;
use isrcache_service::services::PageService;

use crate::endpoints;

/// Time given to open connections to finish after a shutdown signal.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Starts the page service and the HTTP server based on loaded config.
///
/// Runs until the process receives `ctrl-c`. Regenerations still running at that point are
/// aborted.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("isrcache-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let socket = config.bind.parse::<SocketAddr>()?;

    web_pool.block_on(async {
        let service =
            PageService::from_config(&config).context("failed to create page service")?;

        let handle = Handle::new();
        tokio::spawn(shutdown_on_signal(handle.clone()));

        tracing::info!(generation = service.generation(), "Starting HTTP server on {}", socket);
        axum_server::bind(socket)
            .handle(handle)
            .serve(endpoints::create_app(service.clone(), &config).into_make_service())
            .await?;

        service.shutdown();
        anyhow::Ok(())
    })?;

    tracing::info!("System shutdown complete");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        let err: &dyn std::error::Error = &err;
        tracing::error!(error = err, "failed to listen for the shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
}
