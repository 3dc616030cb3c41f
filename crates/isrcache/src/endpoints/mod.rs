use axum::Router;
use axum::routing::get;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;
use tower::limit::GlobalConcurrencyLimitLayer;

use isrcache_service::config::{ClientConfig, Config};
use isrcache_service::metric;
use isrcache_service::services::PageService;

mod error;
mod generation;
mod metrics;
mod pages;

pub use error::ResponseError;
use metrics::MetricsLayer;

use generation::{advance_generation, get_generation};
use pages::get_page;

/// Shared state of all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: PageService,
    pub client: ClientConfig,
}

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: PageService, config: &Config) -> Router {
    let state = AppState {
        service,
        client: config.client,
    };

    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer);

    let router = Router::new()
        .route("/pages/*path", get(get_page))
        .route("/generation", get(get_generation).post(advance_generation))
        .route("/client-config", get(client_config))
        .with_state(state);
    // requests over the limit wait for a slot
    let router = match config.max_concurrent_requests {
        Some(max) => router.layer(GlobalConcurrencyLimitLayer::new(max)),
        None => router,
    };

    router
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

async fn client_config(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<ClientConfig> {
    axum::Json(state.client)
}
