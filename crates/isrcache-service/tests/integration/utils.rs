use std::sync::Arc;
use std::time::Duration;

use isrcache_service::caching::{CacheEntry, CacheKey, GenerationGuard};
use isrcache_service::config::CachesConfig;
use isrcache_service::services::{PageService, Renderer, Served, UpstreamRenderer};
use isrcache_service::types::{RequestIntent, Revalidate};
use isrcache_test::Origin;

/// Creates a service rendering through `renderer`, starting at generation 1.
pub fn setup_service(renderer: Arc<dyn Renderer>, config: CachesConfig) -> PageService {
    isrcache_test::setup();
    PageService::new(renderer, GenerationGuard::new(1), config)
}

/// Creates a service rendering through the given origin.
pub fn setup_upstream_service(origin: &Origin, default_revalidate: Revalidate) -> PageService {
    let renderer =
        UpstreamRenderer::new(origin.url("/"), default_revalidate, Duration::from_secs(2))
            .unwrap();
    setup_service(Arc::new(renderer), CachesConfig::default())
}

pub async fn get(service: &PageService, route: &str) -> CacheEntry<Served> {
    service
        .get_or_regenerate(&CacheKey::for_route(route), RequestIntent::Navigation)
        .await
}
