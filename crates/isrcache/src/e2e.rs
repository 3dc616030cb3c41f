//! The client router against the web app.

use std::sync::Arc;
use std::time::Duration;

use isrcache_service::caching::CacheKey;
use isrcache_service::client::{
    ClientRouter, HttpFetcher, NavigateOptions, NavigationOutcome, PrefetchEagerness,
    PrefetchOutcome, PrefetchTrigger, SkipReason,
};
use isrcache_service::config::{ClientConfig, Config};
use isrcache_service::types::{Payload, Revalidate};
use serde_json::json;

use crate::test::{self, CountingRenderer, TestServer};

async fn router_for(server: &TestServer) -> ClientRouter<HttpFetcher> {
    let config: ClientConfig = reqwest::get(server.url("/client-config"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let fetcher = HttpFetcher::new(server.url("/")).unwrap();
    ClientRouter::new(fetcher, config.speculative_prefetch)
}

fn server(
    eagerness: PrefetchEagerness,
    revalidate: Revalidate,
) -> (TestServer, Arc<CountingRenderer>) {
    let renderer = CountingRenderer::new(revalidate);
    let mut config = Config::default();
    config.client.speculative_prefetch = eagerness;
    let server = test::server_with_config(renderer.clone(), config);
    (server, renderer)
}

fn hover() -> (PrefetchTrigger, NavigateOptions) {
    (PrefetchTrigger::Pointer, NavigateOptions::default())
}

#[tokio::test]
async fn test_hover_disabled_makes_no_requests() {
    let (server, renderer) = server(PrefetchEagerness::Disabled, Revalidate::Never);
    let router = router_for(&server).await;
    server.hits.accesses();

    let key = CacheKey::for_route("/another");
    for _ in 0..5 {
        let (trigger, options) = hover();
        let outcome = router.prefetch(&key, trigger, options).await.unwrap();
        assert!(matches!(
            outcome,
            PrefetchOutcome::Skipped(SkipReason::EagernessDisabled)
        ));
    }

    assert_eq!(server.hits.accesses(), 0);
    assert_eq!(renderer.renders(), 0);

    // the navigation itself still fetches
    let outcome = router
        .navigate(&key, NavigateOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, NavigationOutcome::Fetched(_)));
    assert_eq!(server.hits.hits("/pages/another"), 1);
}

#[tokio::test]
async fn test_hover_enabled_one_request_per_key() {
    let (server, _renderer) = server(PrefetchEagerness::Enabled, Revalidate::Never);
    let router = router_for(&server).await;

    let keys = [
        CacheKey::for_route("/another"),
        CacheKey::for_route("/blog/first"),
        CacheKey::builder("/blog/second").param("lang", "en").build(),
    ];
    for _ in 0..3 {
        for key in &keys {
            let (trigger, options) = hover();
            router.prefetch(key, trigger, options).await.unwrap();
        }
    }

    assert_eq!(server.hits.hits("/pages/another"), 1);
    assert_eq!(server.hits.hits("/pages/blog/first"), 1);
    assert_eq!(server.hits.hits("/pages/blog/second?lang=en"), 1);

    // clicking the link renders from the cache, hovering again afterwards refreshes
    let outcome = router
        .navigate(&keys[0], NavigateOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, NavigationOutcome::Cached { .. }));
    let (trigger, options) = hover();
    router.prefetch(&keys[0], trigger, options).await.unwrap();
    assert_eq!(server.hits.hits("/pages/another"), 2);
}

#[tokio::test]
async fn test_prefetch_does_not_revalidate() {
    let (server, renderer) = server(PrefetchEagerness::Enabled, Revalidate::after_secs(1));
    let router = router_for(&server).await;
    let key = CacheKey::for_route("/blog/first");

    router
        .navigate(&key, NavigateOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let outcome = router
        .prefetch(
            &key,
            PrefetchTrigger::Explicit,
            NavigateOptions::skip_client_cache(),
        )
        .await
        .unwrap();
    let PrefetchOutcome::Prefetched(entry) = outcome else {
        panic!("expected a prefetch, got {outcome:?}");
    };
    assert_eq!(CountingRenderer::render_number(&entry.data), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(renderer.renders(), 1);

    // a navigation revalidates
    let outcome = router
        .navigate(&key, NavigateOptions::skip_client_cache())
        .await
        .unwrap();
    let entry = outcome.entry().unwrap();
    assert_eq!(CountingRenderer::render_number(&entry.data), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(renderer.renders(), 2);
}

#[tokio::test]
async fn test_skip_client_cache() {
    let (server, renderer) = server(PrefetchEagerness::Enabled, Revalidate::after_secs(1));
    let router = router_for(&server).await;
    let key = CacheKey::for_route("/blog/first");

    let first = router
        .navigate(&key, NavigateOptions::default())
        .await
        .unwrap();
    let first = first.entry().unwrap().clone();

    // a regular navigation stays on the client
    let cached = router
        .navigate(&key, NavigateOptions::default())
        .await
        .unwrap();
    assert!(matches!(cached, NavigationOutcome::Cached { .. }));
    assert_eq!(server.hits.hits("/pages/blog/first"), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    router
        .navigate(&key, NavigateOptions::skip_client_cache())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = router
        .navigate(&key, NavigateOptions::skip_client_cache())
        .await
        .unwrap();
    let entry = outcome.entry().unwrap();
    assert!(matches!(outcome, NavigationOutcome::Fetched(_)));
    assert!(entry.fetched_at > first.fetched_at);
    assert_eq!(
        entry.data,
        Payload::Json(json!({ "route": "/blog/first", "render": 1 }))
    );
    assert_eq!(server.hits.hits("/pages/blog/first"), 3);
    assert_eq!(renderer.renders(), 2);
}

#[tokio::test]
async fn test_restart_clears_client_cache() {
    let (server, _renderer) = server(PrefetchEagerness::Enabled, Revalidate::Never);
    let router = router_for(&server).await;
    let first = CacheKey::for_route("/blog/first");
    let second = CacheKey::for_route("/blog/second");

    router
        .navigate(&first, NavigateOptions::default())
        .await
        .unwrap();
    assert_eq!(
        router.with_cache(|cache| cache.generation()),
        Some(server.service.generation())
    );

    server.service.advance_generation();

    let outcome = router
        .navigate(&second, NavigateOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, NavigationOutcome::HardNavigation));
    assert!(router.lookup(&first).is_none());

    let outcome = router
        .navigate(&first, NavigateOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, NavigationOutcome::Fetched(_)));
    assert_eq!(
        router.with_cache(|cache| cache.generation()),
        Some(server.service.generation())
    );
}
