use std::time::Duration;

use isrcache_service::caching::{CacheError, CacheKey};
use isrcache_service::services::{Renderer, ServeStatus, UpstreamRenderer};
use isrcache_service::types::{Payload, Revalidate};
use isrcache_test::Origin;
use serde_json::json;

use crate::utils::{get, setup_upstream_service};

#[tokio::test]
async fn test_renders_json_with_cache_control() {
    isrcache_test::setup();
    let origin = Origin::new();
    origin.set_cache_control(Some("public, s-maxage=1, stale-while-revalidate"));

    let renderer = UpstreamRenderer::new(origin.url("/"), Revalidate::Never, Duration::from_secs(2))
        .unwrap();
    let key = CacheKey::builder("/blog/first").param("lang", "en").build();
    let rendered = renderer.render(&key).await.unwrap();

    assert_eq!(
        rendered.payload,
        Payload::Json(json!({ "route": "/blog/first", "now": 0 }))
    );
    assert_eq!(rendered.revalidate, Revalidate::after_secs(1));
    assert_eq!(origin.hits("/blog/first?lang=en"), 1);
}

#[tokio::test]
async fn test_default_revalidate() {
    isrcache_test::setup();
    let origin = Origin::new();

    let renderer = UpstreamRenderer::new(
        origin.url("/"),
        Revalidate::after_secs(60),
        Duration::from_secs(2),
    )
    .unwrap();
    let rendered = renderer
        .render(&CacheKey::for_route("/about"))
        .await
        .unwrap();

    assert_eq!(rendered.revalidate, Revalidate::after_secs(60));
}

#[tokio::test]
async fn test_upstream_errors() {
    isrcache_test::setup();
    let origin = Origin::new();
    let service = setup_upstream_service(&origin, Revalidate::Never);

    let err = get(&service, "/missing").await.unwrap_err();
    assert_eq!(err, CacheError::NotFound);

    origin.set_failing(true);
    let err = get(&service, "/blog/first").await.unwrap_err();
    assert!(matches!(err, CacheError::RenderFailure(_)));

    origin.set_failing(false);
    origin.set_delay(Duration::from_secs(5));
    let err = get(&service, "/blog/first").await.unwrap_err();
    assert_eq!(err, CacheError::Timeout(Duration::from_secs(2)));

    assert!(service.store().is_empty());
}

#[tokio::test]
async fn test_stale_while_revalidate_against_origin() {
    isrcache_test::setup();
    let origin = Origin::new();
    origin.set_cache_control(Some("max-age=1"));
    let service = setup_upstream_service(&origin, Revalidate::Never);

    let first = get(&service, "/blog/first").await.unwrap();
    assert_eq!(first.status, ServeStatus::Regenerated);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(served.status, ServeStatus::Fresh);
    assert_eq!(origin.hits("/blog/first"), 1);

    tokio::time::sleep(Duration::from_millis(1300)).await;
    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(served.status, ServeStatus::Stale);
    assert_eq!(served.record.payload, first.record.payload);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(
        served.record.payload,
        Payload::Json(json!({ "route": "/blog/first", "now": 1 }))
    );
    assert!(served.record.rendered_at > first.record.rendered_at);
    assert_eq!(origin.hits("/blog/first"), 2);
}

#[tokio::test]
async fn test_page_and_data_render_separately() {
    isrcache_test::setup();
    let origin = Origin::new();
    let service = setup_upstream_service(&origin, Revalidate::Never);

    let page = get(&service, "/blog/first").await.unwrap();
    let data = get(&service, "/blog/first.json").await.unwrap();
    assert_eq!(data.status, ServeStatus::Regenerated);
    assert_eq!(
        page.record.payload,
        Payload::Json(json!({ "route": "/blog/first", "now": 0 }))
    );
    assert_eq!(
        data.record.payload,
        Payload::Json(json!({ "route": "/blog/first.json", "now": 1 }))
    );

    let data = get(&service, "/blog/first.json").await.unwrap();
    assert_eq!(data.status, ServeStatus::Fresh);
    assert_eq!(origin.hits("/blog/first"), 1);
    assert_eq!(origin.hits("/blog/first.json"), 1);
    assert_eq!(service.store().len(), 2);
}
