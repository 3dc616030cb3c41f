use std::sync::Arc;
use std::time::Duration;

use isrcache_service::caching::{CacheError, CacheKey};
use isrcache_service::config::CachesConfig;
use isrcache_service::services::ServeStatus;
use isrcache_service::types::{Payload, RequestIntent, Revalidate};
use isrcache_test::CountingRenderer;
use serde_json::json;

use crate::utils::{get, setup_service};

fn render_number(served: &isrcache_service::services::Served) -> u64 {
    CountingRenderer::render_number(&served.record.payload)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_requests_regenerate_once() {
    let renderer = CountingRenderer::new(Revalidate::after_secs(1));
    let service = setup_service(renderer.clone(), CachesConfig::default());

    let first = get(&service, "/blog/first").await.unwrap();
    assert_eq!(render_number(&first), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    renderer.set_delay(Duration::from_millis(200));

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { get(&service, "/blog/first").await })
        })
        .collect();

    for task in tasks {
        let served = task.await.unwrap().unwrap();
        // either the old or the new record, never anything in between
        assert!(matches!(render_number(&served), 0 | 1));
        assert_eq!(
            served.record.payload,
            Payload::Json(json!({ "route": "/blog/first", "render": render_number(&served) }))
        );
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(renderer.renders(), 2);

    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(render_number(&served), 1);
    assert!(served.record.generated_at > first.record.generated_at);
    assert!(served.record.rendered_at > first.record.rendered_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stale_requests_instant_render() {
    let renderer = CountingRenderer::new(Revalidate::after_secs(0));
    let service = setup_service(renderer.clone(), CachesConfig::default());

    for round in 0..50 {
        let route = format!("/blog/{round}");
        renderer.set_revalidate(Revalidate::after_secs(0));
        let expired = get(&service, &route).await.unwrap();
        assert_eq!(expired.status, ServeStatus::Regenerated);

        // the refreshed record never expires, so exactly one refresh is needed
        renderer.set_revalidate(Revalidate::Never);
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let service = service.clone();
                let route = route.clone();
                tokio::spawn(async move { get(&service, &route).await })
            })
            .collect();
        for task in tasks {
            let served = task.await.unwrap().unwrap();
            assert!(matches!(
                served.status,
                ServeStatus::Stale | ServeStatus::Fresh
            ));
        }

        let key = CacheKey::for_route(&route);
        while service.coordinator().is_regenerating(&key) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(renderer.renders(), 2 * (round + 1), "round {round}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_on_many_keys() {
    let renderer = CountingRenderer::new(Revalidate::Never);
    renderer.set_delay(Duration::from_millis(100));
    let service = setup_service(renderer.clone(), CachesConfig::default());

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let service = service.clone();
            let route = format!("/blog/{}", i % 8);
            tokio::spawn(async move { get(&service, &route).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(renderer.renders(), 8);
    assert_eq!(service.store().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_blog_first_timeline() {
    let renderer = CountingRenderer::new(Revalidate::after_secs(1));
    let service = setup_service(renderer.clone(), CachesConfig::default());

    let initial = get(&service, "/blog/first").await.unwrap();
    assert_eq!(initial.status, ServeStatus::Regenerated);
    renderer.set_delay(Duration::from_millis(50));

    // t0 + 0.2
    tokio::time::advance(Duration::from_millis(200)).await;
    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(served.status, ServeStatus::Fresh);
    assert_eq!(render_number(&served), 0);
    assert_eq!(renderer.renders(), 1);

    // t0 + 1.5
    tokio::time::advance(Duration::from_millis(1300)).await;
    let stale_at = tokio::time::Instant::now();
    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(served.status, ServeStatus::Stale);
    assert_eq!(render_number(&served), 0);
    assert!(served.age >= Duration::from_millis(1500));

    // t0 + 2.5
    tokio::time::sleep(Duration::from_secs(1)).await;
    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(render_number(&served), 1);
    assert!(served.record.generated_at > stale_at);
    assert_eq!(renderer.renders(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rebuild_forces_regeneration() {
    let renderer = CountingRenderer::new(Revalidate::after_secs(3600));
    let service = setup_service(renderer.clone(), CachesConfig::default());

    let before = get(&service, "/blog/first").await.unwrap();
    let generation = service.advance_generation();

    let after = get(&service, "/blog/first").await.unwrap();
    assert_eq!(after.status, ServeStatus::Regenerated);
    assert_eq!(after.record.generation, generation);
    assert_ne!(before.record.generation, after.record.generation);
    assert_eq!(renderer.renders(), 2);

    // clients of the old generation are told about it
    assert_eq!(
        service.check_generation(Some(before.record.generation)),
        Err(CacheError::GenerationMismatch {
            requested: before.record.generation,
            current: generation,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_render_failure_keeps_cached_payload() {
    let renderer = CountingRenderer::new(Revalidate::after_secs(1));
    let service = setup_service(renderer.clone(), CachesConfig::default());

    let original = get(&service, "/blog/first").await.unwrap();
    renderer.set_failing(true);

    tokio::time::advance(Duration::from_secs(2)).await;
    let served = get(&service, "/blog/first").await.unwrap();
    assert_eq!(served.status, ServeStatus::Stale);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(renderer.renders(), 2);

    let served = get(&service, "/blog/first").await.unwrap();
    assert!(Arc::ptr_eq(&served.record, &original.record));

    // a key without a cached payload has nothing to fall back to
    let err = get(&service, "/blog/second").await.unwrap_err();
    assert!(matches!(err, CacheError::RenderFailure(_)));
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_intent_sees_same_staleness() {
    let renderer = CountingRenderer::new(Revalidate::after_secs(1));
    let service = setup_service(renderer.clone(), CachesConfig::default());
    let key = CacheKey::for_route("/blog/first");

    service
        .get_or_regenerate(&key, RequestIntent::Navigation)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(500)).await;
    let served = service
        .get_or_regenerate(&key, RequestIntent::Prefetch)
        .await
        .unwrap();
    assert_eq!(served.status, ServeStatus::Fresh);

    tokio::time::advance(Duration::from_millis(500)).await;
    let served = service
        .get_or_regenerate(&key, RequestIntent::Prefetch)
        .await
        .unwrap();
    assert_eq!(served.status, ServeStatus::Stale);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(renderer.renders(), 1);
}
