//! Provides the services that sit between the transport layer and the caches.
//!
//! The [`PageService`] is the single entry point for request handlers. It composes the
//! [`CachePolicy`], the [`GenerationGuard`] and the [`RegenerationCoordinator`] into
//! [`get_or_regenerate`](PageService::get_or_regenerate).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;

use crate::caching::{
    ArtifactRecord, ArtifactStore, CacheEntry, CacheError, CacheKey, CachePolicy,
    GenerationGuard, Lookup, RegenerationCoordinator, RegenerationReason, Staleness,
};
use crate::config::{CachesConfig, Config};
use crate::types::RequestIntent;

mod renderer;
mod upstream;

pub use renderer::{Rendered, Renderer};
pub use upstream::{UpstreamRenderer, parse_cache_control};

/// How a [`Served`] artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeStatus {
    /// Served from the cache, within its revalidate interval.
    Fresh,
    /// Served from the cache after its revalidate interval elapsed.
    Stale,
    /// Rendered for this request (or a request it was coalesced with).
    Regenerated,
}

impl ServeStatus {
    /// The value of the `x-isr-cache` response header.
    pub fn as_header(&self) -> &'static str {
        match self {
            ServeStatus::Fresh => "HIT",
            ServeStatus::Stale => "STALE",
            ServeStatus::Regenerated => "MISS",
        }
    }
}

/// An artifact handed out by [`PageService::get_or_regenerate`].
#[derive(Debug, Clone)]
pub struct Served {
    pub record: Arc<ArtifactRecord>,
    /// Age of the artifact at the time it was handed out.
    pub age: Duration,
    pub status: ServeStatus,
}

impl Served {
    fn new(record: Arc<ArtifactRecord>, status: ServeStatus) -> Self {
        let age = record.age(Instant::now());
        Self {
            record,
            age,
            status,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.status == ServeStatus::Stale
    }
}

/// Serves artifacts with stale-while-revalidate semantics.
#[derive(Debug, Clone)]
pub struct PageService {
    policy: CachePolicy,
    coordinator: RegenerationCoordinator,
    config: CachesConfig,
}

impl PageService {
    /// Creates a service around an arbitrary renderer.
    pub fn new(
        renderer: Arc<dyn Renderer>,
        guard: GenerationGuard,
        config: CachesConfig,
    ) -> Self {
        let store = ArtifactStore::new();
        let coordinator = RegenerationCoordinator::new(
            store.clone(),
            guard.clone(),
            renderer,
            config.max_lazy_regenerations,
        );
        Self {
            policy: CachePolicy::new(store, guard),
            coordinator,
            config,
        }
    }

    /// Creates a service that renders through the configured upstream.
    pub fn from_config(config: &Config) -> Result<Self> {
        let upstream = config
            .upstream
            .clone()
            .context("no `upstream` configured")?;
        let renderer = UpstreamRenderer::new(
            upstream,
            config.caches.default_revalidate,
            config.render_timeout,
        )?;
        let guard = match config.generation {
            Some(generation) => GenerationGuard::new(generation),
            None => GenerationGuard::from_process_start(),
        };
        tracing::info!(generation = guard.current(), "starting cache generation");

        Ok(Self::new(Arc::new(renderer), guard, config.caches))
    }

    pub fn store(&self) -> &ArtifactStore {
        self.policy.store()
    }

    pub fn coordinator(&self) -> &RegenerationCoordinator {
        &self.coordinator
    }

    /// The generation currently being served.
    pub fn generation(&self) -> u64 {
        self.policy.guard().current()
    }

    /// Moves to a new generation, e.g. after a rebuild of the render logic.
    ///
    /// All stored records are dropped, every key regenerates on its next access.
    pub fn advance_generation(&self) -> u64 {
        let generation = self.policy.guard().advance();
        self.policy.store().invalidate_all();
        generation
    }

    /// Rejects requests that were made against a different generation.
    ///
    /// Clients name the generation their cached entries belong to. A mismatch tells them that
    /// their whole cache is outdated.
    pub fn check_generation(&self, requested: Option<u64>) -> CacheEntry<()> {
        let current = self.generation();
        match requested {
            Some(requested) if requested != current => {
                metric!(counter("caches.generation_mismatch") += 1, "source" => "client");
                Err(CacheError::GenerationMismatch { requested, current })
            }
            _ => Ok(()),
        }
    }

    /// Returns the artifact for `key`, regenerating it if needed.
    ///
    /// - A fresh record is returned right away.
    /// - An expired record is returned right away, and a background regeneration is scheduled.
    ///   For [`RequestIntent::Prefetch`] this only happens if
    ///   [`revalidate_on_prefetch`](CachesConfig::revalidate_on_prefetch) is set.
    /// - Otherwise this waits for the (possibly shared) regeneration of `key`.
    ///
    /// # Errors
    ///
    /// Render failures are only reported when there was nothing servable to begin with.
    pub async fn get_or_regenerate(
        &self,
        key: &CacheKey,
        intent: RequestIntent,
    ) -> CacheEntry<Served> {
        metric!(counter("caches.access") += 1);

        loop {
            let reason = match self.policy.get(key) {
                Lookup::Hit {
                    record,
                    staleness: Staleness::Fresh,
                } => {
                    metric!(counter("caches.hit") += 1);
                    return Ok(Served::new(record, ServeStatus::Fresh));
                }
                Lookup::Hit {
                    record,
                    staleness: Staleness::Expired,
                } => {
                    metric!(counter("caches.stale") += 1);
                    if intent == RequestIntent::Navigation || self.config.revalidate_on_prefetch {
                        self.coordinator.spawn_refresh(key.clone(), &record);
                    } else {
                        tracing::debug!(%key, "serving stale artifact to prefetch");
                    }
                    return Ok(Served::new(record, ServeStatus::Stale));
                }
                Lookup::Hit {
                    staleness: Staleness::GenerationMismatch,
                    ..
                } => {
                    metric!(counter("caches.generation_mismatch") += 1, "source" => "store");
                    RegenerationReason::Generation
                }
                Lookup::Miss => {
                    metric!(counter("caches.miss") += 1);
                    RegenerationReason::Miss
                }
            };

            let record = self.coordinator.regenerate(key.clone(), reason).await?;
            if self.policy.guard().validate(&record) {
                return Ok(Served::new(record, ServeStatus::Regenerated));
            }
            // The generation advanced while this render was running.
            tracing::debug!(%key, "regenerated artifact is already outdated, retrying");
        }
    }

    /// Aborts all running regenerations.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}
