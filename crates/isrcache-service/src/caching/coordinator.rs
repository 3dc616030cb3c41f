use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use sentry::{Hub, SentryFutureExt};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::services::{Rendered, Renderer};
use crate::utils::futures::CallOnDrop;

use super::{ArtifactRecord, ArtifactStore, CacheEntry, CacheError, CacheKey, GenerationGuard};

/// Why a regeneration was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationReason {
    /// Nothing was cached for the key.
    Miss,
    /// The cached record outlived its revalidate interval.
    Stale,
    /// The cached record belongs to a previous generation.
    Generation,
}

impl RegenerationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegenerationReason::Miss => "miss",
            RegenerationReason::Stale => "stale",
            RegenerationReason::Generation => "generation",
        }
    }
}

impl fmt::Display for RegenerationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handle to an in-flight regeneration that any number of callers can await.
pub type SharedRegeneration = Shared<BoxFuture<'static, CacheEntry<Arc<ArtifactRecord>>>>;

struct InFlight {
    id: u64,
    reason: RegenerationReason,
    future: SharedRegeneration,
    abort: AbortHandle,
}

/// Ensures at most one regeneration per [`CacheKey`] is running at any time.
///
/// Every regeneration runs as its own spawned task, so a caller that stops waiting does not
/// cancel the render for everybody else. The task registry lock is only held to check for and
/// register (or remove) a task, never while rendering, so keys never wait on each other.
pub struct RegenerationCoordinator {
    store: ArtifactStore,
    guard: GenerationGuard,
    renderer: Arc<dyn Renderer>,

    /// Currently running regenerations, keyed by the key they regenerate.
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlight>>>,
    next_id: Arc<AtomicU64>,

    /// Remaining budget of background regenerations.
    lazy_budget: Arc<AtomicIsize>,
}

impl fmt::Debug for RegenerationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegenerationCoordinator")
            .field("store", &self.store)
            .field("generation", &self.guard.current())
            .field("in_flight", &self.in_flight_count())
            .field("lazy_budget", &self.lazy_budget.load(Ordering::Relaxed))
            .finish()
    }
}

impl Clone for RegenerationCoordinator {
    fn clone(&self) -> Self {
        RegenerationCoordinator {
            store: self.store.clone(),
            guard: self.guard.clone(),
            renderer: Arc::clone(&self.renderer),
            in_flight: Arc::clone(&self.in_flight),
            next_id: Arc::clone(&self.next_id),
            lazy_budget: Arc::clone(&self.lazy_budget),
        }
    }
}

impl RegenerationCoordinator {
    /// Creates a coordinator.
    ///
    /// `max_lazy_regenerations` bounds the number of concurrently running background
    /// regenerations. It is clamped to at least 1, as 0 would disable stale-while-revalidate.
    pub fn new(
        store: ArtifactStore,
        guard: GenerationGuard,
        renderer: Arc<dyn Renderer>,
        max_lazy_regenerations: isize,
    ) -> Self {
        Self {
            store,
            guard,
            renderer,
            in_flight: Default::default(),
            next_id: Default::default(),
            lazy_budget: Arc::new(AtomicIsize::new(max_lazy_regenerations.max(1))),
        }
    }

    /// Number of regenerations currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Whether a regeneration for `key` is currently running.
    pub fn is_regenerating(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().unwrap().contains_key(key)
    }

    /// Returns the regeneration for `key`, starting one if none is running.
    ///
    /// Concurrent callers for the same key receive the same shared task. Awaiting the returned
    /// handle yields the freshly installed record, or the render error. A failed render leaves
    /// the store untouched.
    pub fn regenerate(&self, key: CacheKey, reason: RegenerationReason) -> SharedRegeneration {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(task) = in_flight.get(&key) {
            metric!(counter("caches.coalesced") += 1, "reason" => reason.as_str());
            return task.future.clone();
        }
        self.start(&mut in_flight, key, reason, None)
    }

    /// Schedules a background regeneration for `key` without waiting for it.
    ///
    /// `observed` is the expired record the caller is about to serve. Nothing is scheduled if
    /// the store holds a different record by now, as a regeneration finished in the meantime.
    ///
    /// Returns `false` if nothing was scheduled, because a regeneration for `key` is already
    /// running or finished, or the background budget is exhausted. In the latter case the next
    /// request tries again.
    pub fn spawn_refresh(&self, key: CacheKey, observed: &Arc<ArtifactRecord>) -> bool {
        // Held from the check until the task is registered. A finishing task installs its record
        // before it unregisters, so either the task or its record is visible here.
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.contains_key(&key) {
            metric!(counter("caches.coalesced") += 1, "reason" => "stale");
            return false;
        }
        let replaced = !self
            .store
            .read(&key)
            .is_some_and(|current| Arc::ptr_eq(&current, observed));
        if replaced {
            metric!(counter("caches.coalesced") += 1, "reason" => "replaced");
            tracing::trace!(%key, "expired record was already replaced");
            return false;
        }

        // We count down towards zero, and if we reach or surpass it, we will stop here.
        let budget = Arc::clone(&self.lazy_budget);
        if budget.fetch_sub(1, Ordering::Relaxed) <= 0 {
            budget.fetch_add(1, Ordering::Relaxed);

            metric!(counter("caches.lazy_limit_hit") += 1);
            tracing::debug!(%key, "background regeneration budget exhausted");
            return false;
        }
        let lazy_token = CallOnDrop::new(move || {
            budget.fetch_add(1, Ordering::Relaxed);
        });

        // The result is not awaited, failures are logged by the task itself.
        drop(self.start(&mut in_flight, key, RegenerationReason::Stale, Some(lazy_token)));
        true
    }

    /// Aborts every running regeneration.
    ///
    /// Records are only ever swapped in whole, so the store keeps the previous artifacts.
    /// Awaiters of an aborted task receive [`CacheError::InternalError`].
    pub fn shutdown(&self) {
        let aborts: Vec<_> = {
            let in_flight = self.in_flight.lock().unwrap();
            in_flight
                .iter()
                .map(|(key, task)| {
                    tracing::debug!(%key, reason = %task.reason, "aborting regeneration");
                    task.abort.clone()
                })
                .collect()
        };
        // the done tokens of aborted tasks take the registry lock themselves
        for abort in aborts {
            abort.abort();
        }
    }

    /// Spawns and registers a new regeneration. `in_flight` must not hold a task for `key`.
    fn start(
        &self,
        in_flight: &mut HashMap<CacheKey, InFlight>,
        key: CacheKey,
        reason: RegenerationReason,
        lazy_token: Option<CallOnDrop>,
    ) -> SharedRegeneration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // The generation is fixed when the task starts. If it advances during the render, the
        // record is stamped with the old one and will not validate.
        let generation = self.guard.current();

        let done_token = {
            let key = key.clone();
            let in_flight = Arc::clone(&self.in_flight);
            CallOnDrop::new(move || {
                let mut in_flight = in_flight.lock().unwrap();
                if in_flight.get(&key).is_some_and(|task| task.id == id) {
                    in_flight.remove(&key);
                }
            })
        };

        let this = self.clone();
        let task_key = key.clone();
        let task = async move {
            let _lazy_token = lazy_token;
            let _done_token = done_token; // move into the future
            this.render_and_store(task_key, generation, reason).await
        };
        let handle = tokio::spawn(task.bind_hub(Hub::new_from_top(Hub::current())));
        let abort = handle.abort_handle();

        let future = async move { handle.await.unwrap_or_else(|err| Err(err.into())) }
            .boxed()
            .shared();

        in_flight.insert(
            key,
            InFlight {
                id,
                reason,
                future: future.clone(),
                abort,
            },
        );
        future
    }

    async fn render_and_store(
        &self,
        key: CacheKey,
        generation: u64,
        reason: RegenerationReason,
    ) -> CacheEntry<Arc<ArtifactRecord>> {
        tracing::info!(reason = reason.as_str(), generation, "revalidating {key}");
        metric!(counter("caches.regeneration") += 1, "reason" => reason.as_str());

        let start = Instant::now();
        let result = self.renderer.render(&key).await;
        metric!(timer("caches.render.duration") = start.elapsed());

        match result {
            Ok(Rendered {
                payload,
                revalidate,
            }) => {
                tracing::debug!(%key, %revalidate, size = payload.len(), "installing artifact");
                Ok(self.store.put(key, payload, revalidate, generation))
            }
            Err(err) => {
                let err = CacheError::from(err);
                metric!(
                    counter("caches.regeneration.failed") += 1,
                    "reason" => reason.as_str(),
                    "error" => err.metrics_tag(),
                );
                match reason {
                    // nobody awaits a background regeneration, so this is the only report
                    RegenerationReason::Stale => tracing::error!(
                        error = &err as &dyn std::error::Error,
                        %key,
                        "background regeneration failed, keeping stale artifact",
                    ),
                    _ => tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        %key,
                        "regeneration failed",
                    ),
                }
                Err(err)
            }
        }
    }
}
