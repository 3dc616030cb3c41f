use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::caching::CacheKey;
use crate::types::RequestIntent;

use super::{
    ClientCacheEntry, Completion, FetchTicket, Fetched, NavigateDecision, NavigateOptions,
    PrefetchCache, PrefetchDecision, PrefetchEagerness, PrefetchTrigger, SkipReason,
};

/// Errors of a client side fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server no longer serves the generation the client asked for.
    #[error("server generation changed to {current}")]
    GenerationMismatch {
        /// The generation the server serves now.
        current: u64,
    },
    #[error("not found")]
    NotFound,
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(String),
}

/// A single request for a [`Fetcher`].
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub key: &'a CacheKey,
    pub intent: RequestIntent,
    /// The generation of the client's cached entries, if any.
    pub generation: Option<u64>,
}

/// Performs the network requests of a [`ClientRouter`].
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, request: FetchRequest<'a>) -> BoxFuture<'a, Result<Fetched, FetchError>>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch<'a>(&'a self, request: FetchRequest<'a>) -> BoxFuture<'a, Result<Fetched, FetchError>> {
        (**self).fetch(request)
    }
}

/// The result of [`ClientRouter::navigate`].
#[derive(Debug, Clone)]
pub enum NavigationOutcome {
    /// Rendered from the client cache.
    Cached {
        entry: Arc<ClientCacheEntry>,
        show_loading: bool,
    },
    /// Fetched from the server.
    Fetched(Arc<ClientCacheEntry>),
    /// The server generation changed. The cache was cleared and the page has to be fully
    /// reloaded.
    HardNavigation,
}

impl NavigationOutcome {
    pub fn entry(&self) -> Option<&Arc<ClientCacheEntry>> {
        match self {
            NavigationOutcome::Cached { entry, .. } | NavigationOutcome::Fetched(entry) => {
                Some(entry)
            }
            NavigationOutcome::HardNavigation => None,
        }
    }
}

/// The result of [`ClientRouter::prefetch`].
#[derive(Debug, Clone)]
pub enum PrefetchOutcome {
    Skipped(SkipReason),
    Prefetched(Arc<ClientCacheEntry>),
    /// The server generation changed and the cache was cleared.
    CacheCleared,
}

/// Drives a [`PrefetchCache`] against a [`Fetcher`].
///
/// The cache lock is only held to make a decision or to apply a result, never across a fetch.
pub struct ClientRouter<F> {
    cache: Mutex<PrefetchCache>,
    fetcher: F,
}

impl<F: std::fmt::Debug> std::fmt::Debug for ClientRouter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRouter")
            .field("cache", &self.cache)
            .field("fetcher", &self.fetcher)
            .finish()
    }
}

impl<F: Fetcher> ClientRouter<F> {
    pub fn new(fetcher: F, eagerness: PrefetchEagerness) -> Self {
        Self {
            cache: Mutex::new(PrefetchCache::new(eagerness)),
            fetcher,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Runs `f` with exclusive access to the cache.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut PrefetchCache) -> R) -> R {
        let mut cache = self.cache.lock().unwrap();
        f(&mut cache)
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<ClientCacheEntry>> {
        self.with_cache(|cache| cache.lookup(key))
    }

    /// Navigates to `key`, using the cache unless told otherwise.
    ///
    /// # Errors
    ///
    /// Failed fetches are returned as is. The cache is not touched, and it is up to the caller to
    /// retry or to show an error.
    pub async fn navigate(
        &self,
        key: &CacheKey,
        options: NavigateOptions,
    ) -> Result<NavigationOutcome, FetchError> {
        let ticket = match self.with_cache(|cache| cache.navigate(key, options)) {
            NavigateDecision::UseCached {
                entry,
                show_loading,
            } => {
                metric!(counter("client.cache_hit") += 1);
                return Ok(NavigationOutcome::Cached {
                    entry,
                    show_loading,
                });
            }
            NavigateDecision::Fetch(ticket) => ticket,
        };

        let reason = if options.skip_client_cache {
            "skip_cache"
        } else {
            "navigate"
        };
        match self.fetch(ticket, RequestIntent::Navigation, reason).await {
            Completion::Installed(entry) => Ok(NavigationOutcome::Fetched(entry)),
            Completion::Discarded | Completion::GenerationChanged => {
                Ok(NavigationOutcome::HardNavigation)
            }
            Completion::Failed(err) => Err(err),
        }
    }

    /// Prefetches `key` if the cache allows it.
    pub async fn prefetch(
        &self,
        key: &CacheKey,
        trigger: PrefetchTrigger,
        options: NavigateOptions,
    ) -> Result<PrefetchOutcome, FetchError> {
        let ticket = match self.with_cache(|cache| cache.prefetch(key, trigger, options)) {
            PrefetchDecision::Fetch(ticket) => ticket,
            PrefetchDecision::Skipped(reason) => {
                tracing::trace!(%key, ?reason, "prefetch skipped");
                return Ok(PrefetchOutcome::Skipped(reason));
            }
        };

        match self.fetch(ticket, RequestIntent::Prefetch, "prefetch").await {
            Completion::Installed(entry) => Ok(PrefetchOutcome::Prefetched(entry)),
            Completion::Discarded | Completion::GenerationChanged => {
                Ok(PrefetchOutcome::CacheCleared)
            }
            Completion::Failed(err) => Err(err),
        }
    }

    /// Empties the cache.
    pub fn clear_cache(&self) {
        self.with_cache(PrefetchCache::clear_all)
    }

    async fn fetch(
        &self,
        ticket: FetchTicket,
        intent: RequestIntent,
        reason: &'static str,
    ) -> Completion {
        metric!(counter("client.fetch") += 1, "reason" => reason);

        let generation = self.with_cache(|cache| cache.generation());
        let request = FetchRequest {
            key: ticket.key(),
            intent,
            generation,
        };
        let result = self.fetcher.fetch(request).await;
        if let Err(ref err) = result {
            tracing::debug!(key = %ticket.key(), error = %err, "client fetch failed");
        }

        self.with_cache(|cache| cache.complete(ticket, result))
    }
}
