use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::time::Instant;

use crate::caching::CacheKey;
use crate::types::Payload;

use super::{FetchError, NavigateOptions, PrefetchEagerness, PrefetchTrigger};

/// How a [`ClientCacheEntry`] was populated. Only used for diagnostics and for the loading state
/// when speculative prefetch is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryOrigin {
    Navigation,
    Prefetch,
}

impl EntryOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryOrigin::Navigation => "navigation",
            EntryOrigin::Prefetch => "prefetch",
        }
    }
}

/// An artifact fetched by this client session.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCacheEntry {
    pub key: CacheKey,
    pub data: Payload,
    pub fetched_at: Instant,
    pub origin: EntryOrigin,
    /// The server generation the data was served under, if the server reported one.
    pub generation: Option<u64>,
}

/// The successful result of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub data: Payload,
    pub generation: Option<u64>,
}

/// Permission to perform one fetch, handed back with its result in [`Command::FetchCompleted`].
#[derive(Debug)]
pub struct FetchTicket {
    key: CacheKey,
    origin: EntryOrigin,
    /// Incremented by every [`PrefetchCache::clear_all`].
    epoch: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn origin(&self) -> EntryOrigin {
        self.origin
    }
}

/// Why a prefetch did not result in a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Pointer prefetch while [`PrefetchEagerness::Disabled`].
    EagernessDisabled,
    /// The key was already prefetched on hover and has not been navigated to since.
    AlreadyPrefetched,
    /// A fetch for the key is still running.
    InFlight,
    /// An entry exists and the caller did not ask to skip the cache.
    Cached,
}

/// The answer to [`Command::Navigate`]. A navigation always ends up with data.
#[derive(Debug)]
pub enum NavigateDecision {
    /// Use the cached entry without a network round trip.
    UseCached {
        entry: Arc<ClientCacheEntry>,
        /// Whether the navigation should still show its loading state.
        show_loading: bool,
    },
    /// Fetch the key, then report back with [`Command::FetchCompleted`].
    Fetch(FetchTicket),
}

/// The answer to [`Command::Prefetch`].
#[derive(Debug)]
pub enum PrefetchDecision {
    /// Fetch the key, then report back with [`Command::FetchCompleted`].
    Fetch(FetchTicket),
    /// Nothing to do.
    Skipped(SkipReason),
}

/// The answer to [`Command::FetchCompleted`].
#[derive(Debug)]
pub enum Completion {
    /// The result replaced whatever was cached for the key.
    Installed(Arc<ClientCacheEntry>),
    /// The result belongs to a generation that was cleared while it was being fetched.
    Discarded,
    /// The fetch failed, any existing entry is left untouched.
    Failed(FetchError),
    /// The server moved to a new generation, the whole cache was cleared.
    GenerationChanged,
}

/// Everything that can happen to a [`PrefetchCache`].
#[derive(Debug)]
pub enum Command {
    Navigate {
        key: CacheKey,
        options: NavigateOptions,
    },
    Prefetch {
        key: CacheKey,
        trigger: PrefetchTrigger,
        options: NavigateOptions,
    },
    FetchCompleted {
        ticket: FetchTicket,
        result: Result<Fetched, FetchError>,
    },
    ClearCache,
}

#[derive(Debug)]
pub enum CommandResult {
    Navigate(NavigateDecision),
    Prefetch(PrefetchDecision),
    Completion(Completion),
    Cleared,
}

/// The state of one client session.
///
/// This is only ever accessed from one logical thread. Writes are keyed, so completions for
/// different keys never affect each other, and of two fetches for the same key the one that
/// completes last wins.
#[derive(Debug)]
pub struct PrefetchCache {
    eagerness: PrefetchEagerness,
    entries: HashMap<CacheKey, Arc<ClientCacheEntry>>,
    /// Keys prefetched by pointer events since they were last navigated to.
    hovered: HashSet<CacheKey>,
    /// Number of outstanding tickets per key.
    in_flight: HashMap<CacheKey, usize>,
    generation: Option<u64>,
    epoch: u64,
}

impl PrefetchCache {
    pub fn new(eagerness: PrefetchEagerness) -> Self {
        Self {
            eagerness,
            entries: HashMap::new(),
            hovered: HashSet::new(),
            in_flight: HashMap::new(),
            generation: None,
            epoch: 0,
        }
    }

    pub fn eagerness(&self) -> PrefetchEagerness {
        self.eagerness
    }

    /// The server generation of the cached entries, once one is known.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<ClientCacheEntry>> {
        self.entries.get(key).cloned()
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn dispatch(&mut self, command: Command) -> CommandResult {
        match command {
            Command::Navigate { key, options } => {
                CommandResult::Navigate(self.navigate(&key, options))
            }
            Command::Prefetch {
                key,
                trigger,
                options,
            } => CommandResult::Prefetch(self.prefetch(&key, trigger, options)),
            Command::FetchCompleted { ticket, result } => {
                CommandResult::Completion(self.complete(ticket, result))
            }
            Command::ClearCache => {
                self.clear_all();
                CommandResult::Cleared
            }
        }
    }

    /// Decides how to navigate to `key`.
    ///
    /// Any cached entry is used regardless of its age, unless the caller asked to skip the
    /// cache. With speculative prefetch disabled, an entry that was only prefetched does not
    /// hide the loading state.
    pub fn navigate(&mut self, key: &CacheKey, options: NavigateOptions) -> NavigateDecision {
        // hovering this key again after the navigation may refresh it
        self.hovered.remove(key);

        if !options.skip_client_cache {
            if let Some(entry) = self.entries.get(key) {
                let show_loading = !self.eagerness.is_enabled()
                    && entry.origin == EntryOrigin::Prefetch;
                return NavigateDecision::UseCached {
                    entry: Arc::clone(entry),
                    show_loading,
                };
            }
        }

        NavigateDecision::Fetch(self.issue(key, EntryOrigin::Navigation))
    }

    /// Decides whether to prefetch `key`.
    ///
    /// Pointer prefetches only go to the network with [`PrefetchEagerness::Enabled`], and at
    /// most once per key until it is navigated to. Explicit prefetches are always allowed.
    pub fn prefetch(
        &mut self,
        key: &CacheKey,
        trigger: PrefetchTrigger,
        options: NavigateOptions,
    ) -> PrefetchDecision {
        match trigger {
            PrefetchTrigger::Pointer => {
                if !self.eagerness.is_enabled() {
                    return PrefetchDecision::Skipped(SkipReason::EagernessDisabled);
                }
                if self.is_fetching(key) {
                    return PrefetchDecision::Skipped(SkipReason::InFlight);
                }
                if !self.hovered.insert(key.clone()) {
                    return PrefetchDecision::Skipped(SkipReason::AlreadyPrefetched);
                }
            }
            PrefetchTrigger::Explicit => {
                if !options.skip_client_cache {
                    if self.entries.contains_key(key) {
                        return PrefetchDecision::Skipped(SkipReason::Cached);
                    }
                    if self.is_fetching(key) {
                        return PrefetchDecision::Skipped(SkipReason::InFlight);
                    }
                }
            }
        }

        PrefetchDecision::Fetch(self.issue(key, EntryOrigin::Prefetch))
    }

    /// Applies the result of a fetch.
    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        result: Result<Fetched, FetchError>,
    ) -> Completion {
        let FetchTicket { key, origin, epoch } = ticket;
        if let Some(count) = self.in_flight.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(&key);
            }
        }

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(FetchError::GenerationMismatch { current }) => {
                tracing::debug!(%key, current, "server generation changed, clearing client cache");
                self.clear_all();
                self.generation = Some(current);
                return Completion::GenerationChanged;
            }
            Err(err) => return Completion::Failed(err),
        };

        // Fetched before the last clear. Only a result of the generation known to be current
        // may still be installed.
        if epoch != self.epoch
            && (self.generation.is_none() || self.generation != fetched.generation)
        {
            tracing::trace!(%key, "discarding fetch issued before the cache was cleared");
            return Completion::Discarded;
        }

        if let (Some(known), Some(served)) = (self.generation, fetched.generation) {
            if known != served {
                tracing::debug!(known, served, "server generation changed, clearing client cache");
                self.clear_all();
            }
        }
        if fetched.generation.is_some() {
            self.generation = fetched.generation;
        }

        let entry = Arc::new(ClientCacheEntry {
            key: key.clone(),
            data: fetched.data,
            fetched_at: Instant::now(),
            origin,
            generation: fetched.generation,
        });
        self.entries.insert(key, Arc::clone(&entry));
        Completion::Installed(entry)
    }

    /// Drops every entry, and forgets which keys were hovered.
    ///
    /// Fetches that are still running stay tracked, their results are checked against the
    /// generation when they complete.
    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.hovered.clear();
        self.generation = None;
        self.epoch += 1;
    }

    fn issue(&mut self, key: &CacheKey, origin: EntryOrigin) -> FetchTicket {
        *self.in_flight.entry(key.clone()).or_default() += 1;
        FetchTicket {
            key: key.clone(),
            origin,
            epoch: self.epoch,
        }
    }
}
