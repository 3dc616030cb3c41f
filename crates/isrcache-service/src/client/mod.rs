//! The client side prefetch cache.
//!
//! A [`PrefetchCache`] holds the artifacts a single client session has fetched, and decides
//! whether a navigation can reuse one of them or has to go to the server. It never performs
//! I/O itself: UI events are turned into [`Command`]s, and the cache answers with what to do.
//! The [`ClientRouter`] drives a cache against a [`Fetcher`], such as the [`HttpFetcher`].
//!
//! Entries are never authoritative. The server decides about revalidation, the client only
//! decides whether it needs to ask.

use serde::{Deserialize, Serialize};

mod cache;
mod http;
mod router;

pub use cache::{
    ClientCacheEntry, Command, CommandResult, Completion, EntryOrigin, FetchTicket, Fetched,
    NavigateDecision, PrefetchCache, PrefetchDecision, SkipReason,
};
pub use http::HttpFetcher;
pub use router::{
    ClientRouter, FetchError, FetchRequest, Fetcher, NavigationOutcome, PrefetchOutcome,
};

/// Whether speculative prefetches may touch the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchEagerness {
    /// Hover and touch-start prefetch and refresh entries.
    #[default]
    Enabled,
    /// Pointer events never cause a request, and prefetched entries do not hide the loading
    /// state of a navigation.
    Disabled,
}

impl PrefetchEagerness {
    pub fn is_enabled(&self) -> bool {
        matches!(self, PrefetchEagerness::Enabled)
    }
}

/// What caused a [`Command::Prefetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefetchTrigger {
    /// Hover or touch-start on a link.
    Pointer,
    /// A deliberate call ahead of an expected navigation.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigateOptions {
    /// Ignore any cached entry and overwrite it with a fresh fetch.
    pub skip_client_cache: bool,
}

impl NavigateOptions {
    pub fn skip_client_cache() -> Self {
        Self {
            skip_client_cache: true,
        }
    }
}
