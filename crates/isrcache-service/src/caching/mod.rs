//! # Incremental regeneration caching
//!
//! This module holds the server side of the cache: everything needed to serve precomputed
//! artifacts instantly while making sure that each key is regenerated by at most one task at a
//! time.
//!
//! ## Layers
//!
//! - The [`ArtifactStore`] is a plain in-memory map from [`CacheKey`] to the latest
//!   [`ArtifactRecord`]. Records are immutable and are replaced as a whole, so readers see either
//!   the old or the new record, never a mix. There is no size based eviction.
//! - The [`GenerationGuard`] holds the current generation. Every record is stamped with the
//!   generation it was rendered under, and a record of a different generation is never served.
//! - The [`CachePolicy`] classifies a stored record as fresh, expired or of the wrong generation.
//! - The [`RegenerationCoordinator`] owns the registry of in-flight regenerations. Concurrent
//!   requests for the same key are coalesced onto one shared task.
//!
//! A read goes through the following steps (see
//! [`PageService::get_or_regenerate`](crate::services::PageService::get_or_regenerate)):
//!
//! - A fresh record is returned as-is.
//! - An expired record is returned immediately, and a background regeneration is scheduled.
//!   This is the stale-while-revalidate path.
//! - On a miss, or a record of an older generation, the request waits for the (shared)
//!   regeneration.
//!
//! ### Metrics
//!
//! - `caches.access`: All accesses.
//! - `caches.hit`, `caches.stale`, `caches.miss`, `caches.generation_mismatch`: The outcome of
//!   the policy lookup.
//! - `caches.regeneration`: Actual renders, tagged by `reason`.
//! - `caches.regeneration.failed`: Failed renders, tagged by `reason` and `error`.
//! - `caches.coalesced`: Requests that attached to an already running regeneration.
//! - `caches.lazy_limit_hit`: Background regenerations that were skipped because the
//!   `max_lazy_regenerations` budget was exhausted.
//! - `caches.render.duration`: A timer around the render function.
//!
//! ## [`CacheEntry`] / [`CacheError`]
//!
//! Like everywhere else, fallible cache operations return a [`CacheEntry`], an alias for a
//! [`Result`] around a [`CacheError`]. A failed render never touches the store: whatever was
//! there before stays servable, and the next request simply tries again. There is no backoff.
//!
//! ## [`CacheKey`]
//!
//! The [`CacheKey`] is derived from a normalized route and the sorted request parameters. The
//! human-readable metadata is SHA256-hashed, and only the hash takes part in comparisons.
//!
//! **NOTE**: Care must be taken to make sure that this metadata is stable, as it would otherwise
//! lead to bad cache reuse.

mod cache_error;
mod cache_key;
mod coordinator;
mod generation;
mod policy;
mod store;

pub use cache_error::{CacheEntry, CacheError, RenderError};
pub use cache_key::{ArtifactKind, CacheKey, CacheKeyBuilder};
pub use coordinator::{RegenerationCoordinator, RegenerationReason, SharedRegeneration};
pub use generation::GenerationGuard;
pub use policy::{CachePolicy, Lookup, Staleness};
pub use store::{ArtifactRecord, ArtifactStore};
