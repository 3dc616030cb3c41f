use std::sync::Arc;

use tokio::time::Instant;

use super::{ArtifactRecord, ArtifactStore, CacheKey, GenerationGuard};

/// Why a record is or is not servable as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Within its revalidate interval and of the current generation.
    Fresh,
    /// Of the current generation, but its revalidate interval has elapsed.
    ///
    /// May be served while a regeneration runs in the background.
    Expired,
    /// Produced under an older generation. Must not be served; regeneration blocks.
    GenerationMismatch,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }

    /// Whether the record may be handed out while it is being regenerated.
    pub fn is_servable(&self) -> bool {
        !matches!(self, Staleness::GenerationMismatch)
    }
}

/// The outcome of consulting the [`CachePolicy`].
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Nothing was ever rendered for the key.
    Miss,
    /// A record exists.
    Hit {
        record: Arc<ArtifactRecord>,
        staleness: Staleness,
    },
}

impl Lookup {
    /// `Some(is_stale)` for hits.
    pub fn is_stale(&self) -> Option<bool> {
        match self {
            Lookup::Miss => None,
            Lookup::Hit { staleness, .. } => Some(staleness.is_stale()),
        }
    }
}

/// Computes staleness for stored records.
///
/// A record is stale when it was produced under a different generation, or when its revalidate
/// interval is finite and has elapsed. `Never` records turn stale on generation change only.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    store: ArtifactStore,
    guard: GenerationGuard,
}

impl CachePolicy {
    pub fn new(store: ArtifactStore, guard: GenerationGuard) -> Self {
        Self { store, guard }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn guard(&self) -> &GenerationGuard {
        &self.guard
    }

    /// Looks `key` up as of now.
    pub fn get(&self, key: &CacheKey) -> Lookup {
        self.get_at(key, Instant::now())
    }

    /// Looks `key` up as of `now`.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Lookup {
        match self.store.read(key) {
            None => Lookup::Miss,
            Some(record) => {
                let staleness = self.staleness(&record, now);
                Lookup::Hit { record, staleness }
            }
        }
    }

    /// Classifies a record as of `now`.
    pub fn staleness(&self, record: &ArtifactRecord, now: Instant) -> Staleness {
        if !self.guard.validate(record) {
            Staleness::GenerationMismatch
        } else if record.revalidate.is_expired(record.age(now)) {
            Staleness::Expired
        } else {
            Staleness::Fresh
        }
    }
}
