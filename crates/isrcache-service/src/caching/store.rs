use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::types::{Payload, Revalidate};

use super::CacheKey;

/// The latest generated artifact for a [`CacheKey`].
///
/// Records are immutable once installed. A regeneration builds a complete new record and swaps it
/// in, so a reader holding an `Arc<ArtifactRecord>` never observes a partial update.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRecord {
    pub key: CacheKey,
    pub payload: Payload,
    /// Monotonic time of the render, used for all age computations.
    pub generated_at: Instant,
    /// Wall-clock time of the render, for reporting only.
    pub rendered_at: DateTime<Utc>,
    pub revalidate: Revalidate,
    /// The generation this record was produced under.
    pub generation: u64,
}

impl ArtifactRecord {
    /// The age of this record as of `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.generated_at)
    }
}

/// In-memory map from [`CacheKey`] to the latest [`ArtifactRecord`].
///
/// There is no size based eviction: entries live until [`invalidate_all`](Self::invalidate_all)
/// is called on a generation change, or until the process exits.
#[derive(Clone)]
pub struct ArtifactStore {
    records: moka::sync::Cache<CacheKey, Arc<ArtifactRecord>>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("records", &self.records.entry_count())
            .finish()
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactStore {
    pub fn new() -> Self {
        let records = moka::sync::Cache::builder()
            .name("artifacts")
            // NOTE: no `max_capacity`, nothing is ever evicted implicitly
            .build();
        Self { records }
    }

    /// Atomically installs or replaces the record for `key`.
    ///
    /// Returns the installed record.
    pub fn put(
        &self,
        key: CacheKey,
        payload: Payload,
        revalidate: Revalidate,
        generation: u64,
    ) -> Arc<ArtifactRecord> {
        let record = Arc::new(ArtifactRecord {
            key: key.clone(),
            payload,
            generated_at: Instant::now(),
            rendered_at: Utc::now(),
            revalidate,
            generation,
        });
        self.records.insert(key, Arc::clone(&record));
        record
    }

    /// Reads the current record for `key`, if one was ever installed.
    pub fn read(&self, key: &CacheKey) -> Option<Arc<ArtifactRecord>> {
        self.records.get(key)
    }

    /// Drops every record, used when the generation advances.
    pub fn invalidate_all(&self) {
        self.records.invalidate_all();
    }

    /// Approximate number of stored records.
    pub fn len(&self) -> u64 {
        self.records.run_pending_tasks();
        self.records.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
