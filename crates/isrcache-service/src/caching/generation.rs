use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::ArtifactRecord;

/// Binds cache validity to the generation of the artifact-producing logic.
///
/// The generation is initialized once at process start and only ever moves forward through
/// [`advance`](Self::advance). Clones share the same counter.
#[derive(Debug, Clone)]
pub struct GenerationGuard {
    current: Arc<AtomicU64>,
}

impl GenerationGuard {
    /// Creates a guard starting at `initial`.
    pub fn new(initial: u64) -> Self {
        Self {
            current: Arc::new(AtomicU64::new(initial)),
        }
    }

    /// Creates a guard whose generation is the process start time in milliseconds, so that a
    /// restart is always observed as a newer generation.
    pub fn from_process_start() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        Self::new(u64::try_from(millis).unwrap_or_default())
    }

    /// The generation currently being served.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Advances to the next generation and returns it.
    pub fn advance(&self) -> u64 {
        let next = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(generation = next, "advanced cache generation");
        next
    }

    /// Whether the record was produced under the current generation.
    pub fn validate(&self, record: &ArtifactRecord) -> bool {
        record.generation == self.current()
    }
}
