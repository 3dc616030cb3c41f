use std::time::Duration;

use thiserror::Error;

/// An error that happens while producing or serving a cached artifact.
///
/// This is `Clone` because a single in-flight regeneration hands the same outcome to every
/// request that was coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The key has never been rendered and the renderer reports it does not exist.
    #[error("not found")]
    NotFound,
    /// The render function failed.
    ///
    /// The attached string contains the renderer's error message.
    #[error("render failed: {0}")]
    RenderFailure(String),
    /// The render function gave up after the given duration.
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    /// A client asked for an artifact of a generation this process no longer serves.
    #[error("generation mismatch: requested {requested}, current {current}")]
    GenerationMismatch {
        /// The generation named by the client.
        requested: u64,
        /// The generation currently served.
        current: u64,
    },
    /// An unexpected error in the cache itself, like a cancelled regeneration task.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    /// A short, stable name used for metric tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            CacheError::NotFound => "notfound",
            CacheError::RenderFailure(_) => "render",
            CacheError::Timeout(_) => "timeout",
            CacheError::GenerationMismatch { .. } => "generation",
            CacheError::InternalError => "internal",
        }
    }

    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

impl From<tokio::task::JoinError> for CacheError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            tracing::debug!("regeneration task was cancelled");
            return Self::InternalError;
        }
        Self::from_std_error(err)
    }
}

/// The error type produced by a [`Renderer`](crate::services::Renderer).
#[derive(Debug, Error)]
pub enum RenderError {
    /// The route does not exist upstream.
    #[error("not found")]
    NotFound,
    /// The render did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RenderError> for CacheError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::NotFound => CacheError::NotFound,
            RenderError::Timeout(duration) => CacheError::Timeout(duration),
            // `{:#}` keeps the whole context chain in one line
            RenderError::Other(err) => CacheError::RenderFailure(format!("{err:#}")),
        }
    }
}

/// An entry in a cache, containing either `Ok(T)` or an error denoting the reason why an
/// artifact could not be produced.
pub type CacheEntry<T = ()> = Result<T, CacheError>;
