use std::sync::Arc;

use futures::future::BoxFuture;

use crate::caching::{CacheKey, RenderError};
use crate::types::{Payload, Revalidate};

/// The output of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub payload: Payload,
    pub revalidate: Revalidate,
}

impl Rendered {
    pub fn new(payload: Payload, revalidate: Revalidate) -> Self {
        Self {
            payload,
            revalidate,
        }
    }
}

/// Produces the artifact for a [`CacheKey`].
///
/// This is the seam to the rendering pipeline. Implementations are responsible for their own
/// timeouts; the cache never cancels a render except on shutdown.
pub trait Renderer: Send + Sync + 'static {
    /// Renders `key`, returning the payload together with its revalidate interval.
    fn render<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Rendered, RenderError>>;
}

impl<R: Renderer + ?Sized> Renderer for Arc<R> {
    fn render<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Rendered, RenderError>> {
        (**self).render(key)
    }
}
