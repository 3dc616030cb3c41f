//! An incremental-regeneration cache.
//!
//! Rendered artifacts are served from memory right away, stale ones are regenerated in the
//! background, and there is never more than one regeneration per key in flight. See
//! [`services::PageService`] for the server side read path and [`client`] for the session cache
//! of a client.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod client;
pub mod config;
pub mod logging;
pub mod services;
pub mod types;
pub mod utils;
