//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using an [`Origin`] or a [`Server`], make sure that it is held until all requests to
//!    it have been made. The server stops serving as soon as it is dropped. To avoid this, assign
//!    it to a variable: `let origin = Origin::new();`.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{self, Request};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::future::{BoxFuture, FutureExt};
use reqwest::Url;
use serde_json::json;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use isrcache_service::caching::{CacheKey, RenderError};
use isrcache_service::services::{Rendered, Renderer};
use isrcache_service::types::{Payload, Revalidate};

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `isrcache` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("isrcache=trace,isrcache_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Serves the given router.
    pub fn new(router: Router) -> Self {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let server = axum_server::from_tcp(listener).serve(router.into_make_service());
        let handle = tokio::spawn(async move {
            server.await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Counts requests per URI (path and query) on a [`Router`].
#[derive(Debug, Clone, Default)]
pub struct HitCounter {
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl HitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `router` so that every request is counted.
    pub fn count(&self, router: Router) -> Router {
        let hitcounter = {
            let hits = self.hits.clone();
            move |extract::OriginalUri(uri), req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        router.layer(middleware::from_fn(hitcounter))
    }

    /// Number of requests for the given path and query, e.g. `/blog/first?lang=en`.
    pub fn hits(&self, uri: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .get(uri)
            .copied()
            .unwrap_or_default()
    }

    /// Takes all hits counted so far, resetting the counters.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    /// Takes the total number of hits so far, resetting the counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }
}

#[derive(Debug, Default)]
struct OriginState {
    renders: AtomicU64,
    cache_control: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    failing: AtomicBool,
}

/// An origin server that renders pages and counts the requests it receives.
///
/// Every path renders a JSON document `{"route": "/path", "now": n}`, where `n` increases with
/// every render. The path `/missing` responds with `404`. The `Cache-Control` header, a render
/// delay and failures can be controlled per test.
pub struct Origin {
    server: Server,
    state: Arc<OriginState>,
    hits: HitCounter,
}

impl Origin {
    pub fn new() -> Self {
        let state = Arc::new(OriginState::default());
        let hits = HitCounter::new();

        let router = Router::new()
            .route("/*path", get(render))
            .with_state(state.clone());
        let server = Server::new(hits.count(router));

        Self {
            server,
            state,
            hits,
        }
    }

    /// Sets the `Cache-Control` header of subsequent responses.
    pub fn set_cache_control(&self, value: Option<&str>) {
        *self.state.cache_control.lock().unwrap() = value.map(str::to_owned);
    }

    /// Delays subsequent responses.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Makes subsequent renders respond with `500`.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful renders so far.
    pub fn renders(&self) -> u64 {
        self.state.renders.load(Ordering::SeqCst)
    }

    /// Number of requests for the given path and query.
    pub fn hits(&self, uri: &str) -> usize {
        self.hits.hits(uri)
    }

    pub fn hit_counter(&self) -> &HitCounter {
        &self.hits
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::new()
    }
}

async fn render(
    extract::State(state): extract::State<Arc<OriginState>>,
    extract::Path(path): extract::Path<String>,
) -> Response {
    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if path == "missing" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "render failed").into_response();
    }

    let now = state.renders.fetch_add(1, Ordering::SeqCst);
    let body = json!({ "route": format!("/{path}"), "now": now }).to_string();

    let mut response = (
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response();
    if let Some(cache_control) = state.cache_control.lock().unwrap().as_deref() {
        if let Ok(value) = cache_control.parse() {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
    }
    response
}

/// An in-process renderer that counts its renders.
///
/// Renders `{"route": .., "render": n}`, where `n` is the number of renders before this one.
#[derive(Debug)]
pub struct CountingRenderer {
    renders: AtomicU64,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    revalidate: Mutex<Revalidate>,
}

impl CountingRenderer {
    pub fn new(revalidate: Revalidate) -> Arc<Self> {
        Arc::new(Self {
            renders: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            revalidate: Mutex::new(revalidate),
        })
    }

    /// Number of renders so far, including failed ones.
    pub fn renders(&self) -> u64 {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_revalidate(&self, revalidate: Revalidate) {
        *self.revalidate.lock().unwrap() = revalidate;
    }

    /// The render number stored in a payload produced by this renderer.
    pub fn render_number(payload: &Payload) -> u64 {
        match payload {
            Payload::Json(value) => value["render"].as_u64().unwrap(),
            other => panic!("not rendered by a CountingRenderer: {other:?}"),
        }
    }
}

impl Renderer for CountingRenderer {
    fn render<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Rendered, RenderError>> {
        async move {
            let delay = *self.delay.lock().unwrap();
            tokio::time::sleep(delay).await;

            let render = self.renders.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("render of {key} failed").into());
            }

            let payload = Payload::Json(json!({ "route": key.path(), "render": render }));
            let revalidate = *self.revalidate.lock().unwrap();
            Ok(Rendered::new(payload, revalidate))
        }
        .boxed()
    }
}
