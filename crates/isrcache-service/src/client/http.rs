use anyhow::Context;
use futures::future::BoxFuture;
use reqwest::header;
use reqwest::StatusCode;
use url::Url;

use crate::caching::{ArtifactKind, CacheKey};
use crate::types::{GENERATION_HEADER, PURPOSE_HEADER, Payload, RequestIntent};

use super::{FetchError, FetchRequest, Fetched, Fetcher};

/// Fetches artifacts from an isrcache server over HTTP.
///
/// Keys map to `GET {base}/pages/{route}?{params}`. Prefetches are marked with a
/// `purpose: prefetch` header, and the known server generation is sent along so the server can
/// reject requests from an outdated session.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Url,
}

impl HttpFetcher {
    pub fn new(mut base: Url) -> anyhow::Result<Self> {
        if base.cannot_be_a_base() {
            anyhow::bail!("`{base}` cannot be used as a base URL");
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("isrcache-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, base })
    }

    /// The URL serving `key`.
    pub fn url_for(&self, key: &CacheKey) -> Result<Url, url::ParseError> {
        let path = match (key.kind(), key.route()) {
            (ArtifactKind::Page, "/") => "/index".to_owned(),
            _ => key.path(),
        };
        let mut url = self
            .base
            .join("pages/")?
            .join(path.trim_start_matches('/'))?;
        if !key.params().is_empty() {
            url.query_pairs_mut().extend_pairs(key.params());
        }
        Ok(url)
    }

    async fn fetch_inner(&self, request: FetchRequest<'_>) -> Result<Fetched, FetchError> {
        let url = self
            .url_for(request.key)
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let mut builder = self.client.get(url);
        if request.intent == RequestIntent::Prefetch {
            builder = builder.header(PURPOSE_HEADER, "prefetch");
        }
        if let Some(generation) = request.generation {
            builder = builder.header(GENERATION_HEADER, generation.to_string());
        }

        let response = builder.send().await.map_err(transport_error)?;

        let served_generation = response
            .headers()
            .get(GENERATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return match (request.generation, served_generation) {
                (Some(requested), Some(current)) if requested != current => {
                    Err(FetchError::GenerationMismatch { current })
                }
                _ => Err(FetchError::NotFound),
            };
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_owned();
        let data = response.bytes().await.map_err(transport_error)?;

        let data = if content_type.starts_with("application/json") {
            let value = serde_json::from_slice(&data)
                .map_err(|err| FetchError::Transport(format!("invalid JSON: {err}")))?;
            Payload::Json(value)
        } else {
            Payload::Bytes { content_type, data }
        };

        Ok(Fetched {
            data,
            generation: served_generation,
        })
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    FetchError::Transport(err.to_string())
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, request: FetchRequest<'a>) -> BoxFuture<'a, Result<Fetched, FetchError>> {
        Box::pin(self.fetch_inner(request))
    }
}
