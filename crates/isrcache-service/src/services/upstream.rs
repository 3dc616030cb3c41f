use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;
use reqwest::header;
use reqwest::StatusCode;
use url::Url;

use crate::caching::{CacheKey, RenderError};
use crate::types::{Payload, Revalidate};

use super::{Rendered, Renderer};

/// Renders pages by requesting them from an origin server.
///
/// The revalidate interval is taken from the origin's `Cache-Control` header, falling back to
/// the configured default.
#[derive(Debug, Clone)]
pub struct UpstreamRenderer {
    client: reqwest::Client,
    base: Url,
    default_revalidate: Revalidate,
    timeout: Duration,
}

impl UpstreamRenderer {
    pub fn new(
        mut base: Url,
        default_revalidate: Revalidate,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        if base.cannot_be_a_base() {
            anyhow::bail!("upstream `{base}` cannot be used as a base URL");
        }
        // `Url::join` replaces the last segment unless the path ends with a slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("isrcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            base,
            default_revalidate,
            timeout,
        })
    }

    /// The origin URL that renders `key`.
    ///
    /// Data artifacts keep their `.json` suffix so the origin can tell them from pages.
    pub fn url_for(&self, key: &CacheKey) -> Result<Url, url::ParseError> {
        let mut url = self.base.join(key.path().trim_start_matches('/'))?;
        if !key.params().is_empty() {
            url.query_pairs_mut().extend_pairs(key.params());
        }
        Ok(url)
    }

    async fn fetch(&self, key: &CacheKey) -> Result<Rendered, RenderError> {
        let url = self
            .url_for(key)
            .with_context(|| format!("invalid upstream URL for {key}"))?;
        tracing::trace!("Rendering {key} via {url}");

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| self.map_reqwest_error(err, &url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RenderError::NotFound);
        }
        if !status.is_success() {
            return Err(anyhow::anyhow!("upstream responded with {status} for {url}").into());
        }

        let revalidate = response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_cache_control)
            .unwrap_or(self.default_revalidate);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_owned();

        let data = response
            .bytes()
            .await
            .map_err(|err| self.map_reqwest_error(err, &url))?;

        let payload = if content_type.starts_with("application/json") {
            let value = serde_json::from_slice(&data)
                .with_context(|| format!("upstream returned invalid JSON for {key}"))?;
            Payload::Json(value)
        } else {
            Payload::Bytes { content_type, data }
        };

        Ok(Rendered::new(payload, revalidate))
    }

    fn map_reqwest_error(&self, err: reqwest::Error, url: &Url) -> RenderError {
        if err.is_timeout() {
            RenderError::Timeout(self.timeout)
        } else {
            RenderError::Other(anyhow::Error::new(err).context(format!("failed to fetch {url}")))
        }
    }
}

impl Renderer for UpstreamRenderer {
    fn render<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Rendered, RenderError>> {
        Box::pin(self.fetch(key))
    }
}

/// Derives a revalidate interval from a `Cache-Control` header value.
///
/// `s-maxage` wins over `max-age`. `no-store`, `no-cache` and `private` make the artifact stale
/// right away. Returns `None` if the header carries no usable directive.
pub fn parse_cache_control(value: &str) -> Option<Revalidate> {
    let mut max_age: Option<u64> = None;
    let mut s_maxage: Option<u64> = None;

    for directive in value.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        let (name, arg) = match directive.split_once('=') {
            Some((name, arg)) => (
                name.trim().to_owned(),
                Some(arg.trim().trim_matches('"').to_owned()),
            ),
            None => (directive.clone(), None),
        };
        match (name.as_str(), arg) {
            ("no-store" | "no-cache" | "private", _) => return Some(Revalidate::after_secs(0)),
            ("s-maxage", Some(arg)) => s_maxage = arg.parse().ok(),
            ("max-age", Some(arg)) => max_age = arg.parse().ok(),
            _ => {}
        }
    }

    s_maxage.or(max_age).map(Revalidate::after_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_control() {
        assert_eq!(
            parse_cache_control("s-maxage=1, stale-while-revalidate"),
            Some(Revalidate::after_secs(1))
        );
        assert_eq!(
            parse_cache_control("max-age=60, s-maxage=10"),
            Some(Revalidate::after_secs(10))
        );
        assert_eq!(
            parse_cache_control("public, max-age=\"30\""),
            Some(Revalidate::after_secs(30))
        );
        assert_eq!(
            parse_cache_control("private, max-age=60"),
            Some(Revalidate::after_secs(0))
        );
        assert_eq!(parse_cache_control("immutable"), None);
        assert_eq!(parse_cache_control("max-age=soon"), None);
    }

    #[test]
    fn test_url_for() {
        let renderer = UpstreamRenderer::new(
            "http://localhost:3000/app".parse().unwrap(),
            Revalidate::Never,
            Duration::from_secs(1),
        )
        .unwrap();

        let key = CacheKey::from_uri_parts("/blog/first", None);
        assert_eq!(
            renderer.url_for(&key).unwrap().as_str(),
            "http://localhost:3000/app/blog/first"
        );

        let key = CacheKey::from_uri_parts("/search", Some("q=a b&page=2"));
        assert_eq!(
            renderer.url_for(&key).unwrap().as_str(),
            "http://localhost:3000/app/search?page=2&q=a+b"
        );

        let key = CacheKey::for_route("/");
        assert_eq!(
            renderer.url_for(&key).unwrap().as_str(),
            "http://localhost:3000/app/"
        );

        let key = CacheKey::from_uri_parts("/blog/first.json", Some("lang=en"));
        assert_eq!(
            renderer.url_for(&key).unwrap().as_str(),
            "http://localhost:3000/app/blog/first.json?lang=en"
        );

        let key = CacheKey::for_route("/index.json");
        assert_eq!(
            renderer.url_for(&key).unwrap().as_str(),
            "http://localhost:3000/app/index.json"
        );
    }
}
