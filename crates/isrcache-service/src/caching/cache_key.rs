use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Which representation of a route an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArtifactKind {
    /// The rendered page, e.g. `/blog/first`.
    #[default]
    Page,
    /// The data the page is rendered from, requested with a `.json` suffix, e.g.
    /// `/blog/first.json`.
    Data,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Page => "page",
            ArtifactKind::Data => "data",
        }
    }
}

/// Identifies one cacheable page or data artifact.
///
/// A key is derived from a normalized route, its [`ArtifactKind`] and its sorted parameters. Two
/// keys are equal exactly when their hashed metadata is equal, so parameter order does not
/// produce distinct entries, while a page and its data do.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    route: Arc<str>,
    kind: ArtifactKind,
    params: Arc<[(String, String)]>,
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())?;
        let mut sep = '?';
        for (name, value) in self.params.iter() {
            write!(f, "{sep}{name}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Creates a [`CacheKey`] for a route without parameters.
    pub fn for_route(route: &str) -> Self {
        Self::builder(route).build()
    }

    /// Creates a [`CacheKey`] from the path and raw query string of a request URI.
    ///
    /// Query pairs are percent-decoded. Repeated names are all kept.
    pub fn from_uri_parts(path: &str, query: Option<&str>) -> Self {
        let mut builder = Self::builder(path);
        if let Some(query) = query {
            for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
                builder.param(name, value);
            }
        }
        builder.build()
    }

    /// Starts a [`CacheKeyBuilder`] for the given route.
    ///
    /// A `.json` suffix selects [`ArtifactKind::Data`].
    pub fn builder(route: &str) -> CacheKeyBuilder {
        let (route, kind) = normalize_route(route);
        CacheKeyBuilder {
            route,
            kind,
            params: BTreeMap::new(),
        }
    }

    /// The normalized route, e.g. `/blog/first`, shared by the page and its data.
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// The path this artifact is requested under, e.g. `/blog/first` or `/blog/first.json`.
    ///
    /// The data of the root page is `/index.json`.
    pub fn path(&self) -> String {
        match (self.kind, &*self.route) {
            (ArtifactKind::Page, route) => route.to_owned(),
            (ArtifactKind::Data, "/") => "/index.json".to_owned(),
            (ArtifactKind::Data, route) => format!("{route}.json"),
        }
    }

    /// The sorted parameters that contribute to this key.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Returns the human-readable metadata that forms the basis of the [`CacheKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Hex representation of the key digest, shortened to 16 characters.
    pub fn short_hash(&self) -> String {
        let mut out = String::with_capacity(16);
        for b in &self.hash[..8] {
            // writing into a `String` is infallible
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

/// A builder for [`CacheKey`]s.
///
/// Parameters are kept sorted by name (and value, for repeated names), which keeps the resulting
/// metadata and hash **stable** across requests for the same logical resource.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    route: String,
    kind: ArtifactKind,
    params: BTreeMap<String, Vec<String>>,
}

impl CacheKeyBuilder {
    /// Overrides the kind derived from the route.
    pub fn kind(&mut self, kind: ArtifactKind) -> &mut Self {
        self.kind = kind;
        self
    }

    /// Adds a route or query parameter.
    pub fn param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Finalize the [`CacheKey`].
    pub fn build(&self) -> CacheKey {
        let mut metadata = format!("route: {}\nkind: {}\n", self.route, self.kind.as_str());
        let mut params = Vec::new();
        for (name, values) in &self.params {
            let mut values = values.clone();
            values.sort();
            for value in values {
                let _ = writeln!(metadata, "param: {name}={value}");
                params.push((name.clone(), value));
            }
        }

        let hash: [u8; 32] = Sha256::digest(metadata.as_bytes()).into();

        CacheKey {
            route: self.route.as_str().into(),
            kind: self.kind,
            params: params.into(),
            metadata: metadata.into(),
            hash,
        }
    }
}

/// Normalizes a route so that `/blog/first` and `blog/first/` map to the same artifact, and
/// splits off the `.json` suffix of data requests.
fn normalize_route(route: &str) -> (String, ArtifactKind) {
    let route = route.trim();
    let (route, kind) = match route.strip_suffix(".json") {
        Some(route) => (route, ArtifactKind::Data),
        None => (route, ArtifactKind::Page),
    };
    let trimmed = route.trim_matches('/');
    if trimmed.is_empty() || trimmed == "index" {
        return ("/".to_owned(), kind);
    }
    (format!("/{trimmed}"), kind)
}
