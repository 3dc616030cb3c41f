//! Value types shared between the server cache, the renderer and the client cache.
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use humantime::{format_duration, parse_duration};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// How long a rendered artifact stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Revalidate {
    /// Only a generation change makes the artifact stale.
    #[default]
    Never,
    /// The artifact turns stale once it is at least this old.
    After(Duration),
}

impl Revalidate {
    /// Shorthand for [`Revalidate::After`] in whole seconds.
    pub fn after_secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    /// Whether an artifact of the given age has outlived this interval.
    pub fn is_expired(&self, age: Duration) -> bool {
        match self {
            Revalidate::Never => false,
            Revalidate::After(interval) => age >= *interval,
        }
    }
}

impl fmt::Display for Revalidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revalidate::Never => f.write_str("never"),
            Revalidate::After(duration) => write!(f, "{}", format_duration(*duration)),
        }
    }
}

impl Serialize for Revalidate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug)]
struct RevalidateVisitor;

impl<'de> de::Visitor<'de> for RevalidateVisitor {
    type Value = Revalidate;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#""never", a number of seconds, or a duration like "10s""#
        )
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Revalidate::after_secs(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(v)
            .map(Revalidate::after_secs)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v == "never" {
            return Ok(Revalidate::Never);
        }
        parse_duration(v)
            .map(Revalidate::After)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Revalidate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RevalidateVisitor)
    }
}

/// The rendered output for a key: raw markup or structured data.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes with their content type, e.g. rendered HTML.
    Bytes {
        content_type: String,
        data: Bytes,
    },
    /// Structured data, e.g. page props.
    Json(serde_json::Value),
}

impl Payload {
    /// An HTML payload.
    pub fn html(data: impl Into<Bytes>) -> Self {
        Self::Bytes {
            content_type: "text/html; charset=utf-8".into(),
            data: data.into(),
        }
    }

    /// The content type to serve this payload with.
    pub fn content_type(&self) -> &str {
        match self {
            Payload::Bytes { content_type, .. } => content_type,
            Payload::Json(_) => "application/json",
        }
    }

    /// Serializes the payload for the wire.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Payload::Bytes { data, .. } => data.clone(),
            // serializing a `Value` cannot fail
            Payload::Json(value) => Bytes::from(value.to_string()),
        }
    }

    /// Length of the serialized payload.
    pub fn len(&self) -> usize {
        match self {
            Payload::Bytes { data, .. } => data.len(),
            Payload::Json(value) => value.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a request is being made.
///
/// This never changes how staleness is computed, see
/// [`CachesConfig::revalidate_on_prefetch`](crate::config::CachesConfig::revalidate_on_prefetch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestIntent {
    /// A confirmed navigation or a plain request.
    #[default]
    Navigation,
    /// A speculative prefetch, marked with `purpose: prefetch`.
    Prefetch,
}

impl RequestIntent {
    /// Derives the intent from the value of a `purpose` (or `sec-purpose`) header.
    pub fn from_purpose(purpose: Option<&str>) -> Self {
        match purpose {
            Some(value) if value.trim().eq_ignore_ascii_case("prefetch") => Self::Prefetch,
            _ => Self::Navigation,
        }
    }
}

/// Response header carrying the generation the server is currently serving.
///
/// Clients echo it back on their requests, see [`PageService::check_generation`].
///
/// [`PageService::check_generation`]: crate::services::PageService::check_generation
pub const GENERATION_HEADER: &str = "x-isr-generation";

/// Response header reporting how the artifact was obtained: `HIT`, `STALE` or `MISS`.
pub const CACHE_STATUS_HEADER: &str = "x-isr-cache";

/// Request header marking a speculative request, with the value `prefetch`.
pub const PURPOSE_HEADER: &str = "purpose";
