use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, Serialize, de};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::client::PrefetchEagerness;
use crate::types::Revalidate;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "isrcache".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning of the server side cache.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CachesConfig {
    /// Revalidate interval for artifacts whose renderer does not specify one.
    pub default_revalidate: Revalidate,

    /// Whether a stale hit for a request marked as prefetch schedules a background
    /// regeneration.
    ///
    /// Staleness is computed the same way for prefetch requests either way. When this is off,
    /// a prefetch is served the stale artifact and the next non-prefetch request revalidates.
    pub revalidate_on_prefetch: bool,

    /// Maximum number of concurrently running background regenerations.
    ///
    /// Blocking regenerations (misses and generation changes) are never limited.
    pub max_lazy_regenerations: isize,
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            default_revalidate: Revalidate::Never,
            revalidate_on_prefetch: false,
            max_lazy_regenerations: 20,
        }
    }
}

/// Settings handed to clients.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Whether hover and touch-start may prefetch (and so refresh) client cache entries.
    pub speculative_prefetch: PrefetchEagerness,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// The origin that renders pages, used by the upstream renderer.
    pub upstream: Option<Url>,

    /// The initial cache generation.
    ///
    /// Defaults to the process start time, so every restart starts a new generation.
    pub generation: Option<u64>,

    /// The timeout for a single render request to the upstream.
    #[serde(with = "humantime_serde")]
    pub render_timeout: Duration,

    /// The maximum number of requests that are processed concurrently.
    ///
    /// A value of `None` indicates no limit.
    pub max_concurrent_requests: Option<usize>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Fine-tune the server side cache.
    pub caches: CachesConfig,

    /// Client prefetch behavior.
    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:3021".to_owned(),
            upstream: None,
            generation: None,
            render_timeout: Duration::from_secs(30),
            max_concurrent_requests: Some(200),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            caches: CachesConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_caches_config() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.caches, CachesConfig::default());
        assert_eq!(cfg.caches.default_revalidate, Revalidate::Never);

        let yaml = r#"
            caches:
              default_revalidate: 10s
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.default_revalidate, Revalidate::after_secs(10));
        // the other fields keep their defaults
        assert!(!cfg.caches.revalidate_on_prefetch);
        assert_eq!(cfg.caches.max_lazy_regenerations, 20);

        let yaml = r#"
            caches:
              default_revalidate: 1
              revalidate_on_prefetch: true
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.default_revalidate, Revalidate::after_secs(1));
        assert!(cfg.caches.revalidate_on_prefetch);
    }

    #[test]
    fn test_client_config() {
        let yaml = r#"
            client:
              speculative_prefetch: disabled
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.client.speculative_prefetch,
            PrefetchEagerness::Disabled
        );
        assert_eq!(
            Config::default().client.speculative_prefetch,
            PrefetchEagerness::Enabled
        );
    }

    #[test]
    fn test_server_settings() {
        let yaml = r#"
            bind: "0.0.0.0:8080"
            upstream: "http://localhost:3000/"
            generation: 42
            render_timeout: 5s
            max_concurrent_requests: null
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080");
        assert_eq!(cfg.upstream.unwrap().as_str(), "http://localhost:3000/");
        assert_eq!(cfg.generation, Some(42));
        assert_eq!(cfg.render_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_concurrent_requests, None);
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "generation: 3").unwrap();
        let cfg = Config::get(Some(file.path())).unwrap();
        assert_eq!(cfg.generation, Some(3));

        assert!(Config::get(Some(Path::new("/definitely/not/here.yml"))).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              not_a_setting: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_invalid_level() {
        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
