use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// Returns the default `RUST_LOG` directive for the given level.
///
/// HTTP plumbing is kept quieter than the cache itself, so that `info` shows the
/// `revalidating ...` lines without every connection being logged.
pub fn default_filter(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN,hyper=ERROR,reqwest=ERROR",
        LevelFilter::INFO => "INFO,hyper=WARN,reqwest=WARN,tower_http=WARN",
        LevelFilter::DEBUG => {
            "INFO,\
             hyper=WARN,\
             isrcache=DEBUG,\
             isrcache_service=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             hyper=WARN,\
             isrcache=TRACE,\
             isrcache_service=TRACE"
        }
    }
}

/// Installs a global JSON-lines subscriber that also forwards events to sentry.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(make_writer)
        .finish()
        .with(sentry::integrations::tracing::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_mentions_crates() {
        assert!(default_filter(LevelFilter::TRACE).contains("isrcache_service=TRACE"));
        assert!(default_filter(LevelFilter::INFO).starts_with("INFO"));
        assert_eq!(default_filter(LevelFilter::OFF), "");
    }
}
