use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber. `RUST_LOG` wins over the configured
/// `default_filter`; an unparsable directive falls back to the default.
pub fn init_tracing(default_filter: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let env_filter = build_filter(rust_log.as_deref(), default_filter);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_filter(rust_log: Option<&str>, default_filter: &str) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(default_filter).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    fn max_level(rust_log: Option<&str>, default_filter: &str) -> Option<LevelFilter> {
        build_filter(rust_log, default_filter).max_level_hint()
    }

    #[test]
    fn test_rust_log_overrides_configured_filter() {
        assert_eq!(max_level(Some("debug"), "warn"), Some(LevelFilter::DEBUG));
        assert_eq!(max_level(None, "assistant_memory=trace"), Some(LevelFilter::TRACE));
        assert_eq!(max_level(Some("  "), "warn"), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_bad_directives_fall_back() {
        assert_eq!(max_level(Some("assistant_memory=loud"), "warn"), Some(LevelFilter::WARN));
        assert_eq!(max_level(None, "assistant_memory=loud"), Some(LevelFilter::INFO));
    }
}
