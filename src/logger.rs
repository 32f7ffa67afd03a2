use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber for a kelos binary.
///
/// `RUST_LOG` controls filtering (default `info`); `KELOS_LOG_FORMAT=json`
/// switches to JSON lines for log collectors.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("KELOS_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
