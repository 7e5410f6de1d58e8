use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`, which accepts the
/// verbosity names `debug`, `info`, `quiet` (warnings only) and `error`.
///
/// Examples:
/// - RUST_LOG=webtest=debug webtest run login.webtest
/// - RUST_LOG=trace webtest run login.webtest
pub fn init_logger(default_level: &str) {
    let level = match default_level {
        "quiet" => "warn",
        other => other,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::debug!("Logger initialized");
}
