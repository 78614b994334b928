//! Tracing setup shared by every binary.

use tracing_subscriber::EnvFilter;

/// Switches log output to JSON lines when set to `json`.
pub const LOG_FORMAT_VAR: &str = "SWIPEFEED_LOG_FORMAT";

/// Installs a stderr subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if wants_json(std::env::var(LOG_FORMAT_VAR).ok().as_deref()) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn wants_json(value: Option<&str>) -> bool {
    value.is_some_and(|value| value.eq_ignore_ascii_case("json"))
}
