//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info";

/// Initialize tracing for the process from `RUST_LOG`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    install(filter);
}

/// Initialize tracing with `directives` (e.g. `custody_events=debug,info`).
///
/// Unparseable directives fall back to the default filter.
pub fn init_with_filter(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    install(filter);
}

fn install(filter: EnvFilter) {
    // JSON logs + timestamps; a second install is ignored.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
