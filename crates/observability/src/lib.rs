//! Process-wide tracing setup shared by binaries and tests.
//!
//! Libraries in this workspace only emit `tracing` events; installing a
//! subscriber is left to whoever owns the process.

/// Install the JSON subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Like [`init`], with explicit filter directives instead of `RUST_LOG`.
pub fn init_with_filter(directives: &str) {
    tracing::init_with_filter(directives);
}

/// Subscriber construction (filters, formatting).
pub mod tracing;
