//! Diagnostic tracing for homeostat.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted and never parsed by anything.
//!
//! - **Cycle logs (`io/cycle_log`)**: Product artifacts in
//!   `.homeostat/logs/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Falls back to `info` with `verbose`, `warn` otherwise.
/// Output: stderr, compact format. Stdout is reserved for command reports.
///
/// # Example
/// ```bash
/// RUST_LOG=homeostat=debug homeostat cycle
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
