//! Logging initialization for the federation layer.
//!
//! Builds the subscriber registry the same way for every binary and test
//! harness: a fmt layer filtered by `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global tracing subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logging() {
    let fmt_layer =
        tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());

    tracing_subscriber::registry().with(fmt_layer).try_init().ok();
}
