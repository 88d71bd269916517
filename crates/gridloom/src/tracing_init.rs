//! Structured logging setup, grounded on the teacher's `main.rs`
//! (`tracing_subscriber::fmt().with_env_filter(...).json().init()`),
//! generalized to read the filter from [`crate::config::LoggingConfig`]
//! instead of a single hardcoded default string.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global `tracing` subscriber. Call once, near the start
/// of `main`. A second call is a programming error — `tracing` panics
/// on it — so this is deliberately not idempotent, matching the
/// teacher's own single `.init()` call.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
