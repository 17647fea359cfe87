//! Logging initialization for embedders.
//!
//! The library itself only emits `tracing` events; wiring a subscriber is
//! the host application's job. [`init`] is the convenience setup for hosts
//! that do not bring their own: stderr output filtered by `RUST_LOG`, with
//! a fallback level for when the variable is unset.

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; `fallback_level` (e.g. `"carelink=info"`)
/// applies otherwise. Calling this twice is a no-op: the second subscriber
/// fails to install and the first keeps running.
pub fn init(fallback_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
