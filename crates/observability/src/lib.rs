//! Process-wide tracing setup shared by anything embedding the engine.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber: JSON lines on stdout, filtered
/// via `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; only the first call installs anything.
pub fn init() {
    init_with_default_filter("info");
}

/// Like [`init`], with an explicit fallback filter for when `RUST_LOG` is
/// unset. Tests and local tooling use this to turn engine internals up
/// without touching the environment.
pub fn init_with_default_filter(fallback: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
