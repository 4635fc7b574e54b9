//! Logging initialization for daemon and CLI entry points.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Filter comes from `AETHERFLOW_LOG` (falling back to `info`). `json`
/// switches to machine-readable output for log shippers. Calling twice is
/// harmless; the second call is ignored.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env("AETHERFLOW_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!(event = "core.logging.already_initialized");
    }
}
