//! Process-wide `tracing` setup for binaries.
//!
//! Library code only emits events, with structured fields such as `label`,
//! `object_id`, `correlation_id` and `state`. Whoever owns `main` calls
//! [`init_subscriber`] once.

use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor `level` parses.
const FALLBACK_DIRECTIVE: &str = "info";

/// Build the event filter: `RUST_LOG` wins, then `level`, then `info`.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVE))
}

/// Install a stderr subscriber, compact text or one JSON object per line.
///
/// Returns `false` when a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_subscriber(level: &str, json: bool) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.compact().try_init()
    };
    installed.is_ok()
}
