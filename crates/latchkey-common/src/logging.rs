//! Logging bootstrap
//!
//! Latchkey only emits `tracing` events; installing a subscriber is left to the
//! host process. This helper is for hosts and tests that have none of their own.
//! `RUST_LOG` takes precedence over the supplied default directive.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Install a global `fmt` subscriber.
///
/// Returns `false` if a global subscriber was already set, which is not an error.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
