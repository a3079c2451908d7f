//! Tracing initialisation for kmodeval binaries.
//!
//! Call [`init_tracing`] once at program start. The global subscriber can
//! only be installed once per process; later calls are silently ignored,
//! which keeps tests that each initialise logging from panicking.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// * `json` — when `true`, emit newline-delimited JSON log lines.
/// * `level` — default verbosity when `RUST_LOG` is unset. HTTP internals
///   (hyper, h2) are capped at warn so generation requests don't flood the
///   log at debug level.
///
/// `RUST_LOG` overrides everything when present.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,h2=warn,reqwest=warn")));

    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_target(false);

    if json {
        registry.with(layer.json().flatten_event(true)).try_init().ok();
    } else {
        registry.with(layer.compact()).try_init().ok();
    }
}
