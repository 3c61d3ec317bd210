//! Structured log initialization.
//!
//! Installs a [`tracing_subscriber`] registry with an `fmt` layer. The filter
//! comes from `RUST_LOG` when set, otherwise from `[logging] filter`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// An invalid `[logging] filter` falls back to `info` rather than failing
/// startup.
pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_ansi(config.ansi);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
