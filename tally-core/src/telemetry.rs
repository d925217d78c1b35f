//! Opt-in tracing bootstrap for binaries embedding Tally.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Set to any value to get JSON log lines instead of text.
pub const LOG_JSON_ENV: &str = "TALLY_LOG_JSON";

/// Installs a global subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"tally_tenant=info,tally_http=debug"`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = std::env::var_os(LOG_JSON_ENV).is_some();
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}
