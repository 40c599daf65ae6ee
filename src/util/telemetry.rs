//! Tracing setup helpers.

use tracing_subscriber::EnvFilter;

/// Install a default fmt subscriber driven by `RUST_LOG`, falling back to
/// `info` for this crate when the variable is unset. No-op when the host
/// already installed a subscriber.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("taskhook=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
