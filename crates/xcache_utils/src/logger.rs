use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "XCACHE_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the global `tracing` subscriber. Safe to call more than once.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

        // Another subscriber may already be installed by an embedding host.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
