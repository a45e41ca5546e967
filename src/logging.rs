//! Log output setup.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "HOSTSYNC_LOG";

/// Install the stderr subscriber. HOSTSYNC_LOG takes precedence over `verbose`.
pub fn init(verbose: bool) {
    let fallback = if verbose { "hostsync=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
