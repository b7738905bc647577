use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `RUST_LOG` wins over `default_filter` when set.
///
/// Returns false when a subscriber was already installed, which is not an error for callers
/// that initialise logging more than once (tests, embedding hosts).
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
