//! Telemetry logic.
//! Support logging via tracing.

use tracing_subscriber::EnvFilter;

/// Install the global logging subscriber, filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_is_idempotent() {
        setup_logging();
        setup_logging();
    }
}
