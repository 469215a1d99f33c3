use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive
pub const LOG_ENV: &str = "PATTERNBANK_LOG";

/// Initialize compact stderr logging.
///
/// Respects `PATTERNBANK_LOG` for filtering, defaulting to `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber may already be installed when embedded in another program
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
