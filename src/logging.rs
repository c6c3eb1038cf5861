//! Logging setup for the batch runner.
//!
//! Installs a global tracing subscriber writing to stderr. `RUST_LOG` takes
//! precedence over the verbosity chosen on the command line.

use tracing_subscriber::EnvFilter;

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("Failed to install global tracing subscriber: {0}")]
    Init(String),
}

/// Filter directive for a verbosity level.
///
/// `quiet` wins over any number of `-v` flags.
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    match (quiet, verbosity) {
        (true, _) => "mitobatch=warn",
        (false, 0) => "mitobatch=info",
        (false, 1) => "mitobatch=debug",
        (false, _) => "mitobatch=trace",
    }
}

/// Install the global subscriber.
pub fn init(verbosity: u8, quiet: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| LoggingError::Init(err.to_string()))
}
