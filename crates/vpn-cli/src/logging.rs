use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over flags and config.
pub fn setup_logging(verbose: bool, quiet: bool, config: &LoggingConfig) {
    if quiet {
        return;
    }

    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // A subscriber may already be installed when embedded in tests.
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
