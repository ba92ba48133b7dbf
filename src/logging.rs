//! Tracing setup.
//!
//! Logs always go to stderr. In target mode stdout is the protocol channel
//! and must never see a diagnostic byte.

use crate::error::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map `-v` count / `-q` to a filter level.
pub fn level_for(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system. `RUST_LOG` overrides the computed level.
pub fn init_logging(verbosity: u8, quiet: bool) -> Result<()> {
    let level = level_for(verbosity, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("blocksync={}", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2)
                .with_file(verbosity >= 3)
                .with_line_number(verbosity >= 3),
        )
        .try_init()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}
