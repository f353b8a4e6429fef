//! Diagnostic logging to stderr.
//!
//! Reports go to stdout; warnings and debug traces go through `tracing` to
//! stderr so the two can be separated in CI logs. `RUST_LOG` overrides the
//! level chosen by `--verbose`.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| format!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
