use crate::infrastructure::error::InfraError;
use std::io::IsTerminal;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) -> Result<(), InfraError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid RUST_LOG / log filter: {error}")))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(error) = init_result {
        debug!(error = %error, "tracing subscriber already set, continuing");
    }
    Ok(())
}
