use std::env;

use tracing_subscriber::EnvFilter;

pub const VERBOSE_ENV: &str = "PAPERPLUMBER_VERBOSE";

/// Installs the stderr subscriber. `RUST_LOG` wins when set; otherwise
/// `verbose` picks between `debug` and `info`.
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if verbose {
        tracing::debug!("verbose logging enabled");
    }
}

pub fn env_flag() -> bool {
    env::var(VERBOSE_ENV)
        .map(|value| parse_bool(&value))
        .unwrap_or(false)
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
