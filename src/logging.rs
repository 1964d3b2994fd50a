//! Log setup for instrumented programs and the CLI

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "RANKFORK_LOG";

/// Install a stderr subscriber filtered by `RANKFORK_LOG` (default `warn`).
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init() {
    init_with_default("warn");
}

pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
