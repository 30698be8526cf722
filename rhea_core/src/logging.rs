//! Logging initialization.
//!
//! Logs go to stderr: the stdio MCP transport owns stdout, so writing
//! anything else there corrupts the protocol stream. `RUST_LOG` overrides
//! the default filter. Initialization is idempotent.

use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    init_logging("trace");
}

/// Initialize the global tracing subscriber. Safe to call more than once.
pub fn init_logging(log_level: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},rhea_core=debug")));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });
}
