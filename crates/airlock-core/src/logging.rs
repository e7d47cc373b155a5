//! Process-wide logging bootstrap.
//!
//! Binaries call [`init`] once at startup; library code only uses the `log`
//! macros and never touches the backend.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise the `env_logger` backend with `default_level` unless
/// `RUST_LOG` overrides it. Safe to call more than once; later calls are
/// no-ops.
pub fn init(default_level: &str) {
    let filter = env_logger::Env::default().default_filter_or(default_level.to_string());
    INIT.call_once(|| {
        env_logger::Builder::from_env(filter)
            .format_timestamp_secs()
            .init();
    });
}
