//! Tracing helpers
// (c) 2025 Ross Younger

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{EnvFilter, prelude::*};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Environment variable that controls what gets logged to stderr
const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Sets up a process-wide subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG` if set, falling back to logging this
/// crate at the given level. Embedders with their own subscriber simply
/// don't call this. Calling twice is a no-op.
pub fn setup(trace_level: &str) {
    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter = EnvFilter::try_from_env(STANDARD_ENV_VAR).unwrap_or_else(|_| {
        EnvFilter::new(format!("{}={trace_level}", env!("CARGO_PKG_NAME")))
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Has tracing been set up by [`setup`]?
#[must_use]
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::SeqCst)
}
