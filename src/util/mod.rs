//! General utility code that didn't fit anywhere else
//!
//! Note that most of this module is not exported.
// (c) 2025 Ross Younger

mod crc32;
pub use crc32::{Crc32, crc32_file};

pub(crate) mod executor;

pub mod fs;

mod timeout;
pub use timeout::{Cookie, TimeoutHandler, TimerCallback};

mod tracing;
pub use tracing::{is_initialized as tracing_is_initialised, setup as setup_tracing};

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod littertray;
