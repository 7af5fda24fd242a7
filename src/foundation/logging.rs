//! Logging utilities
//!
//! Thin facade over the `log` crate; host applications that already install
//! their own logger can skip [`init`] entirely.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system. Safe to call more than once.
pub fn init() {
    let _ = env_logger::try_init();
}
