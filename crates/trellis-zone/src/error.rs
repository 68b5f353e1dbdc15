//! Error types for zones and the event loop

use std::fmt;

/// Result type for event loop operations
pub type ZoneResult<T> = Result<T, ZoneError>;

/// Event loop error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneError {
    /// A driven future never completed once the event loop went idle
    #[error("Future did not complete before the event loop went idle")]
    Stalled,

    /// The local executor refused a future
    #[error("Failed to spawn future: {message}")]
    Spawn {
        /// Executor message
        message: String,
    },
}

/// An error raised by a scheduled callback
///
/// Callback errors never propagate into whoever drives the event loop.
/// They are logged and kept until [`crate::EventLoop::take_uncaught_errors`]
/// collects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtError {
    /// Name of the zone the callback ran in
    pub zone: String,
    /// Rendered error
    pub message: String,
}

impl fmt::Display for UncaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uncaught error in zone \"{}\": {}", self.zone, self.message)
    }
}

impl std::error::Error for UncaughtError {}
