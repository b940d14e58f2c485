//! Error types for smm-error-logger.

use thiserror::Error;

/// Main error type for all smm-error-logger operations.
///
/// The RDE command handler never produces this type; it reports per-command
/// status codes instead. Everything that is fatal to a poll-loop tick (short
/// reads/writes, buffer header invariant violations, entry checksum failures)
/// lands here.
#[derive(Debug, Error)]
pub enum SmmLoggerError {
    /// I/O error during region mapping or sink file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config and sink).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Circular buffer protocol error (short access, bad pointer, bad
    /// checksum, header drift).
    #[error("buffer error: {0}")]
    Buffer(String),

    /// Configuration file missing, malformed, or inconsistent.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias using SmmLoggerError.
pub type Result<T> = std::result::Result<T, SmmLoggerError>;
