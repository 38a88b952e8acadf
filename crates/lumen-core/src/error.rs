//! Error types for configuration handling.

use thiserror::Error;

/// Configuration error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value the renderer cannot work with
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, ConfigError>;
