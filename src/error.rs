//! wgmesh Error Types

use thiserror::Error;

/// Result type alias for wgmesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// wgmesh error types
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Synthesis errors
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Address pool exhausted: index {index} exceeds capacity {capacity}")]
    AddressPoolExhausted { index: u32, capacity: u32 },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error was raised while checking input, before any
    /// key material was generated or any file touched
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Serialization(_)
                | Error::Config(_)
                | Error::ConfigParse(_)
        )
    }

    /// Check if this error is retryable.
    ///
    /// Nothing is retried internally: a retried key generation could yield a
    /// key different from one already referenced by another node. Callers
    /// re-run the whole synthesis instead.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
