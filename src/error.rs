//! # Error Types
//!
//! Custom error types for Hoverlog using `thiserror`.

use thiserror::Error;

use crate::battery::BatteryError;

/// Main error type for Hoverlog
#[derive(Debug, Error)]
pub enum HoverlogError {
    /// Serial link errors (open, read, write)
    #[error("Serial error: {0}")]
    Serial(String),

    /// Serial device could not be opened at any of the given paths
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// Feedback frame failed checksum validation
    #[error("Checksum mismatch: computed {expected:02X?}, received {actual:02X?}")]
    Checksum { expected: [u8; 2], actual: [u8; 2] },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A run with this name already exists in the dataset
    #[error("Run '{0}' already exists")]
    RunExists(String),

    /// No run with this name exists in the dataset
    #[error("Run '{0}' does not exist")]
    RunNotFound(String),

    /// Run names become directory names and must be plain identifiers
    #[error("Invalid run name '{0}'")]
    InvalidRunName(String),

    /// A row carried a field the run schema does not declare
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    /// A row lacked a field the run schema declares
    #[error("Missing field '{0}'")]
    MissingField(String),

    /// A field did not match its declared shape
    #[error("Field '{field}' expects {expected} values, got {actual}")]
    ShapeMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Battery collaborator errors
    #[error("Battery error: {0}")]
    Battery(#[from] BatteryError),
}

/// Result type alias for Hoverlog
pub type Result<T> = std::result::Result<T, HoverlogError>;
