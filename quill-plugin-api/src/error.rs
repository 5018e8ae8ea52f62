//! Error types shared by plugin authors and the host

use thiserror::Error;

/// Errors a plugin can report from its lifecycle hooks
#[derive(Error, Debug)]
pub enum PluginError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Violations of the binary contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// A fixed-capacity array is full
    #[error("capacity of {capacity} entries exceeded")]
    CapacityExceeded { capacity: usize },

    /// A notification code outside the known set
    #[error("unknown notification code {0}")]
    UnknownNotification(i32),
}
