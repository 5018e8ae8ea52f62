//! Plugin host error types

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::descriptor::PluginState;

/// Errors that can occur in the plugin host
#[derive(Error, Debug)]
pub enum PluginHostError {
    /// Candidate binary does not exist
    #[error("Plugin file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// No descriptor with this name
    #[error("Plugin '{name}' not found")]
    NotFound { name: String },

    /// File is not something the host can load
    #[error("Not a plugin binary: {path} ({reason})")]
    InvalidFormat { path: PathBuf, reason: String },

    /// Code signature missing, malformed or untrusted
    #[error("Code signature invalid for {path}: {reason}")]
    SignatureInvalid { path: PathBuf, reason: String },

    /// A required entry point is not exported
    #[error("{path} does not export required symbol '{symbol}'")]
    MissingSymbol { path: PathBuf, symbol: String },

    /// `pluginInit` returned false or panicked
    #[error("Plugin '{name}' failed to initialize: {reason}")]
    InitializationFailed { name: String, reason: String },

    /// A descriptor already exists for this binary or name
    #[error("Plugin '{name}' is already loaded")]
    AlreadyLoaded { name: String },

    /// API version mismatch between quill and plugin
    #[error("API version mismatch: quill expects {expected}, plugin has {found}")]
    VersionMismatch { expected: i32, found: i32 },

    /// The dynamic loader refused the library
    #[error("Failed to load plugin library {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    /// A plugin callback panicked across the ABI
    #[error("Plugin '{name}' panicked in {callback}")]
    PluginPanicked { name: String, callback: &'static str },

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid state transition for '{name}' from {from} to {to}")]
    InvalidStateTransition {
        name: String,
        from: PluginState,
        to: PluginState,
    },

    /// Registry or trust store error (parsing, saving, etc.)
    #[error("Registry error: {0}")]
    Registry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error codes of the plugin error domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidFormat,
    SignatureInvalid,
    MissingSymbol,
    InitializationFailed,
    AlreadyLoaded,
    VersionMismatch,
    LoadFailed,
    PluginFault,
    InvalidState,
    Registry,
    Io,
}

impl ErrorKind {
    /// Stable numeric code
    pub fn code(self) -> i32 {
        match self {
            Self::NotFound => 1000,
            Self::InvalidFormat => 1001,
            Self::SignatureInvalid => 1002,
            Self::MissingSymbol => 1003,
            Self::InitializationFailed => 1004,
            Self::AlreadyLoaded => 1005,
            Self::VersionMismatch => 1006,
            Self::LoadFailed => 1007,
            Self::PluginFault => 1100,
            Self::InvalidState => 1101,
            Self::Registry => 1102,
            Self::Io => 1103,
        }
    }

    /// Failures that reject a single candidate binary before it gets a descriptor
    pub fn is_candidate_level(self) -> bool {
        matches!(
            self,
            Self::NotFound
                | Self::InvalidFormat
                | Self::SignatureInvalid
                | Self::MissingSymbol
                | Self::VersionMismatch
                | Self::LoadFailed
                | Self::AlreadyLoaded
        )
    }
}

impl PluginHostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound { .. } | Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            Self::SignatureInvalid { .. } => ErrorKind::SignatureInvalid,
            Self::MissingSymbol { .. } => ErrorKind::MissingSymbol,
            Self::InitializationFailed { .. } => ErrorKind::InitializationFailed,
            Self::AlreadyLoaded { .. } => ErrorKind::AlreadyLoaded,
            Self::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Self::LoadFailed { .. } => ErrorKind::LoadFailed,
            Self::PluginPanicked { .. } => ErrorKind::PluginFault,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidState,
            Self::Registry(_) => ErrorKind::Registry,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Snapshot of an error kept on a descriptor or failure record for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&PluginHostError> for LastError {
    fn from(err: &PluginHostError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            at: Utc::now(),
        }
    }
}
