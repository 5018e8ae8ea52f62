use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawQuillConfig {
    #[serde(default)]
    pub plugins: RawPluginsConfig,
}

/// Plugin config as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPluginsConfig {
    /// Directory scanned for plugin binaries
    pub directory: Option<PathBuf>,

    /// Require a trusted code signature before loading
    pub verify_signatures: Option<bool>,

    /// Why verification is off; required when `verify_signatures = false`
    pub unsigned_reason: Option<String>,

    /// Only load binaries signed by this identity
    pub expected_identity: Option<String>,

    /// Trusted signers file
    pub trust_store: Option<PathBuf>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuillConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    pub directory: PathBuf,

    pub verify_signatures: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsigned_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_identity: Option<String>,

    pub trust_store: PathBuf,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: quill_paths::plugin_dir(),
            verify_signatures: true,
            unsigned_reason: None,
            expected_identity: None,
            trust_store: quill_paths::trust_store_path(),
        }
    }
}
