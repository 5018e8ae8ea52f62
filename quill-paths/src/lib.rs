//! XDG Base Directory paths for quill.
//!
//! quill uses XDG paths on every platform so that plugin directories and
//! trust stores live in the same place regardless of OS.

use std::path::PathBuf;

/// Get the quill config directory.
///
/// Returns `$XDG_CONFIG_HOME/quill` if set, otherwise `~/.config/quill`.
/// Config files, the plugin directory, the plugin registry and the trust
/// store live here.
///
/// # Examples
///
/// ```
/// use quill_paths::config_dir;
///
/// let config = config_dir();
/// let plugin_dir = config.join("plugins");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("quill")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/quill")
    } else {
        PathBuf::from(".config/quill")
    }
}

/// Directory scanned for plugin binaries
pub fn plugin_dir() -> PathBuf {
    config_dir().join("plugins")
}

/// Trusted plugin signers
pub fn trust_store_path() -> PathBuf {
    config_dir().join("trusted_signers.toml")
}
