//! Plugin registry - remembers which plugin binaries the user disabled

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::error::PluginHostError;

/// Registry of disabled plugins
///
/// Stored as TOML in `~/.config/quill/plugins/registry.toml`. Entries are
/// binary file names (`hello.so`), so a plugin can be disabled without
/// opening it to learn its display name.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PluginRegistry {
    #[serde(default)]
    pub disabled: BTreeSet<String>,
}

impl PluginRegistry {
    /// Load registry from a TOML file
    ///
    /// Returns an empty registry if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, PluginHostError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let registry: Self =
            toml::from_str(&content).map_err(|e| PluginHostError::Registry(e.to_string()))?;
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<(), PluginHostError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginHostError::Registry(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn is_disabled(&self, file_name: &str) -> bool {
        self.disabled.contains(file_name)
    }

    /// Returns true if the entry was not already disabled
    pub fn disable(&mut self, file_name: &str) -> bool {
        self.disabled.insert(file_name.to_string())
    }

    /// Returns true if the entry was disabled
    pub fn enable(&mut self, file_name: &str) -> bool {
        self.disabled.remove(file_name)
    }

    pub fn disabled_plugins(&self) -> impl Iterator<Item = &str> {
        self.disabled.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registry_default_is_empty() {
        let registry = PluginRegistry::default();
        assert!(registry.disabled.is_empty());
    }

    #[test]
    fn test_registry_enable_disable() {
        let mut registry = PluginRegistry::default();

        assert!(registry.disable("hello.so"));
        assert!(!registry.disable("hello.so"));
        assert!(registry.is_disabled("hello.so"));
        assert!(!registry.is_disabled("other.so"));

        assert!(registry.enable("hello.so"));
        assert!(!registry.is_disabled("hello.so"));
        assert!(!registry.enable("hello.so"));
    }

    #[test]
    fn test_registry_load_missing_file() {
        let registry = PluginRegistry::load(Path::new("/nonexistent/path/registry.toml")).unwrap();
        assert!(registry.disabled.is_empty());
    }

    #[test]
    fn test_registry_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/registry.toml");

        let mut registry = PluginRegistry::default();
        registry.disable("spell.so");
        registry.disable("git.so");
        registry.save(&path).unwrap();

        let loaded = PluginRegistry::load(&path).unwrap();
        let disabled: Vec<&str> = loaded.disabled_plugins().collect();
        assert_eq!(disabled, vec!["git.so", "spell.so"]);
    }

    #[test]
    fn test_registry_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, "disabled = \"not a list\"").unwrap();

        let err = PluginRegistry::load(&path).unwrap_err();
        assert!(matches!(err, PluginHostError::Registry(_)));
    }

    #[test]
    fn test_registry_toml_format() {
        let mut registry = PluginRegistry::default();
        registry.disable("hello.so");

        let toml_str = toml::to_string_pretty(&registry).unwrap();
        assert!(toml_str.contains("disabled"));
        assert!(toml_str.contains("hello.so"));
    }
}
