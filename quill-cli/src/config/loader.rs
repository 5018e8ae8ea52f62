use super::types::{PluginsConfig, QuillConfig, RawPluginsConfig, RawQuillConfig};
use anyhow::{Result, bail};
use quill_core::plugins::{PluginHostConfig, SignaturePolicy};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<QuillConfig> {
        let mut raw = RawQuillConfig::default();

        // Layer 1: User config
        let user_path = Self::user_config_path();
        if user_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        Ok(Self::finalize(raw))
    }

    /// Load a single config file, applying defaults
    pub fn load_from_path(path: &Path) -> Result<QuillConfig> {
        if !path.exists() {
            return Ok(QuillConfig::default());
        }
        Ok(Self::finalize(Self::read_raw(path)?))
    }

    fn read_raw(path: &Path) -> Result<RawQuillConfig> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// User config path (~/.config/quill/config.toml)
    pub fn user_config_path() -> PathBuf {
        quill_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with QUILL_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("QUILL_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".quill/config.toml")
        }
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawQuillConfig, overlay: RawQuillConfig) -> RawQuillConfig {
        RawQuillConfig {
            plugins: RawPluginsConfig {
                directory: overlay.plugins.directory.or(base.plugins.directory),
                verify_signatures: overlay
                    .plugins
                    .verify_signatures
                    .or(base.plugins.verify_signatures),
                unsigned_reason: overlay
                    .plugins
                    .unsigned_reason
                    .or(base.plugins.unsigned_reason),
                expected_identity: overlay
                    .plugins
                    .expected_identity
                    .or(base.plugins.expected_identity),
                trust_store: overlay.plugins.trust_store.or(base.plugins.trust_store),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawQuillConfig) -> QuillConfig {
        let defaults = PluginsConfig::default();
        QuillConfig {
            plugins: PluginsConfig {
                directory: raw.plugins.directory.unwrap_or(defaults.directory),
                verify_signatures: raw.plugins.verify_signatures.unwrap_or(true),
                unsigned_reason: raw.plugins.unsigned_reason,
                expected_identity: raw.plugins.expected_identity,
                trust_store: raw.plugins.trust_store.unwrap_or(defaults.trust_store),
            },
        }
    }
}

impl PluginsConfig {
    /// Host configuration for these settings.
    ///
    /// Turning verification off without a reason is an error.
    pub fn host_config(&self) -> Result<PluginHostConfig> {
        let signature_policy = match (self.verify_signatures, &self.unsigned_reason) {
            (true, _) => SignaturePolicy::Required,
            (false, Some(reason)) if !reason.trim().is_empty() => {
                SignaturePolicy::disabled(reason.clone())
            }
            (false, _) => {
                bail!("plugins.verify_signatures = false requires plugins.unsigned_reason")
            }
        };

        Ok(PluginHostConfig {
            registry_path: self.directory.join("registry.toml"),
            plugin_dir: self.directory.clone(),
            trust_store_path: self.trust_store.clone(),
            signature_policy,
            expected_identity: self.expected_identity.clone(),
            ..PluginHostConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.toml");

        let config = ConfigLoader::load_from_path(&path).unwrap();

        assert!(config.plugins.verify_signatures);
        assert!(config.plugins.directory.ends_with("plugins"));
    }

    #[test]
    fn test_load_from_valid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[plugins]
directory = "/opt/quill/plugins"
verify_signatures = false
unsigned_reason = "local development"
expected_identity = "Quill Team"
"#
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();

        assert_eq!(config.plugins.directory, PathBuf::from("/opt/quill/plugins"));
        assert!(!config.plugins.verify_signatures);
        assert_eq!(
            config.plugins.unsigned_reason,
            Some("local development".to_string())
        );
        assert_eq!(
            config.plugins.expected_identity,
            Some("Quill Team".to_string())
        );
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("invalid.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();

        assert!(ConfigLoader::load_from_path(&path).is_err());
    }

    #[test]
    fn test_merge_raw_overlay_overrides_base() {
        let base = RawQuillConfig {
            plugins: RawPluginsConfig {
                directory: Some(PathBuf::from("/base")),
                verify_signatures: Some(true),
                expected_identity: Some("Base".into()),
                ..Default::default()
            },
        };
        let overlay = RawQuillConfig {
            plugins: RawPluginsConfig {
                directory: Some(PathBuf::from("/overlay")),
                verify_signatures: Some(false),
                unsigned_reason: Some("testing".into()),
                ..Default::default()
            },
        };

        let merged = ConfigLoader::merge_raw(base, overlay);

        assert_eq!(merged.plugins.directory, Some(PathBuf::from("/overlay")));
        assert_eq!(merged.plugins.verify_signatures, Some(false));
        assert_eq!(merged.plugins.unsigned_reason, Some("testing".into()));
        // Unset in overlay, kept from base
        assert_eq!(merged.plugins.expected_identity, Some("Base".into()));
    }

    #[test]
    fn test_merge_raw_none_preserves_base() {
        let base = RawQuillConfig {
            plugins: RawPluginsConfig {
                trust_store: Some(PathBuf::from("/etc/quill/trusted_signers.toml")),
                ..Default::default()
            },
        };

        let merged = ConfigLoader::merge_raw(base, RawQuillConfig::default());
        assert_eq!(
            merged.plugins.trust_store,
            Some(PathBuf::from("/etc/quill/trusted_signers.toml"))
        );
    }

    #[test]
    fn test_host_config_requires_reason_to_skip_verification() {
        let mut plugins = PluginsConfig {
            verify_signatures: false,
            ..Default::default()
        };
        assert!(plugins.host_config().is_err());

        plugins.unsigned_reason = Some("   ".into());
        assert!(plugins.host_config().is_err());

        plugins.unsigned_reason = Some("local development".into());
        let host = plugins.host_config().unwrap();
        assert_eq!(
            host.signature_policy,
            SignaturePolicy::disabled("local development")
        );
    }

    #[test]
    fn test_host_config_places_registry_in_plugin_dir() {
        let plugins = PluginsConfig {
            directory: PathBuf::from("/opt/plugins"),
            ..Default::default()
        };
        let host = plugins.host_config().unwrap();
        assert_eq!(host.plugin_dir, PathBuf::from("/opt/plugins"));
        assert_eq!(host.registry_path, PathBuf::from("/opt/plugins/registry.toml"));
        assert!(host.signature_policy.is_required());
        assert_eq!(host.library_extension, std::env::consts::DLL_EXTENSION);
    }

    #[test]
    fn test_user_config_path() {
        let path = ConfigLoader::user_config_path();
        assert!(path.to_string_lossy().contains("quill"));
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    #[serial]
    fn test_project_config_path() {
        let original = std::env::var("QUILL_PROJECT_CONFIG_DIR").ok();
        unsafe {
            std::env::remove_var("QUILL_PROJECT_CONFIG_DIR");
        }
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from(".quill/config.toml")
        );

        unsafe {
            std::env::set_var("QUILL_PROJECT_CONFIG_DIR", "/tmp/quill-project");
        }
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from("/tmp/quill-project/config.toml")
        );

        unsafe {
            match original {
                Some(value) => std::env::set_var("QUILL_PROJECT_CONFIG_DIR", value),
                None => std::env::remove_var("QUILL_PROJECT_CONFIG_DIR"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_layers_project_over_user() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(user_dir.path().join("quill")).unwrap();
        std::fs::write(
            user_dir.path().join("quill/config.toml"),
            "[plugins]\ndirectory = \"/user/plugins\"\nexpected_identity = \"User\"\n",
        )
        .unwrap();
        std::fs::write(
            project_dir.path().join("config.toml"),
            "[plugins]\ndirectory = \"/project/plugins\"\n",
        )
        .unwrap();

        let original_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        let original_project = std::env::var("QUILL_PROJECT_CONFIG_DIR").ok();
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", user_dir.path());
            std::env::set_var("QUILL_PROJECT_CONFIG_DIR", project_dir.path());
        }

        let config = ConfigLoader::load();

        unsafe {
            match original_xdg {
                Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
                None => std::env::remove_var("XDG_CONFIG_HOME"),
            }
            match original_project {
                Some(value) => std::env::set_var("QUILL_PROJECT_CONFIG_DIR", value),
                None => std::env::remove_var("QUILL_PROJECT_CONFIG_DIR"),
            }
        }

        let config = config.unwrap();
        assert_eq!(config.plugins.directory, PathBuf::from("/project/plugins"));
        assert_eq!(config.plugins.expected_identity, Some("User".to_string()));
    }
}
