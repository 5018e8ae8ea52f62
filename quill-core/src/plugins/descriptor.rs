//! PluginDescriptor - the host's record of one plugin binary

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use quill_plugin_api::abi::{self, MenuCallback, PluginMenuItem};

use super::error::{LastError, PluginHostError};
use super::loader::{EntryPoints, LoadedModule};

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Unloaded,
    /// Library open, entry points resolved, not yet initialized
    Loaded,
    Initialized,
    /// `pluginInit` failed; terminal until reloaded
    Failed,
    /// Turned off by the user; terminal until enabled
    Disabled,
}

impl PluginState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Failed => "failed",
            Self::Disabled => "disabled",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `to`
    pub fn can_transition_to(self, to: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, to),
            (Unloaded, Loaded)
                | (Loaded, Initialized)
                | (Loaded, Failed)
                | (Unloaded | Loaded | Initialized, Disabled)
                | (Initialized, Unloaded)
                | (Failed | Disabled, Unloaded)
        )
    }

    /// States in which the library handle is open
    pub fn holds_module(self) -> bool {
        matches!(self, Self::Loaded | Self::Initialized)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plugin metadata as reported by `pluginGetInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub website: String,
    pub api_version: i32,
}

impl From<&abi::PluginInfo> for PluginInfo {
    fn from(raw: &abi::PluginInfo) -> Self {
        Self {
            name: raw.name.to_string_lossy(),
            version: raw.version.to_string_lossy(),
            author: raw.author.to_string_lossy(),
            description: raw.description.to_string_lossy(),
            website: raw.website.to_string_lossy(),
            api_version: raw.api_version,
        }
    }
}

/// Keyboard shortcut of a menu command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shortcut {
    pub key: i32,
    pub command: bool,
    pub shift: bool,
    pub option: bool,
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.command {
            f.write_str("Cmd+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        if self.option {
            f.write_str("Opt+")?;
        }
        match u32::try_from(self.key).ok().and_then(char::from_u32) {
            Some(c) if c.is_ascii_graphic() => write!(f, "{}", c.to_ascii_uppercase()),
            _ => write!(f, "Key{}", self.key),
        }
    }
}

/// A command a plugin contributes to the menu
#[derive(Debug, Clone, Serialize)]
pub struct MenuCommand {
    pub label: String,
    #[serde(skip)]
    pub(crate) callback: MenuCallback,
    pub shortcut: Option<Shortcut>,
    pub separator: bool,
}

impl MenuCommand {
    /// Convert an ABI menu item; `None` if it has no callback
    pub fn from_item(item: &PluginMenuItem) -> Option<Self> {
        let callback = item.callback?;
        let shortcut = (item.shortcut_key != 0).then_some(Shortcut {
            key: item.shortcut_key,
            command: item.cmd_key,
            shift: item.shift_key,
            option: item.alt_key,
        });
        Some(Self {
            label: item.item_name.to_string_lossy(),
            callback,
            shortcut,
            separator: item.separator,
        })
    }
}

/// Runtime record of one plugin binary.
///
/// Owned and mutated only by [`PluginHost`](super::PluginHost). The library
/// handle is held only while the state is `Loaded` or `Initialized`.
#[derive(Debug)]
pub struct PluginDescriptor {
    name: String,
    path: PathBuf,
    state: PluginState,
    info: Option<PluginInfo>,
    module: Option<LoadedModule>,
    commands: Vec<MenuCommand>,
    last_error: Option<LastError>,
    fingerprint: Option<String>,
    signer: Option<String>,
}

impl PluginDescriptor {
    pub(crate) fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            state: PluginState::Unloaded,
            info: None,
            module: None,
            commands: Vec::new(),
            last_error: None,
            fingerprint: None,
            signer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binary file name, the key used by the registry
    pub fn file_name(&self) -> String {
        binary_file_name(&self.path)
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn info(&self) -> Option<&PluginInfo> {
        self.info.as_ref()
    }

    pub fn commands(&self) -> &[MenuCommand] {
        &self.commands
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// SHA-256 of the binary as loaded
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Identity that signed the binary, if it was verified
    pub fn signer(&self) -> Option<&str> {
        self.signer.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.state == PluginState::Initialized
    }

    pub fn has_open_module(&self) -> bool {
        self.module.is_some()
    }

    pub fn has_settings(&self) -> bool {
        self.entry().is_some_and(EntryPoints::has_settings)
    }

    pub(crate) fn entry(&self) -> Option<&EntryPoints> {
        self.module.as_ref().map(LoadedModule::entry)
    }

    /// Move to `to`, releasing the library when leaving the open states.
    ///
    /// Clears the last error on success.
    pub(crate) fn transition(&mut self, to: PluginState) -> Result<(), PluginHostError> {
        if !self.state.can_transition_to(to) {
            return Err(PluginHostError::InvalidStateTransition {
                name: self.name.clone(),
                from: self.state,
                to,
            });
        }
        if self.state.holds_module() && !to.holds_module() {
            self.release();
        }
        tracing::trace!(plugin = %self.name, from = %self.state, to = %to, "Plugin state change");
        self.state = to;
        self.last_error = None;
        Ok(())
    }

    fn release(&mut self) {
        self.commands.clear();
        if self.module.take().is_some() {
            tracing::debug!(plugin = %self.name, "Released plugin library");
        }
    }

    pub(crate) fn attach(&mut self, module: LoadedModule) -> Result<(), PluginHostError> {
        self.transition(PluginState::Loaded)?;
        self.module = Some(module);
        Ok(())
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_info(&mut self, info: PluginInfo) {
        self.info = Some(info);
    }

    pub(crate) fn set_commands(&mut self, commands: Vec<MenuCommand>) {
        self.commands = commands;
    }

    pub(crate) fn set_fingerprint(&mut self, fingerprint: Option<String>) {
        self.fingerprint = fingerprint;
    }

    pub(crate) fn set_signer(&mut self, signer: Option<String>) {
        self.signer = signer;
    }

    pub(crate) fn record_error(&mut self, err: &PluginHostError) {
        self.last_error = Some(LastError::from(err));
    }

    /// Serializable view for listings
    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            name: self.name.clone(),
            path: self.path.clone(),
            state: self.state,
            info: self.info.clone(),
            commands: self.commands.len(),
            has_settings: self.has_settings(),
            fingerprint: self.fingerprint.clone(),
            signer: self.signer.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Snapshot of a descriptor for display and JSON output
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub path: PathBuf,
    pub state: PluginState,
    pub info: Option<PluginInfo>,
    pub commands: usize,
    pub has_settings: bool,
    pub fingerprint: Option<String>,
    pub signer: Option<String>,
    pub last_error: Option<LastError>,
}

pub(crate) fn binary_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
