//! PluginHost - manages plugin lifecycle and event dispatch

use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use quill_plugin_api::{API_VERSION, EditorInterface, PluginFunctionArray};

use super::descriptor::{
    MenuCommand, PluginDescriptor, PluginInfo, PluginState, binary_file_name,
};
use super::dispatch::{DispatchReport, NotificationDispatcher};
use super::error::{LastError, PluginHostError};
use super::events::EditorEvent;
use super::loader::{DylibOpener, Loader};
use super::menu::{MenuBridge, MenuSection};
use super::registry::PluginRegistry;
use super::verifier::{
    self, DetachedSignatureVerifier, SignaturePolicy, SignatureVerifier, TrustStore,
};

/// Configuration for PluginHost
#[derive(Debug, Clone)]
pub struct PluginHostConfig {
    /// Directory scanned for plugin binaries (~/.config/quill/plugins)
    pub plugin_dir: PathBuf,
    /// Enable/disable registry
    pub registry_path: PathBuf,
    /// Trusted signers for the default verifier
    pub trust_store_path: PathBuf,
    pub signature_policy: SignaturePolicy,
    /// Only accept binaries signed by this identity
    pub expected_identity: Option<String>,
    /// File extension of plugin binaries, without the dot
    pub library_extension: String,
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        let plugin_dir = quill_paths::plugin_dir();
        Self {
            registry_path: plugin_dir.join("registry.toml"),
            plugin_dir,
            trust_store_path: quill_paths::trust_store_path(),
            signature_policy: SignaturePolicy::Required,
            expected_identity: None,
            library_extension: std::env::consts::DLL_EXTENSION.to_string(),
        }
    }
}

impl PluginHostConfig {
    /// Config rooted at `plugin_dir`, with the registry inside it
    pub fn with_plugin_dir(plugin_dir: impl Into<PathBuf>) -> Self {
        let plugin_dir = plugin_dir.into();
        Self {
            registry_path: plugin_dir.join("registry.toml"),
            plugin_dir,
            ..Self::default()
        }
    }
}

/// A candidate binary that was rejected before it got a descriptor
#[derive(Debug, Clone, Serialize)]
pub struct CandidateFailure {
    pub path: PathBuf,
    pub error: LastError,
}

/// Outcome of [`PluginHost::load_all`]
#[derive(Debug, Default, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub disabled: usize,
    pub failures: Vec<CandidateFailure>,
}

impl LoadReport {
    pub fn first_failure(&self) -> Option<&CandidateFailure> {
        self.failures.first()
    }
}

/// Descriptors in load order
#[derive(Debug, Default)]
pub struct PluginSet {
    descriptors: Vec<PluginDescriptor>,
}

impl PluginSet {
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    /// Look up by plugin name, falling back to binary file name
    pub fn find(&self, key: &str) -> Option<&PluginDescriptor> {
        self.get(key)
            .or_else(|| self.descriptors.iter().find(|d| d.file_name() == key))
    }

    pub fn by_path(&self, path: &Path) -> Option<&PluginDescriptor> {
        self.descriptors.iter().find(|d| d.path() == path)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PluginDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut PluginDescriptor> {
        self.descriptors.iter_mut().find(|d| d.name() == name)
    }

    fn push(&mut self, descriptor: PluginDescriptor) -> usize {
        self.descriptors.push(descriptor);
        self.descriptors.len() - 1
    }

    fn remove(&mut self, name: &str) -> Option<PluginDescriptor> {
        let index = self.descriptors.iter().position(|d| d.name() == name)?;
        Some(self.descriptors.remove(index))
    }
}

/// The plugin host manages discovery, loading, unloading and event dispatch.
///
/// All plugin code runs on the thread that owns the host, so the host is
/// neither `Send` nor `Sync`.
pub struct PluginHost {
    plugins: PluginSet,
    failures: Vec<CandidateFailure>,
    plugin_dir: PathBuf,
    registry_path: PathBuf,
    verifier: Box<dyn SignatureVerifier>,
    policy: SignaturePolicy,
    loader: Loader,
    dispatcher: NotificationDispatcher,
    menu: MenuBridge,
    editor: Option<EditorInterface>,
    _single_thread: PhantomData<Rc<()>>,
}

impl PluginHost {
    /// Host with the detached-signature verifier and the platform loader
    pub fn new(config: PluginHostConfig) -> Result<Self, PluginHostError> {
        let trust = TrustStore::load(&config.trust_store_path)?;
        let mut verifier = DetachedSignatureVerifier::new(trust);
        if let Some(identity) = &config.expected_identity {
            verifier = verifier.require_identity(identity.clone());
        }
        let loader = Loader::new(Box::new(DylibOpener), config.library_extension.clone());
        Ok(Self::with_parts(config, Box::new(verifier), loader))
    }

    /// Host with a custom verifier and loader
    pub fn with_parts(
        config: PluginHostConfig,
        verifier: Box<dyn SignatureVerifier>,
        loader: Loader,
    ) -> Self {
        if let SignaturePolicy::Disabled { reason } = &config.signature_policy {
            tracing::warn!(reason = %reason, "Plugin signature verification disabled");
        }
        Self {
            plugins: PluginSet::default(),
            failures: Vec::new(),
            plugin_dir: config.plugin_dir,
            registry_path: config.registry_path,
            verifier,
            policy: config.signature_policy,
            loader,
            dispatcher: NotificationDispatcher::new(),
            menu: MenuBridge::new(),
            editor: None,
            _single_thread: PhantomData,
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn signature_policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    /// Why verification is off, if it is
    pub fn verification_disabled_reason(&self) -> Option<&str> {
        match &self.policy {
            SignaturePolicy::Required => None,
            SignaturePolicy::Disabled { reason } => Some(reason),
        }
    }

    pub fn set_signature_policy(&mut self, policy: SignaturePolicy) {
        match &policy {
            SignaturePolicy::Required => {
                tracing::info!("Plugin signature verification enabled");
            }
            SignaturePolicy::Disabled { reason } => {
                tracing::warn!(reason = %reason, "Plugin signature verification disabled");
            }
        }
        self.policy = policy;
    }

    /// Candidate binaries in the plugin directory, sorted by file name
    pub fn discover(&self) -> Result<Vec<PathBuf>, PluginHostError> {
        if !self.plugin_dir.exists() {
            tracing::debug!(dir = %self.plugin_dir.display(), "Plugin directory does not exist");
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.plugin_dir)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if path.is_file() && !hidden && self.loader.has_plugin_extension(&path) {
                found.push(path);
            }
        }
        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(found)
    }

    /// Discover and load every plugin the user has not disabled
    pub fn load_all(&mut self) -> Result<LoadReport, PluginHostError> {
        let registry = PluginRegistry::load(&self.registry_path)?;
        let mut report = LoadReport::default();

        for path in self.discover()? {
            if self.plugins.by_path(&path).is_some() {
                tracing::debug!(path = %path.display(), "Plugin already has a descriptor, skipping");
                continue;
            }

            if registry.is_disabled(&binary_file_name(&path)) {
                tracing::debug!(path = %path.display(), "Plugin disabled, skipping");
                self.add_disabled(&path)?;
                report.disabled += 1;
                continue;
            }

            match self.load_one(&path) {
                Ok(descriptor) => {
                    tracing::info!(
                        plugin = %descriptor.name(),
                        version = %descriptor.info().map_or("", |i| i.version.as_str()),
                        "Plugin loaded"
                    );
                    report.loaded += 1;
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to load plugin");
                    report.failures.push(CandidateFailure {
                        path,
                        error: LastError::from(&e),
                    });
                }
            }
        }

        tracing::info!(
            loaded = report.loaded,
            disabled = report.disabled,
            failed = report.failures.len(),
            "Plugin loading finished"
        );
        Ok(report)
    }

    /// Verify, load and initialize one binary.
    ///
    /// Rejected candidates are recorded in [`failures`](Self::failures). A
    /// plugin whose init fails keeps a `Failed` descriptor.
    pub fn load_one(&mut self, path: &Path) -> Result<&PluginDescriptor, PluginHostError> {
        // The existing descriptor owns this path; nothing was rejected.
        if let Some(existing) = self.plugins.by_path(path) {
            return Err(PluginHostError::AlreadyLoaded {
                name: existing.name().to_string(),
            });
        }
        self.failures.retain(|f| f.path != path);

        match self.try_load(path) {
            Ok(index) => Ok(&self.plugins.descriptors[index]),
            Err(e) => {
                if !matches!(e, PluginHostError::InitializationFailed { .. }) {
                    self.failures.push(CandidateFailure {
                        path: path.to_path_buf(),
                        error: LastError::from(&e),
                    });
                }
                Err(e)
            }
        }
    }

    fn try_load(&mut self, path: &Path) -> Result<usize, PluginHostError> {
        self.loader.check_candidate(path)?;
        let signer = self.verify(path)?;
        let module = self.loader.load(path)?;
        let entry = *module.entry();

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut descriptor = PluginDescriptor::new(stem.clone(), path);
        descriptor.attach(module)?;
        descriptor.set_signer(signer);
        descriptor.set_fingerprint(
            verifier::fingerprint(path)
                .inspect_err(|e| tracing::warn!(path = %path.display(), error = %e, "Could not fingerprint plugin"))
                .ok(),
        );

        let raw_info = entry.get_info(&stem)?;
        let info = PluginInfo::from(&raw_info);
        if info.api_version != API_VERSION {
            return Err(PluginHostError::VersionMismatch {
                expected: API_VERSION,
                found: info.api_version,
            });
        }

        let name = match info.name.trim() {
            "" => stem,
            name => name.to_string(),
        };
        if self.plugins.get(&name).is_some() {
            return Err(PluginHostError::AlreadyLoaded { name });
        }
        descriptor.rename(name.clone());
        descriptor.set_info(info);

        match entry.init(&name, &raw_info) {
            Ok(true) => {}
            Ok(false) => return self.fail_init(descriptor, "pluginInit returned false".into()),
            Err(e) => return self.fail_init(descriptor, e.to_string()),
        }

        let funcs = match entry.get_functions(&name) {
            Ok(funcs) => funcs,
            Err(e) => {
                if let Err(cleanup_err) = entry.cleanup(&name) {
                    tracing::warn!(
                        plugin = %name,
                        error = %cleanup_err,
                        "Plugin cleanup failed after menu query"
                    );
                }
                return self.fail_init(descriptor, e.to_string());
            }
        };
        descriptor.set_commands(collect_commands(&name, &funcs));
        descriptor.transition(PluginState::Initialized)?;

        if let Some(editor) = self.editor
            && let Err(e) = entry.set_editor(&name, Some(&editor))
        {
            descriptor.record_error(&e);
        }

        let index = self.plugins.push(descriptor);
        self.dispatcher.register(&name);
        self.menu.register(&name);
        Ok(index)
    }

    fn verify(&self, path: &Path) -> Result<Option<String>, PluginHostError> {
        match &self.policy {
            SignaturePolicy::Required => {
                let identity = self.verifier.verify(path)?;
                tracing::debug!(path = %path.display(), identity = %identity, "Plugin signature verified");
                Ok(Some(identity))
            }
            SignaturePolicy::Disabled { reason } => {
                tracing::warn!(
                    path = %path.display(),
                    reason = %reason,
                    "Loading plugin without signature verification"
                );
                Ok(None)
            }
        }
    }

    fn fail_init(
        &mut self,
        mut descriptor: PluginDescriptor,
        reason: String,
    ) -> Result<usize, PluginHostError> {
        let err = PluginHostError::InitializationFailed {
            name: descriptor.name().to_string(),
            reason,
        };
        tracing::error!(plugin = %descriptor.name(), error = %err, "Plugin failed to initialize");
        descriptor.transition(PluginState::Failed)?;
        descriptor.record_error(&err);
        self.plugins.push(descriptor);
        Err(err)
    }

    /// Placeholder for a binary the user disabled. It is never opened, so it
    /// goes by its file name and cannot claim a name a plugin reports.
    fn add_disabled(&mut self, path: &Path) -> Result<(), PluginHostError> {
        let mut descriptor = PluginDescriptor::new(binary_file_name(path), path);
        descriptor.transition(PluginState::Disabled)?;
        self.plugins.push(descriptor);
        Ok(())
    }

    /// Clean up and release a plugin, removing its descriptor.
    ///
    /// Cleanup is best-effort: a panicking cleanup is logged and the library
    /// is still released.
    pub fn unload(&mut self, name: &str) -> Result<(), PluginHostError> {
        let name = self.resolve(name)?;
        let descriptor = self
            .plugins
            .get_mut(&name)
            .ok_or_else(|| PluginHostError::NotFound { name: name.clone() })?;

        if descriptor.is_initialized()
            && let Some(entry) = descriptor.entry().copied()
            && let Err(e) = entry.cleanup(&name)
        {
            tracing::warn!(plugin = %name, error = %e, "Plugin cleanup failed, releasing anyway");
        }
        descriptor.transition(PluginState::Unloaded)?;

        self.plugins.remove(&name);
        self.dispatcher.deregister(&name);
        self.menu.deregister(&name);
        tracing::info!(plugin = %name, "Plugin unloaded");
        Ok(())
    }

    /// Unload everything, most recently loaded first
    pub fn unload_all(&mut self) {
        let names: Vec<String> = self
            .plugins
            .iter()
            .rev()
            .map(|d| d.name().to_string())
            .collect();
        for name in names {
            if let Err(e) = self.unload(&name) {
                tracing::warn!(plugin = %name, error = %e, "Failed to unload plugin");
            }
        }
    }

    /// Unload a plugin and load its binary again
    pub fn reload(&mut self, name: &str) -> Result<&PluginDescriptor, PluginHostError> {
        let name = self.resolve(name)?;
        let path = self
            .plugins
            .get(&name)
            .map(|d| d.path().to_path_buf())
            .ok_or_else(|| PluginHostError::NotFound { name: name.clone() })?;

        self.unload(&name)?;
        tracing::info!(plugin = %name, path = %path.display(), "Reloading plugin");
        self.load_one(&path)
    }

    /// Disable a plugin and remember the choice.
    ///
    /// The choice is saved before the plugin is touched, so an error leaves
    /// both the registry and the plugin as they were.
    pub fn disable(&mut self, name: &str) -> Result<(), PluginHostError> {
        let name = self.resolve(name)?;
        let file_name = self
            .plugins
            .get(&name)
            .map(PluginDescriptor::file_name)
            .ok_or_else(|| PluginHostError::NotFound { name: name.clone() })?;

        let mut registry = PluginRegistry::load(&self.registry_path)?;
        if registry.disable(&file_name) {
            registry.save(&self.registry_path)?;
        }

        let descriptor = self
            .plugins
            .get_mut(&name)
            .ok_or_else(|| PluginHostError::NotFound { name: name.clone() })?;
        match descriptor.state() {
            PluginState::Disabled => {}
            PluginState::Initialized => {
                if let Some(entry) = descriptor.entry().copied()
                    && let Err(e) = entry.cleanup(&name)
                {
                    tracing::warn!(plugin = %name, error = %e, "Plugin cleanup failed, releasing anyway");
                }
                descriptor.transition(PluginState::Disabled)?;
            }
            PluginState::Failed => {
                descriptor.transition(PluginState::Unloaded)?;
                descriptor.transition(PluginState::Disabled)?;
            }
            _ => descriptor.transition(PluginState::Disabled)?,
        }
        self.dispatcher.deregister(&name);
        self.menu.deregister(&name);
        tracing::info!(plugin = %name, "Plugin disabled");
        Ok(())
    }

    /// Clear the disabled flag and load the plugin if it was disabled.
    ///
    /// A registry error leaves everything unchanged. Once the flag is
    /// cleared, a failing load is reported like [`load_one`](Self::load_one)
    /// and the plugin stays enabled for the next start.
    pub fn enable(&mut self, name: &str) -> Result<(), PluginHostError> {
        let name = self.resolve(name)?;
        let (file_name, path, state) = self
            .plugins
            .get(&name)
            .map(|d| (d.file_name(), d.path().to_path_buf(), d.state()))
            .ok_or_else(|| PluginHostError::NotFound { name: name.clone() })?;

        let mut registry = PluginRegistry::load(&self.registry_path)?;
        registry.enable(&file_name);
        registry.save(&self.registry_path)?;
        tracing::info!(plugin = %name, "Plugin enabled");

        if state == PluginState::Disabled {
            self.unload(&name)?;
            self.load_one(&path)?;
        }
        Ok(())
    }

    /// Broadcast Shutdown, then unload everything
    pub fn shutdown(&mut self) {
        self.broadcast(&EditorEvent::Shutdown);
        self.unload_all();
    }

    /// Deliver an event to every initialized plugin
    pub fn broadcast(&mut self, event: &EditorEvent) -> DispatchReport {
        let report = self.dispatcher.broadcast(&self.plugins, event);
        self.record_faults(&report);
        report
    }

    /// Deliver a vetoable event; see [`NotificationDispatcher::broadcast_cancellable`]
    pub fn broadcast_cancellable(&mut self, event: &EditorEvent) -> DispatchReport {
        let report = self.dispatcher.broadcast_cancellable(&self.plugins, event);
        self.record_faults(&report);
        report
    }

    /// Deliver an event to one plugin
    pub fn send_to(&mut self, name: &str, event: &EditorEvent) -> DispatchReport {
        let report = self.dispatcher.send_to(&self.plugins, name, event);
        self.record_faults(&report);
        report
    }

    fn record_faults(&mut self, report: &DispatchReport) {
        for fault in &report.faults {
            if let Some(descriptor) = self.plugins.get_mut(&fault.plugin) {
                descriptor.record_error(&fault.error);
            }
        }
    }

    /// Menu sections of all initialized plugins
    pub fn menu_sections(&self) -> Vec<MenuSection> {
        self.menu.sections(&self.plugins)
    }

    /// Run a plugin menu command
    pub fn invoke_command(&mut self, plugin: &str, index: usize) -> Result<(), PluginHostError> {
        let result = self.menu.invoke(&self.plugins, plugin, index);
        if let Err(e @ PluginHostError::PluginPanicked { .. }) = &result
            && let Some(descriptor) = self.plugins.get_mut(plugin)
        {
            descriptor.record_error(e);
        }
        result
    }

    /// Store the active editor and forward it to every initialized plugin
    pub fn set_editor_interface(&mut self, editor: Option<EditorInterface>) {
        self.editor = editor;
        for descriptor in &mut self.plugins.descriptors {
            if !descriptor.is_initialized() {
                continue;
            }
            let Some(entry) = descriptor.entry().copied() else {
                continue;
            };
            if let Err(e) = entry.set_editor(descriptor.name(), editor.as_ref()) {
                descriptor.record_error(&e);
            }
        }
    }

    pub fn editor_interface(&self) -> Option<&EditorInterface> {
        self.editor.as_ref()
    }

    /// Open a plugin's settings UI; returns false if it has none
    pub fn show_settings(&mut self, name: &str) -> Result<bool, PluginHostError> {
        let name = self.resolve(name)?;
        let descriptor = self
            .plugins
            .get_mut(&name)
            .filter(|d| d.is_initialized())
            .ok_or_else(|| PluginHostError::NotFound { name: name.clone() })?;
        let Some(entry) = descriptor.entry().copied() else {
            return Ok(false);
        };

        entry.show_settings(&name).inspect_err(|e| descriptor.record_error(e))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.iter()
    }

    pub fn plugins(&self) -> &PluginSet {
        &self.plugins
    }

    /// Initialized plugins, in load order
    pub fn loaded_plugins(&self) -> Vec<&PluginDescriptor> {
        self.plugins.iter().filter(|d| d.is_initialized()).collect()
    }

    /// Look up by plugin name or binary file name
    pub fn plugin(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.find(name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugin(name).is_some_and(PluginDescriptor::is_initialized)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Rejected candidates from every load attempt so far
    pub fn failures(&self) -> &[CandidateFailure] {
        &self.failures
    }

    pub fn failure_for(&self, path: &Path) -> Option<&CandidateFailure> {
        self.failures.iter().find(|f| f.path == path)
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    fn resolve(&self, key: &str) -> Result<String, PluginHostError> {
        self.plugins
            .find(key)
            .map(|d| d.name().to_string())
            .ok_or_else(|| PluginHostError::NotFound {
                name: key.to_string(),
            })
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        // Give plugins a chance to clean up before their libraries unmap.
        self.unload_all();
    }
}

/// Menu commands from a `pluginGetFunctions` result
fn collect_commands(plugin: &str, funcs: &PluginFunctionArray) -> Vec<MenuCommand> {
    let overflow = funcs.overflow();
    if overflow > 0 {
        tracing::debug!(plugin = %plugin, dropped = overflow, "Plugin declared too many menu items");
    }
    funcs
        .items()
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let command = MenuCommand::from_item(item);
            if command.is_none() {
                tracing::warn!(plugin = %plugin, index, "Dropping menu item without a callback");
            }
            command
        })
        .collect()
}
