//! Loader - opens plugin binaries and resolves their entry points
//!
//! Loading never runs plugin code. The loader only maps the library and
//! looks up symbols; the host decides when to call them.

use libloading::Library;
use std::ffi::{CStr, c_int, c_void};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::ptr::NonNull;

use quill_plugin_api::abi::{
    BeNotifiedFn, CleanupFn, EditorInterface, GetFunctionsFn, GetInfoFn, InitFn, MenuCallback,
    NotificationData, PluginFunctionArray, PluginInfo, SetEditorFn, ShowSettingsFn, symbols,
};
use quill_plugin_api::API_VERSION;

use super::error::PluginHostError;

/// An open plugin library. Dropping it unmaps the library.
pub trait PluginModule {
    /// Address of an exported symbol, if present
    fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>>;
}

/// Opens plugin libraries
pub trait ModuleOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginHostError>;
}

/// Opens libraries with the platform dynamic loader
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibOpener;

struct DylibModule {
    library: Library,
}

impl PluginModule for DylibModule {
    fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>> {
        // SAFETY: the symbol is read as an untyped address and never called here.
        let symbol = unsafe {
            self.library
                .get::<*mut c_void>(name.to_bytes_with_nul())
                .ok()?
        };
        NonNull::new(*symbol)
    }
}

impl ModuleOpener for DylibOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginHostError> {
        // SAFETY: library initialisers run here. Only verified binaries reach
        // the opener.
        let library = unsafe { Library::new(path) }.map_err(|e| PluginHostError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(DylibModule { library }))
    }
}

/// Run a plugin callback, turning an unwind into [`PluginHostError::PluginPanicked`]
pub(crate) fn guarded<R>(
    plugin: &str,
    callback: &'static str,
    f: impl FnOnce() -> R,
) -> Result<R, PluginHostError> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| {
        tracing::error!(plugin = %plugin, callback, "Plugin panicked");
        PluginHostError::PluginPanicked {
            name: plugin.to_string(),
            callback,
        }
    })
}

/// Resolved entry points of one plugin.
///
/// Required entry points are plain fields: a table only exists once every one
/// of them resolved. The pointers are only valid while the [`LoadedModule`]
/// they came from is alive, so the table never leaves this crate and is only
/// called through a descriptor that still holds its module.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryPoints {
    get_info: GetInfoFn,
    init: InitFn,
    cleanup: CleanupFn,
    get_functions: GetFunctionsFn,
    be_notified: BeNotifiedFn,
    set_editor: Option<SetEditorFn>,
    show_settings: Option<ShowSettingsFn>,
}

impl EntryPoints {
    pub(crate) fn has_editor_setter(&self) -> bool {
        self.set_editor.is_some()
    }

    pub(crate) fn has_settings(&self) -> bool {
        self.show_settings.is_some()
    }

    pub(crate) fn get_info(&self, plugin: &str) -> Result<PluginInfo, PluginHostError> {
        let mut info = PluginInfo::default();
        // SAFETY: `info` is a valid, writable PluginInfo for the whole call.
        guarded(plugin, "pluginGetInfo", || unsafe { (self.get_info)(&mut info) })?;
        Ok(info)
    }

    pub(crate) fn init(&self, plugin: &str, info: &PluginInfo) -> Result<bool, PluginHostError> {
        guarded(plugin, "pluginInit", || unsafe { (self.init)(info) })
    }

    pub(crate) fn cleanup(&self, plugin: &str) -> Result<(), PluginHostError> {
        guarded(plugin, "pluginCleanup", || unsafe { (self.cleanup)() })
    }

    pub(crate) fn get_functions(&self, plugin: &str) -> Result<PluginFunctionArray, PluginHostError> {
        let mut funcs = PluginFunctionArray::default();
        guarded(plugin, "pluginGetFunctions", || unsafe {
            (self.get_functions)(&mut funcs)
        })?;
        Ok(funcs)
    }

    pub(crate) fn notify(&self, plugin: &str, data: &mut NotificationData) -> Result<(), PluginHostError> {
        guarded(plugin, "pluginBeNotified", || unsafe { (self.be_notified)(data) })
    }

    /// Forward the editor interface; returns false if the plugin has no setter
    pub(crate) fn set_editor(
        &self,
        plugin: &str,
        editor: Option<&EditorInterface>,
    ) -> Result<bool, PluginHostError> {
        let Some(set_editor) = self.set_editor else {
            return Ok(false);
        };
        let ptr = editor.map_or(std::ptr::null(), |e| e as *const EditorInterface);
        guarded(plugin, "pluginSetEditor", || unsafe { set_editor(ptr) })?;
        Ok(true)
    }

    /// Open the settings UI; returns false if the plugin has none
    pub(crate) fn show_settings(&self, plugin: &str) -> Result<bool, PluginHostError> {
        let Some(show_settings) = self.show_settings else {
            return Ok(false);
        };
        guarded(plugin, "pluginShowSettings", || unsafe { show_settings() })?;
        Ok(true)
    }

    /// Invoke a menu callback the plugin handed out
    pub(crate) fn invoke(&self, plugin: &str, callback: MenuCallback) -> Result<(), PluginHostError> {
        guarded(plugin, "menu command", || unsafe { callback() })
    }
}

/// An open plugin library together with its entry points.
///
/// The entry points stay inside the crate; callers outside it can only ask
/// what the module exports.
///
/// ```compile_fail
/// use quill_core::plugins::EntryPoints;
/// ```
///
/// ```compile_fail
/// fn leak(module: &quill_core::plugins::LoadedModule) {
///     let _ = module.entry();
/// }
/// ```
pub struct LoadedModule {
    entry: EntryPoints,
    /// Value of the `pluginApiVersion` symbol, if exported
    declared_version: Option<c_int>,
    _module: Box<dyn PluginModule>,
}

impl LoadedModule {
    pub(crate) fn entry(&self) -> &EntryPoints {
        &self.entry
    }

    /// Whether the plugin exports `pluginShowSettings`
    pub fn has_settings(&self) -> bool {
        self.entry.has_settings()
    }

    /// Whether the plugin exports `pluginSetEditor`
    pub fn has_editor_setter(&self) -> bool {
        self.entry.has_editor_setter()
    }

    pub fn declared_version(&self) -> Option<c_int> {
        self.declared_version
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("entry", &self.entry)
            .field("declared_version", &self.declared_version)
            .finish_non_exhaustive()
    }
}

/// Opens candidate binaries and resolves the plugin ABI
pub struct Loader {
    opener: Box<dyn ModuleOpener>,
    extension: String,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(Box::new(DylibOpener), std::env::consts::DLL_EXTENSION)
    }
}

impl Loader {
    pub fn new(opener: Box<dyn ModuleOpener>, extension: impl Into<String>) -> Self {
        Self {
            opener,
            extension: extension.into(),
        }
    }

    /// Library extension candidates must have, without the dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn has_plugin_extension(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }

    /// Reject paths that cannot be plugin binaries, without reading them
    pub fn check_candidate(&self, path: &Path) -> Result<(), PluginHostError> {
        if !path.is_file() {
            return Err(PluginHostError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        if !self.has_plugin_extension(path) {
            return Err(PluginHostError::InvalidFormat {
                path: path.to_path_buf(),
                reason: format!("expected a .{} library", self.extension),
            });
        }
        Ok(())
    }

    /// Open `path` and resolve its entry points without calling any of them
    pub fn load(&self, path: &Path) -> Result<LoadedModule, PluginHostError> {
        self.check_candidate(path)?;
        let module = self.opener.open(path)?;

        let mut required = [NonNull::<c_void>::dangling(); symbols::REQUIRED.len()];
        for (slot, name) in required.iter_mut().zip(symbols::REQUIRED) {
            *slot = module
                .symbol(name)
                .ok_or_else(|| PluginHostError::MissingSymbol {
                    path: path.to_path_buf(),
                    symbol: name.to_string_lossy().into_owned(),
                })?;
        }
        let [get_info, init, cleanup, get_functions, be_notified] = required;

        // SAFETY: the symbols come from a plugin built against this ABI; their
        // types are fixed by the symbol names.
        let entry = unsafe {
            EntryPoints {
                get_info: std::mem::transmute::<*mut c_void, GetInfoFn>(get_info.as_ptr()),
                init: std::mem::transmute::<*mut c_void, InitFn>(init.as_ptr()),
                cleanup: std::mem::transmute::<*mut c_void, CleanupFn>(cleanup.as_ptr()),
                get_functions: std::mem::transmute::<*mut c_void, GetFunctionsFn>(
                    get_functions.as_ptr(),
                ),
                be_notified: std::mem::transmute::<*mut c_void, BeNotifiedFn>(
                    be_notified.as_ptr(),
                ),
                set_editor: module
                    .symbol(symbols::SET_EDITOR)
                    .map(|p| std::mem::transmute::<*mut c_void, SetEditorFn>(p.as_ptr())),
                show_settings: module
                    .symbol(symbols::SHOW_SETTINGS)
                    .map(|p| std::mem::transmute::<*mut c_void, ShowSettingsFn>(p.as_ptr())),
            }
        };

        // SAFETY: `pluginApiVersion` is an exported `int`; reading it runs no code.
        let declared_version = module
            .symbol(symbols::API_VERSION)
            .map(|p| unsafe { *p.as_ptr().cast::<c_int>() });
        if let Some(found) = declared_version
            && found != API_VERSION
        {
            return Err(PluginHostError::VersionMismatch {
                expected: API_VERSION,
                found,
            });
        }

        tracing::debug!(
            path = %path.display(),
            settings = entry.has_settings(),
            editor_setter = entry.has_editor_setter(),
            "Resolved plugin entry points"
        );

        Ok(LoadedModule {
            entry,
            declared_version,
            _module: module,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    static GET_INFO_CALLS: AtomicUsize = AtomicUsize::new(0);
    static WRONG_VERSION: c_int = 7;

    unsafe extern "C-unwind" fn get_info(_info: *mut PluginInfo) {
        GET_INFO_CALLS.fetch_add(1, Ordering::SeqCst);
    }
    unsafe extern "C-unwind" fn init(_info: *const PluginInfo) -> bool {
        true
    }
    unsafe extern "C-unwind" fn cleanup() {}
    unsafe extern "C-unwind" fn get_functions(_funcs: *mut PluginFunctionArray) {}
    unsafe extern "C-unwind" fn be_notified(_data: *mut NotificationData) {}
    unsafe extern "C-unwind" fn show_settings() {
        panic!("settings exploded");
    }

    struct FakeModule {
        symbols: HashMap<CString, NonNull<c_void>>,
        drops: Arc<AtomicUsize>,
    }

    impl PluginModule for FakeModule {
        fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>> {
            self.symbols.get(name).copied()
        }
    }

    impl Drop for FakeModule {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeOpener {
        symbols: Vec<(&'static CStr, *mut c_void)>,
        drops: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FakeOpener {
        fn complete() -> Self {
            Self {
                symbols: vec![
                    (symbols::GET_INFO, get_info as *mut c_void),
                    (symbols::INIT, init as *mut c_void),
                    (symbols::CLEANUP, cleanup as *mut c_void),
                    (symbols::GET_FUNCTIONS, get_functions as *mut c_void),
                    (symbols::BE_NOTIFIED, be_notified as *mut c_void),
                ],
                drops: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }

        fn without(mut self, name: &CStr) -> Self {
            self.symbols.retain(|(n, _)| *n != name);
            self
        }

        fn with(mut self, name: &'static CStr, ptr: *mut c_void) -> Self {
            self.symbols.push((name, ptr));
            self
        }
    }

    impl ModuleOpener for FakeOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginHostError> {
            if self.fail {
                return Err(PluginHostError::LoadFailed {
                    path: path.to_path_buf(),
                    reason: "not an object file".into(),
                });
            }
            let symbols = self
                .symbols
                .iter()
                .filter_map(|(name, ptr)| Some(((*name).to_owned(), NonNull::new(*ptr)?)))
                .collect();
            Ok(Box::new(FakeModule {
                symbols,
                drops: Arc::clone(&self.drops),
            }))
        }
    }

    fn candidate(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"binary").unwrap();
        path
    }

    fn loader(opener: FakeOpener) -> (Loader, Arc<AtomicUsize>) {
        let drops = Arc::clone(&opener.drops);
        (Loader::new(Box::new(opener), "so"), drops)
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let (loader, _) = loader(FakeOpener::complete());
        let err = loader.load(Path::new("/nonexistent/hello.so")).unwrap_err();
        assert!(matches!(err, PluginHostError::FileNotFound { .. }));
    }

    #[test]
    fn test_wrong_extension_is_invalid_format() {
        let dir = TempDir::new().unwrap();
        let path = candidate(&dir, "notes.txt");
        let (loader, drops) = loader(FakeOpener::complete());

        let err = loader.load(&path).unwrap_err();
        assert!(matches!(err, PluginHostError::InvalidFormat { .. }));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_failure_is_load_failed() {
        let dir = TempDir::new().unwrap();
        let path = candidate(&dir, "broken.so");
        let mut opener = FakeOpener::complete();
        opener.fail = true;
        let (loader, _) = loader(opener);

        let err = loader.load(&path).unwrap_err();
        assert!(matches!(err, PluginHostError::LoadFailed { .. }));
    }

    #[test]
    fn test_missing_symbol_names_first_absent_and_releases_module() {
        let dir = TempDir::new().unwrap();
        let path = candidate(&dir, "partial.so");
        let (loader, drops) = loader(
            FakeOpener::complete()
                .without(symbols::CLEANUP)
                .without(symbols::BE_NOTIFIED),
        );
        let before = GET_INFO_CALLS.load(Ordering::SeqCst);

        match loader.load(&path).unwrap_err() {
            PluginHostError::MissingSymbol { symbol, .. } => assert_eq!(symbol, "pluginCleanup"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(GET_INFO_CALLS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_version_symbol_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = candidate(&dir, "future.so");
        let version = std::ptr::addr_of!(WRONG_VERSION) as *mut c_void;
        let (loader, drops) = loader(FakeOpener::complete().with(symbols::API_VERSION, version));

        let err = loader.load(&path).unwrap_err();
        assert!(matches!(
            err,
            PluginHostError::VersionMismatch { expected: 1, found: 7 }
        ));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_resolves_without_calling() {
        let dir = TempDir::new().unwrap();
        let path = candidate(&dir, "hello.so");
        let (loader, drops) = loader(FakeOpener::complete());
        let before = GET_INFO_CALLS.load(Ordering::SeqCst);

        let module = loader.load(&path).unwrap();
        assert!(!module.has_settings());
        assert!(!module.has_editor_setter());
        assert_eq!(module.declared_version(), None);
        assert_eq!(GET_INFO_CALLS.load(Ordering::SeqCst), before);

        drop(module);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_optional_callbacks_are_panic_safe() {
        let dir = TempDir::new().unwrap();
        let path = candidate(&dir, "settings.so");
        let (loader, _) = loader(
            FakeOpener::complete().with(symbols::SHOW_SETTINGS, show_settings as *mut c_void),
        );

        let module = loader.load(&path).unwrap();
        assert!(module.has_settings());
        let entry = module.entry();
        assert!(matches!(
            entry.show_settings("settings"),
            Err(PluginHostError::PluginPanicked {
                callback: "pluginShowSettings",
                ..
            })
        ));
        assert!(!entry.set_editor("settings", None).unwrap());
    }

    #[test]
    fn test_default_loader_uses_platform_extension() {
        let loader = Loader::default();
        assert_eq!(loader.extension(), std::env::consts::DLL_EXTENSION);
    }
}
