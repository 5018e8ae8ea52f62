//! In-process fake plugins for host tests.
//!
//! Each fake is a module of `extern "C-unwind"` functions with thread-local
//! behaviour and call counters, served to the host by [`FakeOpener`] in place
//! of a real dynamic library. Tests run on their own threads, so the
//! thread-local state keeps them independent.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;

use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use quill_core::plugins::{
    DetachedSignatureVerifier, Loader, ModuleOpener, PluginHost, PluginHostConfig,
    PluginHostError, PluginModule, SignaturePolicy, TrustStore, sign_binary,
};
use tempfile::TempDir;

pub const SIGNER: &str = "Quill Test Signing";

/// How a fake plugin behaves
#[derive(Debug, Clone)]
pub struct Behavior {
    pub name: String,
    pub api_version: i32,
    pub init_ok: bool,
    pub init_panics: bool,
    pub get_info_panics: bool,
    pub cleanup_panics: bool,
    pub notify_panics: bool,
    pub menu_panics: bool,
    pub get_functions_panics: bool,
    /// Cancel notifications with this code
    pub cancel_code: Option<i32>,
    pub menu_items: usize,
    /// Extra items without a callback
    pub null_items: usize,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            name: String::new(),
            api_version: quill_plugin_api::API_VERSION,
            init_ok: true,
            init_panics: false,
            get_info_panics: false,
            cleanup_panics: false,
            notify_panics: false,
            menu_panics: false,
            get_functions_panics: false,
            cancel_code: None,
            menu_items: 0,
            null_items: 0,
        }
    }
}

/// What the host did to a fake plugin
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub get_info: usize,
    pub init: usize,
    pub cleanup: usize,
    pub get_functions: usize,
    /// Notification codes received, in order
    pub notified: Vec<i32>,
    /// Payloads received, as text without the terminator
    pub payloads: Vec<Option<String>>,
    pub set_editor: usize,
    pub editor_present: Vec<bool>,
    pub show_settings: usize,
    pub menu_invocations: usize,
}

/// Symbols of a fake library
#[derive(Clone)]
pub struct FakeLibrary {
    pub symbols: Vec<(&'static CStr, *mut c_void)>,
}

impl FakeLibrary {
    pub fn without(mut self, name: &CStr) -> Self {
        self.symbols.retain(|(n, _)| *n != name);
        self
    }

    pub fn with(mut self, name: &'static CStr, ptr: *mut c_void) -> Self {
        self.symbols.retain(|(n, _)| *n != name);
        self.symbols.push((name, ptr));
        self
    }
}

/// Define a fake plugin module
macro_rules! fake_plugin {
    ($module:ident) => {
        pub mod $module {
            use std::cell::RefCell;
            use std::ffi::c_void;

            use quill_plugin_api::abi::{
                EditorInterface, NotificationData, PluginFunctionArray, PluginInfo,
                PluginMenuItem, symbols,
            };
            use quill_plugin_api::Notification;

            use super::{Behavior, Calls, FakeLibrary, record_cleanup};

            thread_local! {
                static BEHAVIOR: RefCell<Behavior> = RefCell::new(Behavior::default());
                static CALLS: RefCell<Calls> = RefCell::new(Calls::default());
            }

            pub fn configure(behavior: Behavior) {
                BEHAVIOR.with(|b| *b.borrow_mut() = behavior);
                CALLS.with(|c| *c.borrow_mut() = Calls::default());
            }

            pub fn calls() -> Calls {
                CALLS.with(|c| c.borrow().clone())
            }

            fn behavior() -> Behavior {
                BEHAVIOR.with(|b| b.borrow().clone())
            }

            fn record(f: impl FnOnce(&mut Calls)) {
                CALLS.with(|c| f(&mut c.borrow_mut()));
            }

            unsafe extern "C-unwind" fn get_info(info: *mut PluginInfo) {
                record(|c| c.get_info += 1);
                let b = behavior();
                if b.get_info_panics {
                    panic!("get_info exploded");
                }
                let info = unsafe { &mut *info };
                info.api_version = b.api_version;
                let _ = info.name.set(&b.name);
                let _ = info.version.set("1.0.0");
                let _ = info.author.set("quill tests");
            }

            unsafe extern "C-unwind" fn init(_info: *const PluginInfo) -> bool {
                record(|c| c.init += 1);
                let b = behavior();
                if b.init_panics {
                    panic!("init exploded");
                }
                b.init_ok
            }

            unsafe extern "C-unwind" fn cleanup() {
                record(|c| c.cleanup += 1);
                record_cleanup(stringify!($module));
                if behavior().cleanup_panics {
                    panic!("cleanup exploded");
                }
            }

            unsafe extern "C-unwind" fn menu_command() {
                record(|c| c.menu_invocations += 1);
                if behavior().menu_panics {
                    panic!("menu command exploded");
                }
            }

            unsafe extern "C-unwind" fn get_functions(funcs: *mut PluginFunctionArray) {
                record(|c| c.get_functions += 1);
                let b = behavior();
                if b.get_functions_panics {
                    panic!("get_functions exploded");
                }
                let funcs = unsafe { &mut *funcs };
                for i in 0..b.menu_items {
                    let mut item = PluginMenuItem::new(&format!("Command {i}"), menu_command);
                    if i == 0 {
                        item = item.shortcut('h').with_command().with_shift();
                    }
                    if funcs.push(item).is_err() {
                        funcs.count += 1;
                    }
                }
                for _ in 0..b.null_items {
                    let _ = funcs.push(PluginMenuItem::default());
                }
            }

            unsafe extern "C-unwind" fn be_notified(data: *mut NotificationData) {
                let b = behavior();
                let mut notification = unsafe { Notification::from_raw(&mut *data) };
                let code = notification.raw_code();
                let payload = notification.payload_str().map(str::to_string);
                record(|c| {
                    c.notified.push(code);
                    c.payloads.push(payload);
                });
                if b.notify_panics {
                    panic!("notify exploded");
                }
                if b.cancel_code == Some(code) {
                    notification.cancel();
                }
            }

            unsafe extern "C-unwind" fn set_editor(editor: *const EditorInterface) {
                record(|c| {
                    c.set_editor += 1;
                    c.editor_present.push(!editor.is_null());
                });
            }

            unsafe extern "C-unwind" fn show_settings() {
                record(|c| c.show_settings += 1);
            }

            /// Required entry points only
            pub fn library() -> FakeLibrary {
                FakeLibrary {
                    symbols: vec![
                        (symbols::GET_INFO, get_info as *mut c_void),
                        (symbols::INIT, init as *mut c_void),
                        (symbols::CLEANUP, cleanup as *mut c_void),
                        (symbols::GET_FUNCTIONS, get_functions as *mut c_void),
                        (symbols::BE_NOTIFIED, be_notified as *mut c_void),
                    ],
                }
            }

            /// Every entry point, optional ones included
            pub fn full_library() -> FakeLibrary {
                library()
                    .with(symbols::SET_EDITOR, set_editor as *mut c_void)
                    .with(symbols::SHOW_SETTINGS, show_settings as *mut c_void)
            }
        }
    };
}

fake_plugin!(alpha);
fake_plugin!(beta);
fake_plugin!(gamma);

struct FakeModule {
    symbols: HashMap<&'static CStr, NonNull<c_void>>,
    file: String,
    releases: Rc<RefCell<HashMap<String, usize>>>,
}

impl PluginModule for FakeModule {
    fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>> {
        self.symbols
            .iter()
            .find(|(n, _)| **n == name)
            .map(|(_, p)| *p)
    }
}

impl Drop for FakeModule {
    fn drop(&mut self) {
        *self.releases.borrow_mut().entry(self.file.clone()).or_default() += 1;
    }
}

/// Serves fake libraries by file name and counts how often each is
/// opened and released
#[derive(Clone, Default)]
pub struct FakeOpener {
    libraries: Rc<RefCell<HashMap<String, FakeLibrary>>>,
    opens: Rc<RefCell<HashMap<String, usize>>>,
    releases: Rc<RefCell<HashMap<String, usize>>>,
}

impl FakeOpener {
    pub fn serve(&self, file: &str, library: FakeLibrary) {
        self.libraries.borrow_mut().insert(file.to_string(), library);
    }

    pub fn opens(&self, file: &str) -> usize {
        self.opens.borrow().get(file).copied().unwrap_or(0)
    }

    pub fn releases(&self, file: &str) -> usize {
        self.releases.borrow().get(file).copied().unwrap_or(0)
    }
}

impl ModuleOpener for FakeOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginHostError> {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let library = self.libraries.borrow().get(&file).cloned().ok_or_else(|| {
            PluginHostError::LoadFailed {
                path: path.to_path_buf(),
                reason: "no fake library".into(),
            }
        })?;
        *self.opens.borrow_mut().entry(file.clone()).or_default() += 1;

        let symbols = library
            .symbols
            .iter()
            .filter_map(|(name, ptr)| Some((*name, NonNull::new(*ptr)?)))
            .collect();
        Ok(Box::new(FakeModule {
            symbols,
            file,
            releases: Rc::clone(&self.releases),
        }))
    }
}

/// A plugin directory with a signing key the host trusts
pub struct TestEnv {
    pub dir: TempDir,
    pub key: SigningKey,
    pub opener: FakeOpener,
}

impl TestEnv {
    pub fn new() -> Self {
        CLEANUP_ORDER.with(|o| o.borrow_mut().clear());
        Self {
            dir: TempDir::new().unwrap(),
            key: SigningKey::random(&mut OsRng),
            opener: FakeOpener::default(),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write a placeholder binary, sign it, and serve `library` for it
    pub fn install(&self, file: &str, library: FakeLibrary) -> PathBuf {
        let path = self.install_unsigned(file, library);
        sign_binary(&path, SIGNER, &self.key).unwrap();
        path
    }

    pub fn install_unsigned(&self, file: &str, library: FakeLibrary) -> PathBuf {
        let path = self.dir.path().join(file);
        std::fs::write(&path, format!("fake plugin {file}")).unwrap();
        self.opener.serve(file, library);
        path
    }

    pub fn config(&self) -> PluginHostConfig {
        PluginHostConfig::with_plugin_dir(self.dir.path())
    }

    pub fn host(&self) -> PluginHost {
        self.host_with(self.config())
    }

    pub fn host_with(&self, config: PluginHostConfig) -> PluginHost {
        let mut trust = TrustStore::default();
        trust.trust(SIGNER, self.key.verifying_key());
        PluginHost::with_parts(
            config,
            Box::new(DetachedSignatureVerifier::new(trust)),
            Loader::new(Box::new(self.opener.clone()), "so"),
        )
    }

    pub fn unverified_host(&self) -> PluginHost {
        let mut config = self.config();
        config.signature_policy = SignaturePolicy::disabled("fake plugins are unsigned");
        self.host_with(config)
    }
}

thread_local! {
    static CLEANUP_ORDER: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

/// Fake plugins whose cleanup ran on this thread, in call order
pub fn cleanup_order() -> Vec<&'static str> {
    CLEANUP_ORDER.with(|o| o.borrow().clone())
}

fn record_cleanup(plugin: &'static str) {
    CLEANUP_ORDER.with(|o| o.borrow_mut().push(plugin));
}

/// Behaviour with a display name and defaults otherwise
pub fn named(name: &str) -> Behavior {
    Behavior {
        name: name.to_string(),
        ..Behavior::default()
    }
}
