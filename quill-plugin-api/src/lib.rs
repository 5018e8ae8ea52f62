//! quill-plugin-api - binary plugin ABI for the quill editor
//!
//! Plugins are native dynamic libraries (`.so`, `.dylib`, `.dll`) exporting a
//! small set of C functions. This crate defines that contract for both sides:
//!
//! - [`abi`]: the `#[repr(C)]` structs, entry point signatures and symbol names
//! - [`FixedStr`]: bounded string buffers used inside the ABI structs
//! - [`NotificationCode`] and [`Notification`]: the events a plugin receives
//! - [`Plugin`] and [`export_plugin!`]: write a plugin in safe Rust and let the
//!   macro generate the exports
//!
//! # Threading
//!
//! The host calls every entry point, menu callback and notification on its
//! main thread, one at a time. Plugins may run background work, but anything
//! that calls back into the host must hop back to that thread first.
//!
//! # Example
//!
//! ```ignore
//! use quill_plugin_api::{export_plugin, Plugin, PluginDetails, PluginError};
//!
//! #[derive(Default)]
//! pub struct WordCount;
//!
//! impl Plugin for WordCount {
//!     fn info(&self) -> PluginDetails {
//!         PluginDetails::new("Word Count", "0.1.0")
//!     }
//!
//!     fn init(&mut self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//! }
//!
//! export_plugin!(WordCount);
//! ```

pub mod abi;
pub mod editor;
pub mod error;
pub mod notification;
pub mod text;

pub use abi::{
    EditorInterface, MAX_MENU_ITEM_COUNT, MenuCallback, NotificationData, PluginFunctionArray,
    PluginInfo, PluginMenuItem,
};
pub use error::{AbiError, PluginError};
pub use notification::{Notification, NotificationCode};
pub use text::{Fit, FixedStr};

use std::ffi::c_int;

/// Current plugin ABI version. Plugins must report exactly this value.
pub const API_VERSION: c_int = 1;

/// Plugin metadata in owned Rust strings.
///
/// Written into the fixed-size [`PluginInfo`] buffers; anything too long is
/// truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginDetails {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub website: String,
}

impl PluginDetails {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn website(mut self, website: impl Into<String>) -> Self {
        self.website = website.into();
        self
    }

    /// Fill an ABI struct, stamping the current [`API_VERSION`].
    ///
    /// Returns true if any field was truncated.
    pub fn fill(&self, info: &mut PluginInfo) -> bool {
        info.api_version = API_VERSION;
        [
            info.name.set(&self.name),
            info.version.set(&self.version),
            info.author.set(&self.author),
            info.description.set(&self.description),
            info.website.set(&self.website),
        ]
        .into_iter()
        .any(Fit::is_truncated)
    }
}

/// A plugin written in Rust.
///
/// Only [`info`](Plugin::info) and [`init`](Plugin::init) are required; every
/// other hook defaults to a no-op.
pub trait Plugin: Default + 'static {
    /// Metadata reported through `pluginGetInfo`
    fn info(&self) -> PluginDetails;

    /// Called once after the host checked the ABI version.
    /// Returning an error leaves the plugin in the failed state.
    fn init(&mut self) -> Result<(), PluginError>;

    /// Called before the host unloads the library
    fn cleanup(&mut self) {}

    /// Commands for the plugin menu; entries past [`MAX_MENU_ITEM_COUNT`] are dropped
    fn menu_items(&self) -> Vec<PluginMenuItem> {
        Vec::new()
    }

    /// Called for every editor event
    fn notify(&mut self, _notification: &mut Notification<'_>) {}

    /// Called when the active editor changes; `None` when it goes away
    fn set_editor(&mut self, _editor: Option<EditorInterface>) {}

    /// Called when the user asks for the plugin's settings
    fn show_settings(&mut self) {}
}

/// Export a [`Plugin`] type as a loadable quill plugin.
///
/// Generates the `pluginGetInfo`, `pluginInit`, `pluginCleanup`,
/// `pluginGetFunctions`, `pluginBeNotified`, `pluginSetEditor` and
/// `pluginShowSettings` entry points plus the `pluginApiVersion` symbol, and a
/// `with_plugin` helper for menu callbacks to reach the instance.
///
/// The instance lives in a thread-local on the host's main thread.
///
/// ```ignore
/// quill_plugin_api::export_plugin!(MyPlugin);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        ::std::thread_local! {
            static __QUILL_PLUGIN: ::std::cell::RefCell<::std::option::Option<$plugin_type>> =
                const { ::std::cell::RefCell::new(::std::option::Option::None) };
        }

        /// Run `f` against the live plugin instance.
        ///
        /// Returns `None` before init, after cleanup, or when called reentrantly.
        #[allow(dead_code)]
        pub fn with_plugin<R>(f: impl FnOnce(&mut $plugin_type) -> R) -> ::std::option::Option<R> {
            __QUILL_PLUGIN.with(|cell| match cell.try_borrow_mut() {
                Ok(mut slot) => slot.as_mut().map(f),
                Err(_) => ::std::option::Option::None,
            })
        }

        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static pluginApiVersion: ::std::ffi::c_int = $crate::API_VERSION;

        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn pluginGetInfo(info: *mut $crate::abi::PluginInfo) {
            if info.is_null() {
                return;
            }
            let details = __QUILL_PLUGIN.with(|cell| {
                let mut slot = cell.borrow_mut();
                let plugin = slot.get_or_insert_with(<$plugin_type as ::std::default::Default>::default);
                <$plugin_type as $crate::Plugin>::info(plugin)
            });
            details.fill(unsafe { &mut *info });
        }

        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn pluginInit(_info: *const $crate::abi::PluginInfo) -> bool {
            __QUILL_PLUGIN.with(|cell| {
                let mut slot = cell.borrow_mut();
                let plugin = slot.get_or_insert_with(<$plugin_type as ::std::default::Default>::default);
                if <$plugin_type as $crate::Plugin>::init(plugin).is_ok() {
                    true
                } else {
                    *slot = ::std::option::Option::None;
                    false
                }
            })
        }

        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn pluginCleanup() {
            let plugin = __QUILL_PLUGIN.with(|cell| cell.borrow_mut().take());
            if let ::std::option::Option::Some(mut plugin) = plugin {
                <$plugin_type as $crate::Plugin>::cleanup(&mut plugin);
            }
        }

        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn pluginGetFunctions(funcs: *mut $crate::abi::PluginFunctionArray) {
            if funcs.is_null() {
                return;
            }
            let funcs = unsafe { &mut *funcs };
            let items = with_plugin(|plugin| <$plugin_type as $crate::Plugin>::menu_items(plugin)).unwrap_or_default();
            for item in items {
                if funcs.push(item).is_err() {
                    break;
                }
            }
        }

        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn pluginBeNotified(data: *mut $crate::abi::NotificationData) {
            if data.is_null() {
                return;
            }
            let mut notification = unsafe { $crate::Notification::from_raw(&mut *data) };
            with_plugin(|plugin| <$plugin_type as $crate::Plugin>::notify(plugin, &mut notification));
        }

        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn pluginSetEditor(editor: *const $crate::abi::EditorInterface) {
            let editor = if editor.is_null() {
                ::std::option::Option::None
            } else {
                ::std::option::Option::Some(unsafe { *editor })
            };
            with_plugin(|plugin| <$plugin_type as $crate::Plugin>::set_editor(plugin, editor));
        }

        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn pluginShowSettings() {
            with_plugin(|plugin| <$plugin_type as $crate::Plugin>::show_settings(plugin));
        }
    };
}
