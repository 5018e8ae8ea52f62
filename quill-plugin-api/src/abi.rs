//! The C ABI between the host and a plugin binary.
//!
//! Every type here is `#[repr(C)]` and must stay layout-compatible with
//! `quill_plugin.h`. Entry points use the `C-unwind` calling convention so a
//! panicking Rust plugin unwinds into the host, where it is caught, instead
//! of aborting the process. Plain C plugins are unaffected.

use std::ffi::{c_int, c_uint, c_void};

use crate::error::AbiError;
use crate::text::{Fit, FixedStr};

/// Maximum plugin name length, terminator included
pub const MAX_PLUGIN_NAME_LENGTH: usize = 64;
/// Maximum menu label length, terminator included
pub const MAX_FUNCTION_NAME_LENGTH: usize = 64;
/// Maximum number of menu items per plugin
pub const MAX_MENU_ITEM_COUNT: usize = 32;
pub const MAX_VERSION_LENGTH: usize = 32;
pub const MAX_AUTHOR_LENGTH: usize = 64;
pub const MAX_DESCRIPTION_LENGTH: usize = 256;
pub const MAX_WEBSITE_LENGTH: usize = 128;

/// Exported symbol names
pub mod symbols {
    use std::ffi::CStr;

    pub const GET_INFO: &CStr = c"pluginGetInfo";
    pub const INIT: &CStr = c"pluginInit";
    pub const CLEANUP: &CStr = c"pluginCleanup";
    pub const GET_FUNCTIONS: &CStr = c"pluginGetFunctions";
    pub const BE_NOTIFIED: &CStr = c"pluginBeNotified";
    pub const SET_EDITOR: &CStr = c"pluginSetEditor";
    pub const SHOW_SETTINGS: &CStr = c"pluginShowSettings";
    /// Optional `int` data symbol holding the ABI version the plugin was built for
    pub const API_VERSION: &CStr = c"pluginApiVersion";

    /// Symbols every plugin must export, in resolution order
    pub const REQUIRED: [&CStr; 5] = [GET_INFO, INIT, CLEANUP, GET_FUNCTIONS, BE_NOTIFIED];
}

pub type GetInfoFn = unsafe extern "C-unwind" fn(info: *mut PluginInfo);
pub type InitFn = unsafe extern "C-unwind" fn(info: *const PluginInfo) -> bool;
pub type CleanupFn = unsafe extern "C-unwind" fn();
pub type GetFunctionsFn = unsafe extern "C-unwind" fn(funcs: *mut PluginFunctionArray);
pub type BeNotifiedFn = unsafe extern "C-unwind" fn(notification: *mut NotificationData);
pub type SetEditorFn = unsafe extern "C-unwind" fn(editor: *const EditorInterface);
pub type ShowSettingsFn = unsafe extern "C-unwind" fn();
pub type MenuCallback = unsafe extern "C-unwind" fn();

/// Direct message function of the editing engine
pub type DirectFn = unsafe extern "C" fn(ptr: *mut c_void, msg: c_uint, wparam: usize, lparam: isize) -> isize;

/// Plugin metadata, filled in by `pluginGetInfo`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginInfo {
    pub api_version: c_int,
    pub name: FixedStr<MAX_PLUGIN_NAME_LENGTH>,
    pub version: FixedStr<MAX_VERSION_LENGTH>,
    pub author: FixedStr<MAX_AUTHOR_LENGTH>,
    pub description: FixedStr<MAX_DESCRIPTION_LENGTH>,
    pub website: FixedStr<MAX_WEBSITE_LENGTH>,
}

/// Notification passed to `pluginBeNotified`.
///
/// The host zero-initialises `cancelled`; a plugin may set it only when
/// `can_cancel` is true.
#[repr(C)]
#[derive(Debug)]
pub struct NotificationData {
    pub notification: c_int,
    pub data: *mut c_void,
    pub data_size: usize,
    pub can_cancel: bool,
    pub cancelled: bool,
}

impl NotificationData {
    pub fn new(notification: c_int, data: *mut c_void, data_size: usize, can_cancel: bool) -> Self {
        Self {
            notification,
            data,
            data_size,
            can_cancel,
            cancelled: false,
        }
    }
}

/// One entry in the host's plugin command menu
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginMenuItem {
    pub item_name: FixedStr<MAX_FUNCTION_NAME_LENGTH>,
    pub callback: Option<MenuCallback>,
    /// Key code of the shortcut, 0 for none
    pub shortcut_key: c_int,
    pub shift_key: bool,
    pub cmd_key: bool,
    pub alt_key: bool,
    /// Draw a separator after this item
    pub separator: bool,
}

impl PluginMenuItem {
    /// A menu item with a label and callback; long labels are truncated
    pub fn new(label: &str, callback: MenuCallback) -> Self {
        Self {
            item_name: FixedStr::from_str_truncated(label),
            callback: Some(callback),
            ..Default::default()
        }
    }

    pub fn shortcut(mut self, key: char) -> Self {
        self.shortcut_key = key as c_int;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift_key = true;
        self
    }

    pub fn with_command(mut self) -> Self {
        self.cmd_key = true;
        self
    }

    pub fn with_option(mut self) -> Self {
        self.alt_key = true;
        self
    }

    pub fn separator_after(mut self) -> Self {
        self.separator = true;
        self
    }

    /// Replace the label, reporting truncation
    pub fn set_label(&mut self, label: &str) -> Fit {
        self.item_name.set(label)
    }
}

/// Menu items returned by `pluginGetFunctions`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PluginFunctionArray {
    pub count: c_int,
    pub items: [PluginMenuItem; MAX_MENU_ITEM_COUNT],
}

impl PluginFunctionArray {
    /// Append an item, failing once all slots are used
    pub fn push(&mut self, item: PluginMenuItem) -> Result<(), AbiError> {
        let len = self.len();
        if len >= MAX_MENU_ITEM_COUNT {
            return Err(AbiError::CapacityExceeded {
                capacity: MAX_MENU_ITEM_COUNT,
            });
        }
        self.items[len] = item;
        self.count = (len + 1) as c_int;
        Ok(())
    }

    /// Number of usable items: the declared count clamped to the array
    pub fn len(&self) -> usize {
        (self.count.max(0) as usize).min(MAX_MENU_ITEM_COUNT)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many declared items did not fit in the array
    pub fn overflow(&self) -> usize {
        (self.count.max(0) as usize).saturating_sub(MAX_MENU_ITEM_COUNT)
    }

    pub fn items(&self) -> &[PluginMenuItem] {
        &self.items[..self.len()]
    }
}

impl Default for PluginFunctionArray {
    fn default() -> Self {
        Self {
            count: 0,
            items: [PluginMenuItem::default(); MAX_MENU_ITEM_COUNT],
        }
    }
}

/// Handle to the active editor, passed to `pluginSetEditor`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EditorInterface {
    /// Opaque editor object
    pub editor: *mut c_void,
    pub direct_function: Option<DirectFn>,
    pub direct_pointer: *mut c_void,
}

impl EditorInterface {
    /// Send a message to the editing engine.
    ///
    /// Returns `None` when the host did not provide a direct function.
    ///
    /// # Safety
    ///
    /// The interface must come from the host and still be current, and
    /// `lparam` must satisfy whatever `msg` expects of it.
    pub unsafe fn send(&self, msg: c_uint, wparam: usize, lparam: isize) -> Option<isize> {
        let f = self.direct_function?;
        Some(unsafe { f(self.direct_pointer, msg, wparam, lparam) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C-unwind" fn noop() {}

    #[test]
    fn push_respects_capacity() {
        let mut funcs = PluginFunctionArray::default();
        for i in 0..MAX_MENU_ITEM_COUNT {
            funcs
                .push(PluginMenuItem::new(&format!("item {i}"), noop))
                .unwrap();
        }
        assert_eq!(funcs.len(), MAX_MENU_ITEM_COUNT);
        assert_eq!(
            funcs.push(PluginMenuItem::new("one too many", noop)),
            Err(AbiError::CapacityExceeded {
                capacity: MAX_MENU_ITEM_COUNT
            })
        );
    }

    #[test]
    fn declared_count_is_clamped() {
        let mut funcs = PluginFunctionArray::default();
        funcs.count = 40;
        assert_eq!(funcs.items().len(), MAX_MENU_ITEM_COUNT);
        assert_eq!(funcs.overflow(), 8);

        funcs.count = -3;
        assert!(funcs.is_empty());
        assert_eq!(funcs.overflow(), 0);
    }

    #[test]
    fn menu_item_builder() {
        let item = PluginMenuItem::new("Say Hello", noop)
            .shortcut('h')
            .with_command()
            .separator_after();
        assert_eq!(item.item_name.to_string_lossy(), "Say Hello");
        assert_eq!(item.shortcut_key, 'h' as c_int);
        assert!(item.cmd_key);
        assert!(!item.shift_key);
        assert!(item.separator);
        assert!(item.callback.is_some());
    }

    #[test]
    fn long_label_is_truncated() {
        let label = "x".repeat(100);
        let mut item = PluginMenuItem::default();
        assert!(item.set_label(&label).is_truncated());
        assert_eq!(
            item.item_name.to_string_lossy().len(),
            MAX_FUNCTION_NAME_LENGTH - 1
        );
    }

    #[test]
    fn editor_send_without_function() {
        let iface = EditorInterface {
            editor: std::ptr::null_mut(),
            direct_function: None,
            direct_pointer: std::ptr::null_mut(),
        };
        assert_eq!(unsafe { iface.send(2006, 0, 0) }, None);
    }
}
