//! Example quill plugin.
//!
//! Build with `cargo build --release`, copy the library into the plugin
//! directory and sign it:
//!
//! ```text
//! quill plugin keygen --out ~/.quill-keys --identity "Hello Plugins" --trust
//! cp target/release/libhello_plugin.so ~/.config/quill/plugins/
//! quill plugin sign ~/.config/quill/plugins/libhello_plugin.so \
//!     --key ~/.quill-keys/signing_key.pem --identity "Hello Plugins"
//! quill plugin menu
//! ```

use std::ffi::CString;

use quill_plugin_api::{
    EditorInterface, Notification, NotificationCode, Plugin, PluginDetails, PluginError,
    PluginMenuItem, editor, export_plugin,
};

#[derive(Default)]
pub struct Hello {
    editor: Option<EditorInterface>,
    /// Veto saves while set
    save_guard: bool,
    events_seen: u64,
}

impl Hello {
    fn send(&self, msg: u32, wparam: usize, lparam: isize) -> Option<isize> {
        let editor = self.editor?;
        // SAFETY: the host hands us a live interface and clears it when it goes away
        unsafe { editor.send(msg, wparam, lparam) }
    }

    fn insert(&self, text: &str) {
        let Ok(text) = CString::new(text) else {
            return;
        };
        if self
            .send(editor::REPLACE_SEL, 0, text.as_ptr() as isize)
            .is_none()
        {
            eprintln!("hello-plugin: no editor to insert into");
        }
    }
}

unsafe extern "C-unwind" fn say_hello() {
    with_plugin(|p| p.insert("Hello, quill!"));
}

unsafe extern "C-unwind" fn count_lines() {
    with_plugin(|p| match p.send(editor::GET_LINE_COUNT, 0, 0) {
        Some(lines) => eprintln!("hello-plugin: {lines} lines"),
        None => eprintln!("hello-plugin: no editor"),
    });
}

unsafe extern "C-unwind" fn toggle_save_guard() {
    with_plugin(|p| {
        p.save_guard = !p.save_guard;
        eprintln!(
            "hello-plugin: save guard {}",
            if p.save_guard { "on" } else { "off" }
        );
    });
}

unsafe extern "C-unwind" fn about() {
    with_plugin(|p| eprintln!("hello-plugin: {} events seen", p.events_seen));
}

impl Plugin for Hello {
    fn info(&self) -> PluginDetails {
        PluginDetails::new("Hello", env!("CARGO_PKG_VERSION"))
            .author("quill contributors")
            .description("Greets you and can block saves")
            .website("https://github.com/quill-editor/quill")
    }

    fn init(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn cleanup(&mut self) {
        self.editor = None;
    }

    fn menu_items(&self) -> Vec<PluginMenuItem> {
        vec![
            PluginMenuItem::new("Say Hello", say_hello)
                .shortcut('h')
                .with_command()
                .with_shift(),
            PluginMenuItem::new("Count Lines", count_lines).separator_after(),
            PluginMenuItem::new("Toggle Save Guard", toggle_save_guard),
            PluginMenuItem::new("About Hello", about),
        ]
    }

    fn notify(&mut self, notification: &mut Notification<'_>) {
        self.events_seen += 1;
        if notification.code() == Some(NotificationCode::FileBeforeSave) && self.save_guard {
            notification.cancel();
        }
    }

    fn set_editor(&mut self, editor: Option<EditorInterface>) {
        self.editor = editor;
    }

    fn show_settings(&mut self) {
        eprintln!("hello-plugin settings: save_guard = {}", self.save_guard);
    }
}

export_plugin!(Hello);
