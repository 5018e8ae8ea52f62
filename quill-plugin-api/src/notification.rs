//! Notification codes and the plugin-side view of a notification

use std::ffi::{c_int, c_void};
use std::fmt;

use crate::abi::NotificationData;
use crate::error::AbiError;

/// Events the host sends through `pluginBeNotified`.
///
/// The discriminants are part of the ABI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCode {
    /// The plugin system finished loading
    Ready = 1,
    /// The host is shutting down
    Shutdown = 2,
    /// A file was opened (payload: path)
    FileOpened = 3,
    /// A file was closed (payload: path)
    FileClosed = 4,
    /// A file was saved (payload: path)
    FileSaved = 5,
    /// A file is about to be saved (payload: path); can be cancelled
    FileBeforeSave = 6,
    /// Another buffer became active
    BufferActivated = 7,
    /// Document language changed (payload: language name)
    LanguageChanged = 8,
    /// Document content changed
    DocumentModified = 9,
    /// Text selection changed
    SelectionChanged = 10,
    /// Raw notification from the editing engine (payload: engine struct bytes)
    EngineNotify = 11,
}

impl NotificationCode {
    pub const ALL: [NotificationCode; 11] = [
        Self::Ready,
        Self::Shutdown,
        Self::FileOpened,
        Self::FileClosed,
        Self::FileSaved,
        Self::FileBeforeSave,
        Self::BufferActivated,
        Self::LanguageChanged,
        Self::DocumentModified,
        Self::SelectionChanged,
        Self::EngineNotify,
    ];

    pub fn from_raw(code: c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as c_int == code)
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }

    /// Whether a plugin may veto the host operation behind this event
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::FileBeforeSave)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Shutdown => "shutdown",
            Self::FileOpened => "file_opened",
            Self::FileClosed => "file_closed",
            Self::FileSaved => "file_saved",
            Self::FileBeforeSave => "file_before_save",
            Self::BufferActivated => "buffer_activated",
            Self::LanguageChanged => "language_changed",
            Self::DocumentModified => "document_modified",
            Self::SelectionChanged => "selection_changed",
            Self::EngineNotify => "engine_notify",
        }
    }
}

impl TryFrom<c_int> for NotificationCode {
    type Error = AbiError;

    fn try_from(code: c_int) -> Result<Self, Self::Error> {
        Self::from_raw(code).ok_or(AbiError::UnknownNotification(code))
    }
}

impl fmt::Display for NotificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safe view over a [`NotificationData`] handed to a plugin
pub struct Notification<'a> {
    raw: &'a mut NotificationData,
}

impl<'a> Notification<'a> {
    /// Wrap the struct the host passed in.
    ///
    /// # Safety
    ///
    /// `raw.data` must be null or point to `raw.data_size` readable bytes
    /// that stay valid for `'a`.
    pub unsafe fn from_raw(raw: &'a mut NotificationData) -> Self {
        Self { raw }
    }

    /// Decoded event code, `None` for codes newer than this crate
    pub fn code(&self) -> Option<NotificationCode> {
        NotificationCode::from_raw(self.raw.notification)
    }

    pub fn raw_code(&self) -> c_int {
        self.raw.notification
    }

    /// Payload bytes, if any
    pub fn payload(&self) -> Option<&[u8]> {
        if self.raw.data.is_null() || self.raw.data_size == 0 {
            return None;
        }
        // SAFETY: guaranteed by the contract of `from_raw`.
        Some(unsafe {
            std::slice::from_raw_parts(self.raw.data as *const u8, self.raw.data_size)
        })
    }

    /// Payload as text, with the trailing NUL removed
    pub fn payload_str(&self) -> Option<&str> {
        let bytes = self.payload()?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).ok()
    }

    pub fn can_cancel(&self) -> bool {
        self.raw.can_cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.raw.cancelled
    }

    /// Veto the host operation. Ignored for events that cannot be cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.raw.can_cancel {
            self.raw.cancelled = true;
        }
        self.raw.cancelled
    }

    /// Raw data pointer for engine passthrough events
    pub fn data_ptr(&self) -> *mut c_void {
        self.raw.data
    }
}
