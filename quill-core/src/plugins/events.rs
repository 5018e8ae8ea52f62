//! Editor events delivered to plugins

use std::path::{Path, PathBuf};

use quill_plugin_api::NotificationCode;

/// An editor event and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    Ready,
    Shutdown,
    FileOpened { path: PathBuf },
    FileClosed { path: PathBuf },
    FileSaved { path: PathBuf },
    /// Vetoable
    FileBeforeSave { path: PathBuf },
    BufferActivated { path: Option<PathBuf> },
    LanguageChanged { language: String },
    DocumentModified,
    SelectionChanged,
    /// Raw editing-engine notification, passed through untouched
    Engine { payload: Vec<u8> },
}

impl EditorEvent {
    pub fn code(&self) -> NotificationCode {
        match self {
            Self::Ready => NotificationCode::Ready,
            Self::Shutdown => NotificationCode::Shutdown,
            Self::FileOpened { .. } => NotificationCode::FileOpened,
            Self::FileClosed { .. } => NotificationCode::FileClosed,
            Self::FileSaved { .. } => NotificationCode::FileSaved,
            Self::FileBeforeSave { .. } => NotificationCode::FileBeforeSave,
            Self::BufferActivated { .. } => NotificationCode::BufferActivated,
            Self::LanguageChanged { .. } => NotificationCode::LanguageChanged,
            Self::DocumentModified => NotificationCode::DocumentModified,
            Self::SelectionChanged => NotificationCode::SelectionChanged,
            Self::Engine { .. } => NotificationCode::EngineNotify,
        }
    }

    pub fn is_cancellable(&self) -> bool {
        self.code().is_cancellable()
    }

    /// Payload bytes as sent over the ABI.
    ///
    /// Paths and language names are NUL-terminated UTF-8; engine payloads are
    /// passed as-is.
    pub fn payload(&self) -> Option<Vec<u8>> {
        match self {
            Self::FileOpened { path }
            | Self::FileClosed { path }
            | Self::FileSaved { path }
            | Self::FileBeforeSave { path }
            | Self::BufferActivated { path: Some(path) } => Some(nul_terminated(
                &path.to_string_lossy(),
            )),
            Self::LanguageChanged { language } => Some(nul_terminated(language)),
            Self::Engine { payload } => Some(payload.clone()),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::FileOpened { path }
            | Self::FileClosed { path }
            | Self::FileSaved { path }
            | Self::FileBeforeSave { path }
            | Self::BufferActivated { path: Some(path) } => Some(path),
            _ => None,
        }
    }
}

fn nul_terminated(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend(text.bytes().filter(|b| *b != 0));
    bytes.push(0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_payload_is_nul_terminated() {
        let event = EditorEvent::FileSaved {
            path: PathBuf::from("/tmp/notes.md"),
        };
        assert_eq!(event.payload().unwrap(), b"/tmp/notes.md\0");
        assert_eq!(event.code(), NotificationCode::FileSaved);
        assert_eq!(event.path(), Some(Path::new("/tmp/notes.md")));
    }

    #[test]
    fn test_language_payload() {
        let event = EditorEvent::LanguageChanged {
            language: "rust".into(),
        };
        assert_eq!(event.payload().unwrap(), b"rust\0");
    }

    #[test]
    fn test_engine_payload_is_raw() {
        let event = EditorEvent::Engine {
            payload: vec![1, 0, 2],
        };
        assert_eq!(event.payload().unwrap(), vec![1, 0, 2]);
        assert_eq!(event.code().as_raw(), 11);
    }

    #[test]
    fn test_events_without_payload() {
        assert!(EditorEvent::Ready.payload().is_none());
        assert!(EditorEvent::BufferActivated { path: None }.payload().is_none());
        assert!(EditorEvent::SelectionChanged.path().is_none());
    }

    #[test]
    fn test_only_before_save_is_cancellable() {
        assert!(
            EditorEvent::FileBeforeSave {
                path: PathBuf::from("a")
            }
            .is_cancellable()
        );
        assert!(
            !EditorEvent::FileSaved {
                path: PathBuf::from("a")
            }
            .is_cancellable()
        );
        assert!(!EditorEvent::Shutdown.is_cancellable());
    }

    #[test]
    fn test_interior_nul_is_stripped() {
        assert_eq!(nul_terminated("a\0b"), b"ab\0");
    }
}
