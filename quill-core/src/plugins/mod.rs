//! Plugin system for quill
//!
//! This module provides the infrastructure for loading and managing native
//! plugins:
//!
//! - [`PluginHost`]: discovers, verifies, loads, unloads and reloads plugins
//! - [`SignatureVerifier`]: checks a binary before it is opened
//! - [`Loader`]: opens a binary and resolves its entry points
//! - [`PluginDescriptor`]: the host's record of one plugin and its state
//! - [`NotificationDispatcher`]: delivers [`EditorEvent`]s to plugins
//! - [`MenuBridge`]: the plugin commands shown in the editor menu
//! - [`PluginRegistry`]: remembers which plugins are disabled
//!
//! # Plugin Discovery
//!
//! Plugins are native libraries in `~/.config/quill/plugins/`. Each binary
//! needs a detached signature (`hello.so.sig`) from a signer listed in
//! `~/.config/quill/trusted_signers.toml`, unless verification is turned off.
//!
//! # Example
//!
//! ```ignore
//! use quill_core::plugins::{EditorEvent, PluginHost, PluginHostConfig};
//!
//! let mut host = PluginHost::new(PluginHostConfig::default())?;
//!
//! let report = host.load_all()?;
//! host.broadcast(&EditorEvent::Ready);
//!
//! let outcome = host.broadcast_cancellable(&EditorEvent::FileBeforeSave { path }).outcome;
//! if outcome.is_cancelled() {
//!     // skip the save
//! }
//!
//! host.shutdown();
//! ```

mod descriptor;
mod dispatch;
mod error;
mod events;
mod host;
mod loader;
mod menu;
mod registry;
mod verifier;

pub use descriptor::{
    MenuCommand, PluginDescriptor, PluginInfo, PluginState, PluginSummary, Shortcut,
};
pub use dispatch::{DispatchFault, DispatchOutcome, DispatchReport, NotificationDispatcher};
pub use error::{ErrorKind, LastError, PluginHostError};
pub use events::EditorEvent;
pub use host::{CandidateFailure, LoadReport, PluginHost, PluginHostConfig, PluginSet};
pub use loader::{DylibOpener, LoadedModule, Loader, ModuleOpener, PluginModule};
pub use menu::{MenuBridge, MenuEntry, MenuSection};
pub use registry::PluginRegistry;
pub use verifier::{
    DetachedSignatureVerifier, SignatureFile, SignaturePolicy, SignatureVerifier, TrustStore,
    TrustedSigner, encode_public_key, fingerprint, sign_binary, signature_path,
};
