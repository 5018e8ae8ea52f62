//! quill-core: native plugin host for the quill editor
//!
//! Plugins are dynamic libraries implementing the C ABI defined in
//! [`quill_plugin_api`]. This crate finds them, checks their code signature,
//! loads them, drives their lifecycle and forwards editor events to them.
//!
//! # Architecture
//!
//! ```text
//!                 PluginHost
//!   discover -> verify -> load -> init -> Initialized
//!                  |         |              |
//!       SignatureVerifier  Loader    NotificationDispatcher
//!                                        MenuBridge
//! ```
//!
//! Everything runs on one thread; [`plugins::PluginHost`] is not `Send`.

pub mod plugins;

pub use plugins::{
    EditorEvent, PluginDescriptor, PluginHost, PluginHostConfig, PluginHostError, PluginState,
};
