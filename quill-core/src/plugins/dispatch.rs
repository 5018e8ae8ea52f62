//! NotificationDispatcher - fans editor events out to initialized plugins

use std::cell::Cell;
use std::ffi::c_void;

use quill_plugin_api::NotificationData;

use super::descriptor::PluginDescriptor;
use super::error::PluginHostError;
use super::events::EditorEvent;
use super::host::PluginSet;

/// Result of a cancellable delivery
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DispatchOutcome {
    #[default]
    Proceed,
    /// A plugin vetoed the operation
    Cancelled { by: String },
}

impl DispatchOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A plugin callback that panicked during delivery
#[derive(Debug)]
pub struct DispatchFault {
    pub plugin: String,
    pub error: PluginHostError,
}

/// What happened during one dispatch
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Plugins whose callback was invoked
    pub delivered: usize,
    pub faults: Vec<DispatchFault>,
    pub outcome: DispatchOutcome,
}

/// Delivers events in plugin registration order.
///
/// Holds only names; descriptors are borrowed from the host for each
/// dispatch. Dispatching from inside a plugin callback is refused.
#[derive(Debug, Default)]
pub struct NotificationDispatcher {
    order: Vec<String>,
    dispatching: Cell<bool>,
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) {
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
    }

    pub fn deregister(&mut self, name: &str) {
        self.order.retain(|n| n != name);
    }

    /// Registered plugin names in delivery order
    pub fn registered(&self) -> &[String] {
        &self.order
    }

    /// Deliver `event` to every initialized plugin
    pub fn broadcast(&self, plugins: &PluginSet, event: &EditorEvent) -> DispatchReport {
        self.dispatch(plugins, event, None, false)
    }

    /// Deliver a vetoable event, stopping at the first plugin that cancels.
    ///
    /// Events that cannot be cancelled are delivered as a plain broadcast.
    pub fn broadcast_cancellable(&self, plugins: &PluginSet, event: &EditorEvent) -> DispatchReport {
        if !event.is_cancellable() {
            tracing::warn!(
                event = %event.code(),
                "Event cannot be cancelled, delivering as a plain broadcast"
            );
            return self.broadcast(plugins, event);
        }
        self.dispatch(plugins, event, None, true)
    }

    /// Deliver `event` to one plugin; nothing happens unless it is initialized
    pub fn send_to(&self, plugins: &PluginSet, name: &str, event: &EditorEvent) -> DispatchReport {
        self.dispatch(plugins, event, Some(name), false)
    }

    fn dispatch(
        &self,
        plugins: &PluginSet,
        event: &EditorEvent,
        target: Option<&str>,
        cancellable: bool,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.dispatching.replace(true) {
            tracing::error!(event = %event.code(), "Reentrant plugin notification refused");
            return report;
        }
        let _guard = DispatchGuard(&self.dispatching);

        let payload = event.payload();
        let targets = self
            .order
            .iter()
            .filter(|name| target.is_none_or(|t| t == name.as_str()))
            .filter_map(|name| plugins.get(name))
            .filter(|d| d.is_initialized());

        for descriptor in targets {
            report.delivered += 1;
            match deliver(descriptor, event, payload.as_deref(), cancellable) {
                Ok(true) => {
                    tracing::info!(
                        plugin = %descriptor.name(),
                        event = %event.code(),
                        "Plugin cancelled operation"
                    );
                    report.outcome = DispatchOutcome::Cancelled {
                        by: descriptor.name().to_string(),
                    };
                    break;
                }
                Ok(false) => {}
                Err(error) => report.faults.push(DispatchFault {
                    plugin: descriptor.name().to_string(),
                    error,
                }),
            }
        }
        report
    }
}

/// Call one plugin's notify callback; returns whether it cancelled
fn deliver(
    descriptor: &PluginDescriptor,
    event: &EditorEvent,
    payload: Option<&[u8]>,
    cancellable: bool,
) -> Result<bool, PluginHostError> {
    let Some(entry) = descriptor.entry() else {
        return Ok(false);
    };

    // Every plugin gets its own copy of the payload and a fresh struct.
    let mut buffer = payload.map(<[u8]>::to_vec);
    let (data, size) = match buffer.as_mut() {
        Some(bytes) => (bytes.as_mut_ptr().cast::<c_void>(), bytes.len()),
        None => (std::ptr::null_mut(), 0),
    };
    let mut notification = NotificationData::new(event.code().as_raw(), data, size, cancellable);

    entry.notify(descriptor.name(), &mut notification)?;
    Ok(cancellable && notification.cancelled)
}
