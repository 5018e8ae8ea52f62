//! MenuBridge - exposes plugin commands to the host's menu

use serde::Serialize;

use super::error::PluginHostError;
use super::host::PluginSet;

/// One command as the menu shows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub index: usize,
    pub label: String,
    /// Rendered shortcut, e.g. `Cmd+Shift+H`
    pub shortcut: Option<String>,
    pub separator: bool,
}

/// Commands of one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuSection {
    pub plugin: String,
    pub entries: Vec<MenuEntry>,
    /// Whether the plugin can show a settings UI
    pub has_settings: bool,
}

/// Read-only view of plugin menu commands, in registration order
#[derive(Debug, Default)]
pub struct MenuBridge {
    order: Vec<String>,
}

impl MenuBridge {
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

    /// Current menu for all initialized plugins
    pub fn sections(&self, plugins: &PluginSet) -> Vec<MenuSection> {
        self.order
            .iter()
            .filter_map(|name| plugins.get(name))
            .filter(|d| d.is_initialized())
            .map(|d| MenuSection {
                plugin: d.name().to_string(),
                entries: d
                    .commands()
                    .iter()
                    .enumerate()
                    .map(|(index, c)| MenuEntry {
                        index,
                        label: c.label.clone(),
                        shortcut: c.shortcut.map(|s| s.to_string()),
                        separator: c.separator,
                    })
                    .collect(),
                has_settings: d.has_settings(),
            })
            .collect()
    }

    /// Run command `index` of `plugin`
    pub fn invoke(
        &self,
        plugins: &PluginSet,
        plugin: &str,
        index: usize,
    ) -> Result<(), PluginHostError> {
        let descriptor = self
            .order
            .iter()
            .any(|n| n == plugin)
            .then(|| plugins.get(plugin))
            .flatten()
            .filter(|d| d.is_initialized())
            .ok_or_else(|| PluginHostError::NotFound {
                name: plugin.to_string(),
            })?;

        let (command, entry) = descriptor
            .commands()
            .get(index)
            .zip(descriptor.entry())
            .ok_or_else(|| PluginHostError::NotFound {
                name: format!("{plugin} command #{index}"),
            })?;

        tracing::debug!(plugin = %plugin, command = %command.label, "Invoking plugin command");
        entry.invoke(plugin, command.callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_plugin_is_not_found() {
        let mut bridge = MenuBridge::new();
        bridge.register("hello");
        let err = bridge.invoke(&PluginSet::default(), "hello", 0).unwrap_err();
        assert!(matches!(err, PluginHostError::NotFound { .. }));

        let err = bridge.invoke(&PluginSet::default(), "other", 0).unwrap_err();
        assert!(matches!(err, PluginHostError::NotFound { .. }));
    }

    #[test]
    fn test_sections_empty_without_plugins() {
        let mut bridge = MenuBridge::new();
        bridge.register("hello");
        assert!(bridge.sections(&PluginSet::default()).is_empty());
        bridge.deregister("hello");
        assert!(bridge.order.is_empty());
    }
}
