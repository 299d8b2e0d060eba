use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::traits::Plugin;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plugin not found: {0}")]
    NotFound(String),
    #[error("no plugin can handle url: {0}")]
    NoPluginForUrl(String),
}

/// Registry mapping plugin names to plugin instances
#[derive(Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Register a plugin under its own name, replacing any previous one
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            tracing::warn!(plugin = %name, "Replacing previously registered plugin");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Plugin>, RegistryError> {
        self.plugins
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// First plugin (by name) that accepts `url`
    pub fn find_for_url(&self, url: &str) -> Result<Arc<dyn Plugin>, RegistryError> {
        self.plugins
            .values()
            .find(|plugin| plugin.can_handle(url))
            .cloned()
            .ok_or_else(|| RegistryError::NoPluginForUrl(url.to_string()))
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.values()
    }

    /// Create registry with built-in plugins
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::direct::DirectPlugin::new()));
        registry
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
