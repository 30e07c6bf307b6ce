//! Plugin registry
//!
//! The authoritative map from plugin ID to [`Plugin`]. Entries are added
//! exactly once and never physically removed: `remove` decommissions the
//! plugin, which hides it from lookups but keeps it available to
//! [`Registry::record`] for audit.
//!
//! The lock is held only for the map operation itself, never across I/O or
//! an `.await`.

use crate::plugin::Plugin;
use sdk::descriptor::PluginType;
use sdk::errors::HostError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct Registry {
    plugins: RwLock<HashMap<String, Arc<Plugin>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin
    ///
    /// # Errors
    ///
    /// `HostError::DuplicatePlugin` if the ID is registered, tombstoned or not.
    pub fn add(&self, plugin: Arc<Plugin>) -> Result<(), HostError> {
        let mut plugins = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        if plugins.contains_key(plugin.id()) {
            return Err(HostError::DuplicatePlugin(plugin.id().to_string()));
        }
        tracing::debug!(plugin_id = plugin.id(), "Plugin registered");
        plugins.insert(plugin.id().to_string(), plugin);
        Ok(())
    }

    /// Live plugin by ID
    pub fn plugin(&self, id: &str) -> Option<Arc<Plugin>> {
        self.record(id).filter(|p| !p.is_decommissioned())
    }

    /// Live plugins of the given types (all types when empty), sorted by ID
    pub fn plugins(&self, types: &[PluginType]) -> Vec<Arc<Plugin>> {
        self.records()
            .into_iter()
            .filter(|p| !p.is_decommissioned())
            .filter(|p| types.is_empty() || types.contains(&p.plugin_type()))
            .collect()
    }

    /// Decommission a plugin
    ///
    /// # Errors
    ///
    /// `HostError::PluginNotRegistered` if the ID was never registered.
    pub fn remove(&self, id: &str) -> Result<(), HostError> {
        let plugin = self
            .record(id)
            .ok_or_else(|| HostError::PluginNotRegistered(id.to_string()))?;
        if plugin.decommission() {
            tracing::info!(plugin_id = id, "Plugin decommissioned");
        }
        Ok(())
    }

    /// Plugin by ID, including decommissioned ones
    pub fn record(&self, id: &str) -> Option<Arc<Plugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Every registered plugin, including decommissioned ones, sorted by ID
    pub fn records(&self) -> Vec<Arc<Plugin>> {
        let mut all: Vec<Arc<Plugin>> = self
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Whether the ID was ever registered
    pub fn contains(&self, id: &str) -> bool {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of live plugins
    pub fn len(&self) -> usize {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| !p.is_decommissioned())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
