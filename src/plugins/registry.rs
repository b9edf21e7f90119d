//! Plugin registry.
//!
//! Registrations are kept in a `Vec` sorted by priority. A new entry goes
//! after every entry of equal or lower priority, so ties keep registration
//! order.
//! The lock is only held for the duration of a single read or mutation.

use super::base::{HookHandler, HookTable, Plugin};
use crate::config::PluginConfig;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Registration {
    name: String,
    plugin: Arc<dyn Plugin>,
    hooks: HookTable,
    enabled: bool,
    priority: i32,
    config: PluginConfig,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<Registration>,
}

impl RegistryState {
    fn find(&self, name: &str) -> Option<&Registration> {
        self.entries.iter().find(|r| r.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Registration> {
        self.entries.iter_mut().find(|r| r.name == name)
    }
}

/// Read-only view of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub priority: i32,
    pub hooks: Vec<String>,
}

/// A handler selected for one dispatch, tagged with its owner.
#[derive(Clone)]
pub(crate) struct HookBinding {
    pub plugin: String,
    pub priority: i32,
    pub handler: Arc<dyn HookHandler>,
}

pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a registration. Fails without touching state if the name is taken.
    pub fn insert(
        &self,
        plugin: Arc<dyn Plugin>,
        enabled: bool,
        priority: i32,
        config: PluginConfig,
    ) -> Result<()> {
        let name = plugin.name().to_string();
        let hooks = plugin.hooks();
        let mut st = self.write();
        if st.find(&name).is_some() {
            return Err(Error::DuplicateRegistration { name });
        }
        let pos = st.entries.partition_point(|r| r.priority <= priority);
        st.entries.insert(
            pos,
            Registration {
                name,
                plugin,
                hooks,
                enabled,
                priority,
                config,
            },
        );
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Arc<dyn Plugin>> {
        let mut st = self.write();
        let idx = st
            .entries
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })?;
        Ok(st.entries.remove(idx).plugin)
    }

    /// Flip the enabled flag. Returns the plugin only when the flag changed.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<Option<Arc<dyn Plugin>>> {
        let mut st = self.write();
        let reg = st.find_mut(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        if reg.enabled == enabled {
            return Ok(None);
        }
        reg.enabled = enabled;
        Ok(Some(reg.plugin.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().find(name).is_some()
    }

    /// False for unknown plugins.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.read().find(name).map(|r| r.enabled).unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.read().find(name).map(|r| r.plugin.clone())
    }

    pub fn config(&self, name: &str) -> Option<PluginConfig> {
        self.read().find(name).map(|r| r.config.clone())
    }

    pub fn priority(&self, name: &str) -> Option<i32> {
        self.read().find(name).map(|r| r.priority)
    }

    /// All registrations in execution order.
    pub fn infos(&self) -> Vec<PluginInfo> {
        self.read()
            .entries
            .iter()
            .map(|r| PluginInfo {
                name: r.name.clone(),
                version: r.plugin.version().to_string(),
                description: r.plugin.description().map(str::to_string),
                enabled: r.enabled,
                priority: r.priority,
                hooks: r.hooks.names().into_iter().map(str::to_string).collect(),
            })
            .collect()
    }

    /// Snapshot of enabled handlers for `hook`, already in execution order.
    pub(crate) fn bindings(&self, hook: &str) -> Vec<HookBinding> {
        self.read()
            .entries
            .iter()
            .filter(|r| r.enabled)
            .filter_map(|r| {
                r.hooks.get(hook).map(|h| HookBinding {
                    plugin: r.name.clone(),
                    priority: r.priority,
                    handler: h.clone(),
                })
            })
            .collect()
    }

    pub fn enabled_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.read()
            .entries
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.plugin.clone())
            .collect()
    }

    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.read().entries.iter().map(|r| r.plugin.clone()).collect()
    }

    /// Remove every registration, returning the plugins in execution order.
    pub fn drain(&self) -> Vec<Arc<dyn Plugin>> {
        let entries = std::mem::take(&mut self.write().entries);
        entries.into_iter().map(|r| r.plugin).collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    #[cfg(test)]
    fn order(&self) -> Vec<(String, i32)> {
        self.read()
            .entries
            .iter()
            .map(|r| (r.name.clone(), r.priority))
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
