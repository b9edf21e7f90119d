//! Runtime and per-plugin configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

/// Opaque per-plugin configuration, passed through to plugins untouched.
pub type PluginConfig = serde_json::Map<String, serde_json::Value>;

/// Named priority levels. Lower values execute earlier (more "outer").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginPriority {
    Highest = 0,
    High = 25,
    Normal = 50,
    Low = 75,
    Lowest = 100,
}

impl PluginPriority {
    pub fn value(self) -> i32 {
        self as i32
    }
}

impl Default for PluginPriority {
    fn default() -> Self {
        PluginPriority::Normal
    }
}

impl From<PluginPriority> for i32 {
    fn from(p: PluginPriority) -> Self {
        p.value()
    }
}

/// Registration options for a single plugin.
///
/// Deserializable so hosts can map their own configuration files onto
/// registrations; the runtime itself never reads or persists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOptions {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Falls back to [`RuntimeConfig::default_priority`] when unset.
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub config: PluginConfig,
}

fn default_enabled() -> bool {
    true
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            config: PluginConfig::new(),
        }
    }
}

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn priority(mut self, priority: impl Into<i32>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn config_value(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = config;
        self
    }
}

/// Runtime-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Priority given to plugins registered without an explicit one.
    pub default_priority: i32,
    /// Dispatch `on-startup` / `on-shutdown` around the runtime lifecycle.
    pub emit_lifecycle_hooks: bool,
    /// Run `initialize` for plugins registered after the runtime started.
    pub initialize_late_registrations: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_priority: PluginPriority::Normal.value(),
            emit_lifecycle_hooks: true,
            initialize_late_registrations: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_priority(mut self, priority: impl Into<i32>) -> Self {
        self.default_priority = priority.into();
        self
    }

    pub fn with_lifecycle_hooks(mut self, enable: bool) -> Self {
        self.emit_lifecycle_hooks = enable;
        self
    }

    pub fn with_late_initialization(mut self, enable: bool) -> Self {
        self.initialize_late_registrations = enable;
        self
    }

    /// Build a config from defaults overridden by env:
    /// - `EXTENSION_RUNTIME_DEFAULT_PRIORITY` (default 50)
    /// - `EXTENSION_RUNTIME_LIFECYCLE_HOOKS` (default true)
    /// - `EXTENSION_RUNTIME_LATE_INIT` (default true)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(raw) = lookup("EXTENSION_RUNTIME_DEFAULT_PRIORITY") {
            cfg.default_priority = raw.trim().parse::<i32>().map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid default priority '{}'", raw),
                    ErrorContext::new()
                        .with_field_path("EXTENSION_RUNTIME_DEFAULT_PRIORITY")
                        .with_details(e.to_string())
                        .with_source("runtime_config"),
                )
            })?;
        }
        if let Some(raw) = lookup("EXTENSION_RUNTIME_LIFECYCLE_HOOKS") {
            cfg.emit_lifecycle_hooks = parse_flag("EXTENSION_RUNTIME_LIFECYCLE_HOOKS", &raw)?;
        }
        if let Some(raw) = lookup("EXTENSION_RUNTIME_LATE_INIT") {
            cfg.initialize_late_registrations = parse_flag("EXTENSION_RUNTIME_LATE_INIT", &raw)?;
        }
        Ok(cfg)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::configuration_with_context(
            format!("invalid boolean '{}'", other),
            ErrorContext::new()
                .with_field_path(key)
                .with_source("runtime_config"),
        )),
    }
}
