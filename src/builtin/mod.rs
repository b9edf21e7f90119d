//! Built-in plugins (requires the `builtin` feature).
//!
//! | Plugin | Name | Hooks |
//! |--------|------|-------|
//! | [`LoggingPlugin`] | `logging` | `before-request`, `after-response`, `on-error` |
//! | [`MetricsPlugin`] | `metrics` | `before-request`, `after-response`, `on-error` |
//! | [`RetryPlugin`] | `retry` | `on-error` |
//! | [`CachingPlugin`] | `caching` | `before-request`, `after-response` |
//!
//! They agree on a few context fields set by the host: `request` (the payload
//! being sent), `response` (what came back), `success` (bool, defaults to true)
//! and `error` (a description of the failure).

mod caching;
mod logging;
mod metrics;
mod retry;

pub use caching::{CacheStats, CachingConfig, CachingPlugin};
pub use logging::LoggingPlugin;
pub use metrics::{MetricsPlugin, MetricsSnapshot};
pub use retry::{RetryConfig, RetryPlugin};

use crate::config::PluginOptions;
use crate::runtime::ExtensionRuntime;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;

/// Register the default plugin set: logging at priority 1, metrics at 5.
pub async fn register_defaults(
    runtime: &ExtensionRuntime,
) -> Result<(Arc<LoggingPlugin>, Arc<MetricsPlugin>)> {
    let logging = Arc::new(LoggingPlugin::new());
    let metrics = Arc::new(MetricsPlugin::new());
    runtime
        .register_plugin_with(
            logging.clone(),
            PluginOptions::new().priority(1).config_value("enabled", true),
        )
        .await?;
    runtime
        .register_plugin_with(metrics.clone(), PluginOptions::new().priority(5))
        .await?;
    Ok((logging, metrics))
}

pub(crate) fn succeeded(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(true)
}
