//! Retry bookkeeping for failed operations.
//!
//! The plugin never re-runs anything itself. On `on-error` it writes the next
//! attempt number and the delay to wait into the context; the host decides
//! whether to act on them.

use crate::plugins::{HookContext, HookHandler, HookPatch, HookResult, HookTable, HookType, Plugin};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt + 1`: initial * multiplier^attempt,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(0.0).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }
}

pub struct RetryPlugin {
    config: Arc<RetryConfig>,
}

impl RetryPlugin {
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct OnError(Arc<RetryConfig>);

#[async_trait]
impl HookHandler for OnError {
    async fn call(&self, ctx: &HookContext) -> HookResult {
        let attempt = ctx
            .get("retry_attempt")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .min(u32::MAX as u64) as u32;

        if attempt >= self.0.max_attempts {
            warn!(
                request_id = %ctx.request_id,
                max_attempts = self.0.max_attempts,
                "retry attempts exhausted"
            );
            return Ok(Some(HookPatch::new().set("retry_exhausted", true)));
        }

        let delay = self.0.delay_for(attempt);
        info!(
            request_id = %ctx.request_id,
            attempt = attempt + 1,
            max_attempts = self.0.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );
        Ok(Some(
            HookPatch::new()
                .set("retry_attempt", attempt + 1)
                .set("retry_delay_ms", delay.as_millis() as u64),
        ))
    }
}

#[async_trait]
impl Plugin for RetryPlugin {
    fn name(&self) -> &str {
        "retry"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> Option<&str> {
        Some("Annotates failed operations with retry attempt and backoff delay")
    }

    fn hooks(&self) -> HookTable {
        HookTable::new().on(HookType::OnError, OnError(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backoff_is_capped() {
        let cfg = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(cfg.delay_for(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(500));
        assert_eq!(cfg.delay_for(200), Duration::from_millis(500));
        assert_eq!(cfg.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_attempts_until_exhausted() {
        let plugin = RetryPlugin::with_config(RetryConfig::new().with_max_attempts(2));
        let hooks = plugin.hooks();
        let handler = hooks.get("on-error").unwrap();
        let mut ctx = HookContext::with_request_id("r");

        let patch = handler.call(&ctx).await.unwrap().unwrap();
        assert_eq!(patch.fields["retry_attempt"], json!(1));
        assert_eq!(patch.fields["retry_delay_ms"], json!(1000));
        ctx.merge(patch);

        let patch = handler.call(&ctx).await.unwrap().unwrap();
        assert_eq!(patch.fields["retry_attempt"], json!(2));
        assert_eq!(patch.fields["retry_delay_ms"], json!(2000));
        ctx.merge(patch);

        let patch = handler.call(&ctx).await.unwrap().unwrap();
        assert_eq!(patch.fields["retry_exhausted"], json!(true));
        assert!(!patch.fields.contains_key("retry_attempt"));
    }
}
