//! Request logging through `tracing`.

use super::succeeded;
use crate::plugins::context::now_millis;
use crate::plugins::{HookContext, HookHandler, HookPatch, HookResult, HookTable, HookType, Plugin};
use crate::runtime::ExtensionRuntime;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

struct LoggingState {
    enabled: AtomicBool,
    include_data: AtomicBool,
    request_count: AtomicU64,
}

/// Logs request start, completion and errors.
///
/// Reads `enabled` and `include_data` (both bool) from its registration
/// config on initialize. Counting and context stamping happen even when
/// output is disabled.
pub struct LoggingPlugin {
    state: Arc<LoggingState>,
}

impl LoggingPlugin {
    pub fn new() -> Self {
        Self {
            state: Arc::new(LoggingState {
                enabled: AtomicBool::new(true),
                include_data: AtomicBool::new(false),
                request_count: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_include_data(self, include: bool) -> Self {
        self.state.include_data.store(include, Ordering::Relaxed);
        self
    }

    pub fn request_count(&self) -> u64 {
        self.state.request_count.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Relaxed)
    }
}

impl Default for LoggingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct BeforeRequest(Arc<LoggingState>);

#[async_trait]
impl HookHandler for BeforeRequest {
    async fn call(&self, ctx: &HookContext) -> HookResult {
        let count = self.0.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.0.enabled.load(Ordering::Relaxed) {
            info!(request_id = %ctx.request_id, request_count = count, "request started");
            if self.0.include_data.load(Ordering::Relaxed) {
                debug!(request_id = %ctx.request_id, request = ?ctx.get("request"), "request payload");
            }
        }
        Ok(Some(
            HookPatch::new()
                .set("start_time_ms", now_millis())
                .set("request_count", count),
        ))
    }
}

struct AfterResponse(Arc<LoggingState>);

#[async_trait]
impl HookHandler for AfterResponse {
    async fn call(&self, ctx: &HookContext) -> HookResult {
        let duration_ms = ctx
            .get("start_time_ms")
            .and_then(Value::as_u64)
            .map(|start| now_millis().saturating_sub(start));

        if self.0.enabled.load(Ordering::Relaxed) {
            let status = if succeeded(ctx.get("success")) { "success" } else { "failed" };
            let request_count = ctx.get("request_count").and_then(Value::as_u64).unwrap_or(0);
            info!(
                request_id = %ctx.request_id,
                request_count,
                status,
                duration_ms = duration_ms.unwrap_or_default(),
                "request finished"
            );
            if self.0.include_data.load(Ordering::Relaxed) {
                debug!(request_id = %ctx.request_id, response = ?ctx.get("response"), "response payload");
            }
        }
        Ok(duration_ms.map(|d| HookPatch::new().set("duration_ms", d)))
    }
}

struct OnError(Arc<LoggingState>);

#[async_trait]
impl HookHandler for OnError {
    async fn call(&self, ctx: &HookContext) -> HookResult {
        if self.0.enabled.load(Ordering::Relaxed) {
            let message = match ctx.get("error") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "unknown error".to_string(),
            };
            error!(request_id = %ctx.request_id, error = %message, "request error");
        }
        Ok(None)
    }
}

#[async_trait]
impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> Option<&str> {
        Some("Logs requests and responses for debugging and monitoring")
    }

    fn hooks(&self) -> HookTable {
        HookTable::new()
            .on(HookType::BeforeRequest, BeforeRequest(self.state.clone()))
            .on(HookType::AfterResponse, AfterResponse(self.state.clone()))
            .on(HookType::OnError, OnError(self.state.clone()))
    }

    async fn initialize(&self, runtime: &ExtensionRuntime) -> Result<()> {
        if let Some(config) = runtime.plugin_config(self.name()) {
            if let Some(enabled) = config.get("enabled").and_then(Value::as_bool) {
                self.state.enabled.store(enabled, Ordering::Relaxed);
            }
            if let Some(include) = config.get("include_data").and_then(Value::as_bool) {
                self.state.include_data.store(include, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
