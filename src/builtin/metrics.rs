//! Request counters and response timing.

use super::succeeded;
use crate::plugins::context::now_millis;
use crate::plugins::{HookContext, HookHandler, HookPatch, HookResult, HookTable, HookType, Plugin};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

struct MetricsState {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    errors: AtomicU64,
    // sum over completed requests that carried a start stamp
    total_duration_ms: AtomicU64,
    timed_requests: AtomicU64,
    started: Mutex<Instant>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub errors: u64,
    pub average_response_ms: f64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        let completed = self.successful_requests + self.failed_requests;
        if completed == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / completed as f64
    }
}

pub struct MetricsPlugin {
    state: Arc<MetricsState>,
}

impl MetricsPlugin {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MetricsState {
                total_requests: AtomicU64::new(0),
                successful_requests: AtomicU64::new(0),
                failed_requests: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                total_duration_ms: AtomicU64::new(0),
                timed_requests: AtomicU64::new(0),
                started: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let s = &self.state;
        let timed = s.timed_requests.load(Ordering::Relaxed);
        let average_response_ms = if timed == 0 {
            0.0
        } else {
            s.total_duration_ms.load(Ordering::Relaxed) as f64 / timed as f64
        };
        MetricsSnapshot {
            total_requests: s.total_requests.load(Ordering::Relaxed),
            successful_requests: s.successful_requests.load(Ordering::Relaxed),
            failed_requests: s.failed_requests.load(Ordering::Relaxed),
            errors: s.errors.load(Ordering::Relaxed),
            average_response_ms,
            uptime: s
                .started
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed(),
        }
    }

    /// Zero every counter and restart the uptime clock.
    pub fn reset(&self) {
        let s = &self.state;
        for counter in [
            &s.total_requests,
            &s.successful_requests,
            &s.failed_requests,
            &s.errors,
            &s.total_duration_ms,
            &s.timed_requests,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *s.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

impl Default for MetricsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct BeforeRequest(Arc<MetricsState>);

#[async_trait]
impl HookHandler for BeforeRequest {
    async fn call(&self, _ctx: &HookContext) -> HookResult {
        self.0.total_requests.fetch_add(1, Ordering::Relaxed);
        Ok(Some(HookPatch::new().set("metrics_start_ms", now_millis())))
    }
}

struct AfterResponse(Arc<MetricsState>);

#[async_trait]
impl HookHandler for AfterResponse {
    async fn call(&self, ctx: &HookContext) -> HookResult {
        if succeeded(ctx.get("success")) {
            self.0.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.0.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(start) = ctx.get("metrics_start_ms").and_then(Value::as_u64) {
            let elapsed = now_millis().saturating_sub(start);
            self.0.total_duration_ms.fetch_add(elapsed, Ordering::Relaxed);
            self.0.timed_requests.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None)
    }
}

struct OnError(Arc<MetricsState>);

#[async_trait]
impl HookHandler for OnError {
    async fn call(&self, _ctx: &HookContext) -> HookResult {
        self.0.errors.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }
}

#[async_trait]
impl Plugin for MetricsPlugin {
    fn name(&self) -> &str {
        "metrics"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> Option<&str> {
        Some("Collects request counts and response times")
    }

    fn hooks(&self) -> HookTable {
        HookTable::new()
            .on(HookType::BeforeRequest, BeforeRequest(self.state.clone()))
            .on(HookType::AfterResponse, AfterResponse(self.state.clone()))
            .on(HookType::OnError, OnError(self.state.clone()))
    }
}
