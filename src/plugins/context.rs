//! Hook context and partial-context patches.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Well-known hook names agreed between hosts and plugin authors.
///
/// Hook names are free-form strings; these are just the conventional ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    BeforeRequest,
    AfterResponse,
    OnError,
    OnConnect,
    OnDisconnect,
    OnStartup,
    OnShutdown,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::BeforeRequest => "before-request",
            HookType::AfterResponse => "after-response",
            HookType::OnError => "on-error",
            HookType::OnConnect => "on-connect",
            HookType::OnDisconnect => "on-disconnect",
            HookType::OnStartup => "on-startup",
            HookType::OnShutdown => "on-shutdown",
        }
    }
}

impl AsRef<str> for HookType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Context threaded through hook handlers and middleware.
///
/// `request_id` correlates one logical operation across hooks. Any other data
/// lives in `fields`, which serializes flattened next to the fixed keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookContext {
    pub request_id: String,
    /// Unix time in milliseconds.
    pub timestamp: u64,
    #[serde(default)]
    pub halt: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Default for HookContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HookContext {
    /// Fresh context with a random request id and the current time.
    pub fn new() -> Self {
        Self::with_request_id(Uuid::new_v4().to_string())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: now_millis(),
            halt: false,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn should_halt(&self) -> bool {
        self.halt
    }

    /// Shallow merge: every value present in `patch` overwrites the current one.
    pub fn merge(&mut self, patch: HookPatch) {
        if let Some(id) = patch.request_id {
            self.request_id = id;
        }
        if let Some(ts) = patch.timestamp {
            self.timestamp = ts;
        }
        if let Some(halt) = patch.halt {
            self.halt = halt;
        }
        for (k, v) in patch.fields {
            self.fields.insert(k, v);
        }
    }
}

/// Partial context returned by a hook handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<bool>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl HookPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch carrying only `halt: true`.
    pub fn halting() -> Self {
        Self::new().halt()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn halt(mut self) -> Self {
        self.halt = Some(true);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.request_id.is_none()
            && self.timestamp.is_none()
            && self.halt.is_none()
            && self.fields.is_empty()
    }
}
