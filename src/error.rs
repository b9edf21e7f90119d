use std::fmt;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "options.priority", "context.request")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "hook_dispatcher", "runtime_config")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Plugin lifecycle phase in which a [`Error::Lifecycle`] failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Initialize,
    Cleanup,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Initialize => f.write_str("initialize"),
            LifecyclePhase::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// Unified error type for the extension runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Plugin '{name}' is already registered")]
    DuplicateRegistration { name: String },

    #[error("Plugin '{name}' is not registered")]
    NotFound { name: String },

    #[error("Hook '{hook}' failed in plugin '{plugin}': {source}")]
    HookHandler {
        plugin: String,
        hook: String,
        source: Box<Error>,
    },

    #[error("Middleware error: {message}{}", format_context(.context))]
    Middleware {
        message: String,
        context: ErrorContext,
    },

    #[error("Plugin '{plugin}' {phase} failed: {source}")]
    Lifecycle {
        plugin: String,
        phase: LifecyclePhase,
        source: Box<Error>,
    },

    #[error("Plugin error: {message}{}", format_context(.context))]
    Plugin {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// Non-empty context parts, rendered as a trailing parenthetical.
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a plugin error without extra context.
    pub fn plugin(msg: impl Into<String>) -> Self {
        Error::Plugin {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a middleware error without extra context.
    pub fn middleware(msg: impl Into<String>) -> Self {
        Error::Middleware {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new middleware error with structured context
    pub fn middleware_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Middleware {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub(crate) fn hook_handler(plugin: &str, hook: &str, source: Error) -> Self {
        Error::HookHandler {
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn lifecycle(plugin: &str, phase: LifecyclePhase, source: Error) -> Self {
        Error::Lifecycle {
            plugin: plugin.to_string(),
            phase,
            source: Box::new(source),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Middleware { context, .. }
            | Error::Plugin { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Name of the plugin this error is attributed to, if any.
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            Error::DuplicateRegistration { name } | Error::NotFound { name } => Some(name),
            Error::HookHandler { plugin, .. } | Error::Lifecycle { plugin, .. } => Some(plugin),
            _ => None,
        }
    }
}
