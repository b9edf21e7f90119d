//! # extension-runtime
//!
//! Plugin registry, priority-ordered hook dispatcher and onion-style middleware
//! pipeline that let independently written modules observe and intercept the
//! calls a host library makes, without the host knowing their concrete types.
//!
//! ## Overview
//!
//! A host constructs one [`ExtensionRuntime`], registers plugins and ad-hoc
//! middleware, calls [`ExtensionRuntime::initialize`] once, and then at each
//! extension point either runs a named hook or wraps an operation in the
//! middleware chain:
//!
//! - **Hooks** run sequentially in ascending priority. Each handler sees the
//!   context as merged so far and may return a partial context; `halt: true`
//!   stops the chain. A failing handler is logged and skipped.
//! - **Middleware** is composed into a single continuation around a terminal
//!   operation. The lowest priority value is the outermost layer. Errors
//!   propagate to the caller; not calling `next` short-circuits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use extension_runtime::{ExtensionRuntime, HookContext, HookPatch, PluginDescriptor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> extension_runtime::Result<()> {
//!     let runtime = ExtensionRuntime::new();
//!
//!     let tagger = PluginDescriptor::new("tagger", "1.0.0").hook_fn(
//!         "before-request",
//!         |_ctx| async move { Ok(Some(HookPatch::new().set("tagged", true))) },
//!     );
//!     runtime.register_plugin(Arc::new(tagger)).await?;
//!     runtime.initialize().await?;
//!
//!     let ctx = runtime
//!         .execute_hooks("before-request", HookContext::new())
//!         .await;
//!     assert_eq!(ctx.get("tagged"), Some(&serde_json::json!(true)));
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`plugins`] | Plugin trait, registry, hook dispatcher, middleware pipeline |
//! | [`runtime`] | The [`ExtensionRuntime`] façade and its lifecycle |
//! | [`config`] | Runtime and per-plugin configuration |
//! | `builtin` | Logging, metrics, retry and caching plugins (feature `builtin`) |

pub mod config;
pub mod plugins;
pub mod runtime;

#[cfg(feature = "builtin")]
pub mod builtin;

pub use config::{PluginConfig, PluginOptions, PluginPriority, RuntimeConfig};
pub use plugins::{
    HookContext, HookHandler, HookPatch, HookReport, HookResult, HookTable, HookType, Middleware,
    MiddlewarePipeline, Next, Plugin, PluginDescriptor, PluginInfo,
};
pub use runtime::{ExtensionRuntime, LifecycleState};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, LifecyclePhase};
