//! Plugin, hook and middleware system.

mod base;
pub(crate) mod context;
mod hooks;
mod middleware;
mod registry;

pub use base::{FnHook, HookHandler, HookResult, HookTable, Plugin, PluginDescriptor};
pub use context::{HookContext, HookPatch, HookType};
pub use hooks::{HookDispatcher, HookReport};
pub use middleware::{FnMiddleware, Middleware, MiddlewarePipeline, Next, NextFn};
pub use registry::{PluginInfo, PluginRegistry};
