//! Base plugin types.

use super::context::{HookContext, HookPatch};
use crate::runtime::ExtensionRuntime;
use crate::Result;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a hook handler hands back: an optional partial context to merge.
pub type HookResult = Result<Option<HookPatch>>;

#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn call(&self, ctx: &HookContext) -> HookResult;
}

/// Adapts an async closure into a [`HookHandler`]. The closure gets its own
/// copy of the context.
pub struct FnHook<F> {
    func: F,
}

impl<F> FnHook<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> HookHandler for FnHook<F>
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    async fn call(&self, ctx: &HookContext) -> HookResult {
        (self.func)(ctx.clone()).await
    }
}

/// Hook name to handler mapping a plugin exposes.
#[derive(Clone, Default)]
pub struct HookTable {
    handlers: HashMap<String, Arc<dyn HookHandler>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<H: HookHandler + 'static>(mut self, hook: impl AsRef<str>, handler: H) -> Self {
        self.insert(hook, Arc::new(handler));
        self
    }

    pub fn on_fn<F, Fut>(self, hook: impl AsRef<str>, func: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.on(hook, FnHook::new(func))
    }

    /// One handler per hook name; a later insert replaces the earlier one.
    pub fn insert(&mut self, hook: impl AsRef<str>, handler: Arc<dyn HookHandler>) {
        self.handlers.insert(hook.as_ref().to_string(), handler);
    }

    pub fn get(&self, hook: &str) -> Option<&Arc<dyn HookHandler>> {
        self.handlers.get(hook)
    }

    pub fn contains(&self, hook: &str) -> bool {
        self.handlers.contains_key(hook)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookTable")
            .field("hooks", &self.names())
            .finish()
    }
}

/// An extension module. Everything except identity is optional.
///
/// `hooks` is read once at registration; a plugin that returns an empty table
/// never takes part in hook dispatch.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn hooks(&self) -> HookTable {
        HookTable::new()
    }

    async fn initialize(&self, _runtime: &ExtensionRuntime) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

type LifecycleFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Record-style plugin assembled from optional parts.
///
/// ```rust
/// use extension_runtime::plugins::{HookPatch, PluginDescriptor};
///
/// let plugin = PluginDescriptor::new("tagger", "1.0.0")
///     .with_description("Tags every request")
///     .hook_fn("before-request", |_ctx| async move {
///         Ok(Some(HookPatch::new().set("tagged", true)))
///     });
/// # let _ = plugin;
/// ```
pub struct PluginDescriptor {
    name: String,
    version: String,
    description: Option<String>,
    hooks: HookTable,
    on_initialize: Option<LifecycleFn>,
    on_cleanup: Option<LifecycleFn>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            hooks: HookTable::new(),
            on_initialize: None,
            on_cleanup: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn hook<H: HookHandler + 'static>(mut self, hook: impl AsRef<str>, handler: H) -> Self {
        self.hooks = self.hooks.on(hook, handler);
        self
    }

    pub fn hook_fn<F, Fut>(mut self, hook: impl AsRef<str>, func: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.hooks = self.hooks.on_fn(hook, func);
        self
    }

    pub fn on_initialize<F, Fut>(mut self, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_initialize = Some(Arc::new(move || func().boxed()));
        self
    }

    pub fn on_cleanup<F, Fut>(mut self, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_cleanup = Some(Arc::new(move || func().boxed()));
        self
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("hooks", &self.hooks)
            .field("has_initialize", &self.on_initialize.is_some())
            .field("has_cleanup", &self.on_cleanup.is_some())
            .finish()
    }
}

#[async_trait]
impl Plugin for PluginDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn hooks(&self) -> HookTable {
        self.hooks.clone()
    }

    async fn initialize(&self, _runtime: &ExtensionRuntime) -> Result<()> {
        match &self.on_initialize {
            Some(f) => f().await,
            None => Ok(()),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        match &self.on_cleanup {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}
