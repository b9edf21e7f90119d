//! The extension runtime: one registry, one dispatcher and one middleware
//! pipeline behind a single lifecycle.

use crate::config::{PluginConfig, PluginOptions, RuntimeConfig};
use crate::error::LifecyclePhase;
use crate::plugins::{
    HookContext, HookDispatcher, HookReport, HookType, Middleware, MiddlewarePipeline, Next,
    Plugin, PluginInfo, PluginRegistry,
};
use crate::{Error, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
}

/// Host-owned extension runtime.
///
/// There is no global instance; a host may hold several runtimes, each with
/// its own plugins and middleware.
///
/// ```rust,no_run
/// use extension_runtime::{ExtensionRuntime, HookContext, PluginDescriptor};
/// use std::sync::Arc;
///
/// # async fn run() -> extension_runtime::Result<()> {
/// let runtime = ExtensionRuntime::new();
/// runtime
///     .register_plugin(Arc::new(PluginDescriptor::new("audit", "1.0.0")))
///     .await?;
/// runtime.initialize().await?;
///
/// let ctx = runtime
///     .execute_hooks("before-request", HookContext::new())
///     .await;
/// let ctx = runtime.execute_middleware(ctx).await?;
/// # let _ = ctx;
/// runtime.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ExtensionRuntime {
    config: RuntimeConfig,
    registry: Arc<PluginRegistry>,
    dispatcher: HookDispatcher,
    middleware: MiddlewarePipeline,
    state: Mutex<LifecycleState>,
}

impl ExtensionRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        Self {
            config,
            dispatcher: HookDispatcher::new(registry.clone()),
            registry,
            middleware: MiddlewarePipeline::new(),
            state: Mutex::new(LifecycleState::Created),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    // ---- registry ----

    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.register_plugin_with(plugin, PluginOptions::default())
            .await
    }

    /// Register with explicit options.
    ///
    /// When the runtime is already running (and late initialization is on),
    /// an enabled plugin is initialized right away. If that fails the
    /// registration is rolled back and the failure returned.
    pub async fn register_plugin_with(
        &self,
        plugin: Arc<dyn Plugin>,
        options: PluginOptions,
    ) -> Result<()> {
        let name = plugin.name().to_string();
        let priority = options.priority.unwrap_or(self.config.default_priority);
        let enabled = options.enabled;
        // Inserted under the state lock so `initialize` either snapshots this
        // plugin or sees it registered after the runtime started, never both.
        let initialize_now = {
            let st = self.lock_state();
            self.registry
                .insert(plugin.clone(), enabled, priority, options.config)?;
            enabled && self.config.initialize_late_registrations && *st == LifecycleState::Running
        };
        info!(
            plugin = %name,
            version = plugin.version(),
            priority,
            enabled,
            "plugin registered"
        );

        if initialize_now {
            debug!(plugin = %name, "initializing late registration");
            if let Err(e) = plugin.initialize(self).await {
                let _ = self.registry.remove(&name);
                error!(plugin = %name, error = %e, "late initialization failed, registration rolled back");
                return Err(Error::lifecycle(&name, LifecyclePhase::Initialize, e));
            }
        }
        Ok(())
    }

    /// Remove a plugin and run its cleanup. Cleanup failures are only logged.
    pub async fn unregister_plugin(&self, name: &str) -> Result<()> {
        let plugin = self.registry.remove(name)?;
        self.cleanup_plugin(plugin.as_ref()).await;
        info!(plugin = name, "plugin unregistered");
        Ok(())
    }

    /// Re-enable a plugin. `initialize` is not run again.
    pub async fn enable_plugin(&self, name: &str) -> Result<()> {
        if self.registry.set_enabled(name, true)?.is_some() {
            info!(plugin = name, "plugin enabled");
        }
        Ok(())
    }

    /// Disable a plugin and run its cleanup; the registration stays.
    pub async fn disable_plugin(&self, name: &str) -> Result<()> {
        if let Some(plugin) = self.registry.set_enabled(name, false)? {
            self.cleanup_plugin(plugin.as_ref()).await;
            info!(plugin = name, "plugin disabled");
        }
        Ok(())
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.registry.is_enabled(name)
    }

    /// Registered plugins in execution order.
    pub fn get_plugins(&self) -> Vec<PluginInfo> {
        self.registry.infos()
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.get(name)
    }

    pub fn plugin_config(&self, name: &str) -> Option<PluginConfig> {
        self.registry.config(name)
    }

    async fn cleanup_plugin(&self, plugin: &dyn Plugin) {
        if let Err(e) = plugin.cleanup().await {
            let e = Error::lifecycle(plugin.name(), LifecyclePhase::Cleanup, e);
            warn!(plugin = plugin.name(), error = %e, "plugin cleanup failed");
        }
    }

    // ---- hooks ----

    /// Run every enabled handler for `hook`. Never fails; handler errors are
    /// logged and skipped.
    pub async fn execute_hooks(&self, hook: impl AsRef<str>, ctx: HookContext) -> HookContext {
        self.dispatcher.dispatch(hook.as_ref(), ctx).await
    }

    /// Like [`execute_hooks`](Self::execute_hooks), also returning what ran and what failed.
    pub async fn execute_hooks_report(&self, hook: impl AsRef<str>, ctx: HookContext) -> HookReport {
        self.dispatcher.dispatch_report(hook.as_ref(), ctx).await
    }

    // ---- middleware ----

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>, priority: i32) {
        self.middleware.add(middleware, priority);
    }

    pub fn add_middleware_fn<F>(&self, name: impl Into<String>, priority: i32, func: F)
    where
        F: for<'a> Fn(HookContext, Next<'a>) -> BoxFuture<'a, Result<HookContext>>
            + Send
            + Sync
            + 'static,
    {
        self.middleware.add_fn(name, priority, func);
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    pub async fn execute_middleware(&self, ctx: HookContext) -> Result<HookContext> {
        self.middleware.execute(ctx).await
    }

    /// Run the middleware chain around `terminal`. The first error from any
    /// layer, or from the terminal, is returned unchanged.
    pub async fn execute_middleware_with<'a, F, Fut>(
        &self,
        ctx: HookContext,
        terminal: F,
    ) -> Result<HookContext>
    where
        F: FnOnce(HookContext) -> Fut + Send + 'a,
        Fut: Future<Output = Result<HookContext>> + Send + 'a,
    {
        self.middleware.execute_with(ctx, terminal).await
    }

    // ---- lifecycle ----

    /// Initialize every enabled plugin in priority order, then dispatch
    /// `on-startup`. Meant to be called once; repeated calls while running
    /// are ignored.
    ///
    /// On the first failing plugin the runtime falls back to `Created` and the
    /// failure is returned. Plugins initialized before it are not cleaned up
    /// until [`shutdown`](Self::shutdown).
    pub async fn initialize(&self) -> Result<()> {
        let plugins = {
            let mut st = self.lock_state();
            if *st == LifecycleState::Running {
                warn!("extension runtime already initialized, ignoring");
                return Ok(());
            }
            // Running before plugin init so registrations made from inside
            // an initialize callback get initialized too.
            *st = LifecycleState::Running;
            self.registry.enabled_plugins()
        };
        for plugin in &plugins {
            debug!(plugin = plugin.name(), "initializing plugin");
            if let Err(e) = plugin.initialize(self).await {
                *self.lock_state() = LifecycleState::Created;
                error!(plugin = plugin.name(), error = %e, "plugin initialization failed");
                return Err(Error::lifecycle(plugin.name(), LifecyclePhase::Initialize, e));
            }
        }

        if self.config.emit_lifecycle_hooks {
            self.dispatcher
                .dispatch(
                    HookType::OnStartup.as_str(),
                    HookContext::with_request_id("startup"),
                )
                .await;
        }
        info!(plugins = plugins.len(), "extension runtime initialized");
        Ok(())
    }

    /// Dispatch `on-shutdown` (if running), clean up every registered plugin,
    /// enabled or not, and drop all plugins and middleware. Safe to call
    /// repeatedly.
    pub async fn shutdown(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock_state(), LifecycleState::Stopped);

        if previous == LifecycleState::Running && self.config.emit_lifecycle_hooks {
            self.dispatcher
                .dispatch(
                    HookType::OnShutdown.as_str(),
                    HookContext::with_request_id("shutdown"),
                )
                .await;
        }

        let plugins = self.registry.drain();
        for plugin in &plugins {
            self.cleanup_plugin(plugin.as_ref()).await;
        }
        self.middleware.clear();

        if previous == LifecycleState::Stopped && plugins.is_empty() {
            debug!("extension runtime already shut down");
        } else {
            info!(plugins = plugins.len(), "extension runtime shut down");
        }
        Ok(())
    }

    /// Probe every registered plugin.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let mut status = HashMap::new();
        for plugin in self.registry.plugins() {
            let healthy = match plugin.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(plugin = plugin.name(), error = %e, "plugin failed health check");
                    false
                }
            };
            status.insert(plugin.name().to_string(), healthy);
        }
        status
    }
}

impl Default for ExtensionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtensionRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRuntime")
            .field("state", &self.state())
            .field("plugins", &self.registry.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{HookPatch, PluginDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(name: &str, inits: &Arc<AtomicUsize>, cleanups: &Arc<AtomicUsize>) -> Arc<dyn Plugin> {
        let inits = inits.clone();
        let cleanups = cleanups.clone();
        Arc::new(
            PluginDescriptor::new(name, "1.0.0")
                .on_initialize(move || {
                    let inits = inits.clone();
                    async move {
                        inits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .on_cleanup(move || {
                    let cleanups = cleanups.clone();
                    async move {
                        cleanups.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
        )
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let rt = ExtensionRuntime::new();
        assert_eq!(rt.state(), LifecycleState::Created);
        rt.initialize().await.unwrap();
        assert!(rt.is_initialized());
        rt.shutdown().await.unwrap();
        assert_eq!(rt.state(), LifecycleState::Stopped);
        rt.shutdown().await.unwrap();
        assert_eq!(rt.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_second_initialize_is_ignored() {
        let inits = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let rt = ExtensionRuntime::new();
        rt.register_plugin(counting("p", &inits, &cleanups))
            .await
            .unwrap();
        rt.initialize().await.unwrap();
        rt.initialize().await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_priority_comes_from_config() {
        let rt = ExtensionRuntime::with_config(RuntimeConfig::new().with_default_priority(7));
        rt.register_plugin(Arc::new(PluginDescriptor::new("a", "1.0.0")))
            .await
            .unwrap();
        rt.register_plugin_with(
            Arc::new(PluginDescriptor::new("b", "1.0.0")),
            PluginOptions::new().priority(3),
        )
        .await
        .unwrap();
        let infos = rt.get_plugins();
        assert_eq!(infos[0].name, "b");
        assert_eq!(infos[1].priority, 7);
    }

    struct Spawner {
        child_inits: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Plugin for Spawner {
        fn name(&self) -> &str {
            "spawner"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn initialize(&self, runtime: &ExtensionRuntime) -> Result<()> {
            let child = counting("child", &self.child_inits, &Arc::new(AtomicUsize::new(0)));
            runtime.register_plugin(child).await
        }
    }

    #[tokio::test]
    async fn test_plugin_registered_during_initialize_runs_once() {
        let child_inits = Arc::new(AtomicUsize::new(0));
        let rt = ExtensionRuntime::new();
        rt.register_plugin(Arc::new(Spawner {
            child_inits: child_inits.clone(),
        }))
        .await
        .unwrap();

        rt.initialize().await.unwrap();
        assert!(rt.has_plugin("child"));
        assert_eq!(child_inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_initializes_once() {
        let rt = Arc::new(ExtensionRuntime::new());
        let counters: Vec<_> = (0..32).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let cleanups = Arc::new(AtomicUsize::new(0));

        let registrations: Vec<_> = counters
            .iter()
            .enumerate()
            .map(|(i, inits)| {
                let rt = rt.clone();
                let plugin = counting(&format!("p{i}"), inits, &cleanups);
                tokio::spawn(async move { rt.register_plugin(plugin).await })
            })
            .collect();
        let init = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.initialize().await })
        };

        for handle in registrations {
            handle.await.unwrap().unwrap();
        }
        init.await.unwrap().unwrap();
        for inits in &counters {
            assert_eq!(inits.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_startup_hook_can_be_disabled() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let plugin = PluginDescriptor::new("watcher", "1.0.0").hook_fn("on-startup", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(HookPatch::new()))
            }
        });

        let rt = ExtensionRuntime::with_config(RuntimeConfig::new().with_lifecycle_hooks(false));
        rt.register_plugin(Arc::new(plugin)).await.unwrap();
        rt.initialize().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
