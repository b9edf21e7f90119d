//! Hook dispatch.

use super::context::HookContext;
use super::registry::PluginRegistry;
use crate::{Error, ErrorContext};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one dispatch.
#[derive(Debug)]
pub struct HookReport {
    /// Context after every merge.
    pub context: HookContext,
    /// Plugins whose handler was invoked, in order.
    pub invoked: Vec<String>,
    /// Handler failures, each an [`Error::HookHandler`].
    pub failures: Vec<Error>,
    /// Plugin whose patch set `halt`, if the chain was cut short.
    pub halted_by: Option<String>,
}

impl HookReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the handlers a registry holds for a hook name, one after another.
///
/// A failing handler is logged and skipped; it never stops its siblings.
/// A handler stops the chain only by merging `halt: true` into the context.
pub struct HookDispatcher {
    registry: Arc<PluginRegistry>,
}

impl HookDispatcher {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, hook: &str, ctx: HookContext) -> HookContext {
        self.dispatch_report(hook, ctx).await.context
    }

    pub async fn dispatch_report(&self, hook: &str, ctx: HookContext) -> HookReport {
        let bindings = self.registry.bindings(hook);
        let mut report = HookReport {
            context: ctx,
            invoked: Vec::with_capacity(bindings.len()),
            failures: Vec::new(),
            halted_by: None,
        };
        if bindings.is_empty() {
            return report;
        }
        debug!(hook, handlers = bindings.len(), request_id = %report.context.request_id, "dispatching hook");

        for binding in bindings {
            if report.context.should_halt() {
                debug!(hook, plugin = %binding.plugin, "context halted, skipping remaining handlers");
                break;
            }
            report.invoked.push(binding.plugin.clone());
            let outcome = AssertUnwindSafe(binding.handler.call(&report.context))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_error(panic)));

            match outcome {
                Ok(Some(patch)) if !patch.is_empty() => {
                    report.context.merge(patch);
                    if report.context.should_halt() {
                        debug!(hook, plugin = %binding.plugin, "hook chain halted");
                        report.halted_by = Some(binding.plugin);
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        hook,
                        plugin = %binding.plugin,
                        priority = binding.priority,
                        error = %e,
                        "hook handler failed"
                    );
                    report
                        .failures
                        .push(Error::hook_handler(&binding.plugin, hook, e));
                }
            }
        }
        report
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> Error {
    let details = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    Error::runtime_with_context(
        "hook handler panicked",
        ErrorContext::new()
            .with_details(details)
            .with_source("hook_dispatcher"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use crate::plugins::{HookPatch, PluginDescriptor};
    use serde_json::json;
    use std::sync::Mutex;

    fn registry_with(plugins: Vec<(PluginDescriptor, i32)>) -> Arc<PluginRegistry> {
        let reg = Arc::new(PluginRegistry::new());
        for (p, prio) in plugins {
            reg.insert(Arc::new(p), true, prio, PluginConfig::new())
                .unwrap();
        }
        reg
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>) -> PluginDescriptor {
        let log = log.clone();
        let tag = name.to_string();
        PluginDescriptor::new(name, "1.0.0").hook_fn("before-request", move |_| {
            let log = log.clone();
            let tag = tag.clone();
            async move {
                log.lock().unwrap().push(tag);
                Ok(None)
            }
        })
    }

    #[tokio::test]
    async fn test_handlers_see_earlier_merges() {
        let first = PluginDescriptor::new("first", "1.0.0").hook_fn("before-request", |_| async {
            Ok(Some(HookPatch::new().set("count", 1)))
        });
        let second =
            PluginDescriptor::new("second", "1.0.0").hook_fn("before-request", |ctx| async move {
                let n = ctx.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(Some(HookPatch::new().set("count", n + 1)))
            });
        let dispatcher = HookDispatcher::new(registry_with(vec![(second, 20), (first, 10)]));

        let out = dispatcher
            .dispatch("before-request", HookContext::with_request_id("r"))
            .await;
        assert_eq!(out.get("count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_halt_skips_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stopper = PluginDescriptor::new("stopper", "1.0.0")
            .hook_fn("before-request", |_| async { Ok(Some(HookPatch::halting())) });
        let dispatcher = HookDispatcher::new(registry_with(vec![
            (recorder("early", &log), 1),
            (stopper, 5),
            (recorder("late", &log), 9),
        ]));

        let report = dispatcher
            .dispatch_report("before-request", HookContext::new())
            .await;
        assert!(report.context.halt);
        assert_eq!(report.halted_by.as_deref(), Some("stopper"));
        assert_eq!(report.invoked, vec!["early", "stopper"]);
        assert_eq!(*log.lock().unwrap(), vec!["early"]);
    }

    #[tokio::test]
    async fn test_halted_context_invokes_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = HookDispatcher::new(registry_with(vec![
            (recorder("a", &log), 1),
            (recorder("b", &log), 2),
        ]));

        let mut ctx = HookContext::with_request_id("r");
        ctx.halt = true;
        let report = dispatcher.dispatch_report("before-request", ctx.clone()).await;
        assert!(report.invoked.is_empty());
        assert!(report.halted_by.is_none());
        assert_eq!(report.context, ctx);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = PluginDescriptor::new("failing", "1.0.0").hook_fn("before-request", |_| async {
            Err(Error::plugin("boom"))
        });
        let panicking =
            PluginDescriptor::new("panicking", "1.0.0").hook_fn("before-request", |ctx| async move {
                if ctx.request_id == "r" {
                    panic!("handler exploded");
                }
                Ok(None)
            });
        let dispatcher = HookDispatcher::new(registry_with(vec![
            (failing, 1),
            (panicking, 2),
            (recorder("survivor", &log), 3),
        ]));

        let report = dispatcher
            .dispatch_report("before-request", HookContext::with_request_id("r"))
            .await;
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].plugin_name(), Some("failing"));
        assert!(report.failures[1].to_string().contains("panicked"));
        assert!(!report.context.halt);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_empty_patch_is_ignored_and_unknown_hook_is_noop() {
        let noop = PluginDescriptor::new("noop", "1.0.0")
            .hook_fn("before-request", |_| async { Ok(Some(HookPatch::new())) });
        let dispatcher = HookDispatcher::new(registry_with(vec![(noop, 1)]));

        let ctx = HookContext::with_request_id("same");
        let out = dispatcher.dispatch("before-request", ctx.clone()).await;
        assert_eq!(out, ctx);

        let report = dispatcher.dispatch_report("on-error", ctx.clone()).await;
        assert!(report.invoked.is_empty());
        assert_eq!(report.context, ctx);
    }
}
