//! Middleware system.
//!
//! Middleware wraps a terminal operation onion-style. The chain is composed
//! right-to-left: the terminal is the innermost continuation and each
//! middleware, from the highest priority value to the lowest, wraps what was
//! built so far. The lowest priority value therefore runs first and finishes
//! last. Errors are not isolated; they travel back out through every layer.

use super::context::HookContext;
use crate::Result;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

pub type NextFn<'a> =
    Box<dyn FnOnce(HookContext) -> BoxFuture<'a, Result<HookContext>> + Send + 'a>;

/// Continuation handed to a middleware. Not calling [`Next::run`]
/// short-circuits everything inside, terminal included.
pub struct Next<'a> {
    inner: NextFn<'a>,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: HookContext) -> Result<HookContext> {
        (self.inner)(ctx).await
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: HookContext, next: Next<'_>) -> Result<HookContext>;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Closure-backed middleware.
pub struct FnMiddleware<F> {
    name: String,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(HookContext, Next<'a>) -> BoxFuture<'a, Result<HookContext>>
        + Send
        + Sync
        + 'static,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(HookContext, Next<'a>) -> BoxFuture<'a, Result<HookContext>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, ctx: HookContext, next: Next<'_>) -> Result<HookContext> {
        (self.func)(ctx, next).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct MiddlewareEntry {
    middleware: Arc<dyn Middleware>,
    priority: i32,
}

#[derive(Default)]
struct PipelineState {
    // sorted by priority; equal priorities stay in insertion order
    entries: Vec<MiddlewareEntry>,
}

pub struct MiddlewarePipeline {
    state: RwLock<PipelineState>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PipelineState::default()),
        }
    }

    pub fn add(&self, middleware: Arc<dyn Middleware>, priority: i32) {
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let pos = st.entries.partition_point(|e| e.priority <= priority);
        debug!(middleware = middleware.name(), priority, "adding middleware");
        st.entries.insert(
            pos,
            MiddlewareEntry {
                middleware,
                priority,
            },
        );
    }

    pub fn add_fn<F>(&self, name: impl Into<String>, priority: i32, func: F)
    where
        F: for<'a> Fn(HookContext, Next<'a>) -> BoxFuture<'a, Result<HookContext>>
            + Send
            + Sync
            + 'static,
    {
        self.add(Arc::new(FnMiddleware::new(name, func)), priority);
    }

    /// Middleware names, outermost first.
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }

    fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|e| e.middleware.clone())
            .collect()
    }

    /// Run the chain around a terminal that does nothing.
    pub async fn execute(&self, ctx: HookContext) -> Result<HookContext> {
        self.execute_with(ctx, |c| async move { Ok(c) }).await
    }

    /// Run the chain around `terminal`.
    pub async fn execute_with<'a, F, Fut>(&self, ctx: HookContext, terminal: F) -> Result<HookContext>
    where
        F: FnOnce(HookContext) -> Fut + Send + 'a,
        Fut: Future<Output = Result<HookContext>> + Send + 'a,
    {
        let chain = self.snapshot();
        debug!(
            middlewares = chain.len(),
            request_id = %ctx.request_id,
            "executing middleware chain"
        );

        let mut next: NextFn<'a> = Box::new(move |c| terminal(c).boxed());
        for mw in chain.into_iter().rev() {
            let inner = next;
            next = Box::new(move |c| {
                async move { mw.handle(c, Next { inner }).await }.boxed()
            });
        }
        next(ctx).await
    }
}

impl Default for MiddlewarePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;

    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Trace {
        async fn handle(&self, ctx: HookContext, next: Next<'_>) -> Result<HookContext> {
            self.log.lock().unwrap().push(format!("{}-start", self.label));
            let ctx = next.run(ctx).await?;
            self.log.lock().unwrap().push(format!("{}-end", self.label));
            Ok(ctx)
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    struct Gate;

    #[async_trait]
    impl Middleware for Gate {
        async fn handle(&self, mut ctx: HookContext, _next: Next<'_>) -> Result<HookContext> {
            ctx.insert("gated", true);
            Ok(ctx)
        }
    }

    fn trace(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Middleware> {
        Arc::new(Trace {
            label,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(trace("M2", &log), 20);
        pipeline.add(trace("M1", &log), 10);

        pipeline.execute(HookContext::new()).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["M1-start", "M2-start", "M2-end", "M1-end"]
        );
        assert_eq!(pipeline.names(), vec!["M1", "M2"]);
    }

    #[tokio::test]
    async fn test_terminal_runs_innermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(trace("a", &log), 1);
        pipeline.add(trace("b", &log), 1);

        let terminal_log = log.clone();
        let out = pipeline
            .execute_with(HookContext::with_request_id("op"), move |mut c| async move {
                terminal_log.lock().unwrap().push("terminal".to_string());
                c.insert("result", 42);
                Ok(c)
            })
            .await
            .unwrap();

        assert_eq!(out.get("result"), Some(&serde_json::json!(42)));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a-start", "b-start", "terminal", "b-end", "a-end"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(trace("outer", &log), 1);
        pipeline.add(Arc::new(Gate), 2);
        pipeline.add(trace("inner", &log), 3);

        let mut terminal_ran = false;
        let out = pipeline
            .execute_with(HookContext::new(), |c| {
                terminal_ran = true;
                async move { Ok(c) }
            })
            .await
            .unwrap();

        assert!(!terminal_ran);
        assert_eq!(out.get("gated"), Some(&serde_json::json!(true)));
        assert_eq!(*log.lock().unwrap(), vec!["outer-start", "outer-end"]);
    }

    #[tokio::test]
    async fn test_errors_propagate_through_layers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(trace("outer", &log), 1);
        pipeline.add_fn("reject", 2, |_ctx, _next| {
            Box::pin(async move { Err(Error::middleware("rejected")) })
        });

        let err = pipeline.execute(HookContext::new()).await.unwrap_err();
        assert!(matches!(err, Error::Middleware { ref message, .. } if message == "rejected"));
        assert_eq!(*log.lock().unwrap(), vec!["outer-start"]);
    }

    #[tokio::test]
    async fn test_terminal_error_reaches_caller() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add_fn("pass", 1, |ctx, next| Box::pin(async move { next.run(ctx).await }));

        let err = pipeline
            .execute_with(HookContext::new(), |_c| async move {
                Err(Error::plugin("terminal failed"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Plugin { .. }));
    }

    #[tokio::test]
    async fn test_empty_pipeline_runs_terminal() {
        let pipeline = MiddlewarePipeline::new();
        assert!(pipeline.is_empty());
        let out = pipeline
            .execute_with(HookContext::with_request_id("x"), |mut c| async move {
                c.insert("done", true);
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(out.request_id, "x");
        assert_eq!(out.get("done"), Some(&serde_json::json!(true)));

        pipeline.add_fn("noop", 0, |ctx, next| Box::pin(next.run(ctx)));
        assert_eq!(pipeline.len(), 1);
        pipeline.clear();
        assert!(pipeline.is_empty());
    }
}
