//! Minimal host: one plugin, two middleware layers, one wrapped call.
//!
//! Run:
//! - `RUST_LOG=debug cargo run --example basic_runtime`

use extension_runtime::{
    ExtensionRuntime, HookContext, HookPatch, HookType, PluginDescriptor, PluginOptions,
    PluginPriority, RuntimeConfig,
};
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = ExtensionRuntime::with_config(RuntimeConfig::from_env()?);

    let auth = PluginDescriptor::new("auth", "1.0.0")
        .with_description("Attaches the caller identity")
        .hook_fn(HookType::BeforeRequest, |ctx| async move {
            if ctx.get("token").is_none() {
                return Ok(Some(HookPatch::halting().set("rejected", "missing token")));
            }
            Ok(Some(HookPatch::new().set("user", "demo-user")))
        })
        .on_initialize(|| async {
            println!("🔌 auth plugin ready");
            Ok(())
        });
    runtime
        .register_plugin_with(
            Arc::new(auth),
            PluginOptions::new().priority(PluginPriority::High),
        )
        .await?;

    runtime.add_middleware_fn("timing", 10, |ctx, next| {
        Box::pin(async move {
            let started = Instant::now();
            let mut ctx = next.run(ctx).await?;
            ctx.insert("elapsed_us", started.elapsed().as_micros() as u64);
            Ok(ctx)
        })
    });
    runtime.add_middleware_fn("audit", 20, |ctx, next| {
        Box::pin(async move {
            println!("📡 [audit] request {}", ctx.request_id);
            next.run(ctx).await
        })
    });

    runtime.initialize().await?;

    for token in [Some("secret"), None] {
        let mut ctx = HookContext::new();
        if let Some(token) = token {
            ctx.insert("token", token);
        }
        let ctx = runtime.execute_hooks(HookType::BeforeRequest, ctx).await;
        if ctx.should_halt() {
            eprintln!("❌ rejected: {}", ctx.get("rejected").cloned().unwrap_or_default());
            continue;
        }

        let ctx = runtime
            .execute_middleware_with(ctx, |mut ctx| async move {
                let user = ctx
                    .get("user")
                    .and_then(|v| v.as_str())
                    .unwrap_or("anonymous")
                    .to_string();
                ctx.insert("response", format!("hello, {user}"));
                Ok(ctx)
            })
            .await?;
        println!("✅ {}", serde_json::to_string_pretty(&ctx)?);
    }

    println!("plugins: {}", serde_json::to_string(&runtime.get_plugins())?);
    runtime.shutdown().await?;
    Ok(())
}
