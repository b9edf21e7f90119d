//! Built-in logging, metrics, retry and caching plugins around a fake upstream.
//!
//! Run:
//! - `RUST_LOG=info cargo run --example builtin_plugins --features builtin`

#[cfg(feature = "builtin")]
use extension_runtime::builtin::{register_defaults, CachingPlugin, RetryPlugin};
#[cfg(feature = "builtin")]
use extension_runtime::{ExtensionRuntime, HookContext, HookType, PluginOptions};
#[cfg(feature = "builtin")]
use serde_json::json;
#[cfg(feature = "builtin")]
use std::sync::Arc;

#[cfg(feature = "builtin")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = ExtensionRuntime::new();
    let (_logging, metrics) = register_defaults(&runtime).await?;
    let cache = Arc::new(CachingPlugin::new());
    runtime
        .register_plugin_with(cache.clone(), PluginOptions::new().priority(10))
        .await?;
    runtime.register_plugin(Arc::new(RetryPlugin::new())).await?;
    runtime.initialize().await?;

    for (i, prompt) in ["hello", "world", "hello"].into_iter().enumerate() {
        let ctx = HookContext::new().with_field("request", json!({ "prompt": prompt }));
        let ctx = runtime.execute_hooks(HookType::BeforeRequest, ctx).await;
        if ctx.should_halt() {
            println!("⚡ cache hit: {}", ctx.get("cached_result").cloned().unwrap_or_default());
            continue;
        }

        // every second call fails once before succeeding
        let ctx = if i % 2 == 1 {
            let failed = runtime
                .execute_hooks(HookType::OnError, ctx.with_field("error", "upstream timeout"))
                .await;
            println!("🔁 retry in {}ms", failed.get("retry_delay_ms").cloned().unwrap_or_default());
            failed
        } else {
            ctx
        };

        let ctx = ctx
            .with_field("response", json!({ "text": prompt.to_uppercase() }))
            .with_field("success", true);
        runtime.execute_hooks(HookType::AfterResponse, ctx).await;
    }

    println!("📊 metrics: {:?}", metrics.snapshot());
    println!("🗄️ cache: {}", serde_json::to_string(&cache.stats())?);
    println!("health: {:?}", runtime.health_check().await);
    runtime.shutdown().await?;
    Ok(())
}

#[cfg(not(feature = "builtin"))]
fn main() {
    eprintln!("Enable feature: --features builtin");
}
