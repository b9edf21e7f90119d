//! Benchmarks for hook dispatch and middleware composition
//!
//! This benchmark measures:
//! - Sequential hook dispatch across a growing number of plugins
//! - Onion middleware composition around a trivial terminal

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use extension_runtime::{ExtensionRuntime, HookContext, HookPatch, PluginDescriptor, PluginOptions};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime_with_plugins(rt: &Runtime, count: usize) -> ExtensionRuntime {
    let ext = ExtensionRuntime::new();
    rt.block_on(async {
        for i in 0..count {
            let plugin = PluginDescriptor::new(format!("plugin-{i}"), "1.0.0").hook_fn(
                "before-request",
                move |_ctx| async move { Ok(Some(HookPatch::new().set(format!("k{i}"), i))) },
            );
            ext.register_plugin_with(Arc::new(plugin), PluginOptions::new().priority(i as i32))
                .await
                .expect("register");
        }
    });
    ext
}

fn bench_hook_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("hook_dispatch");

    for count in [1usize, 8, 32] {
        let ext = runtime_with_plugins(&rt, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("before_request", count), &count, |b, _| {
            b.to_async(&rt).iter(|| async {
                let ctx = ext
                    .execute_hooks("before-request", HookContext::with_request_id("bench"))
                    .await;
                black_box(ctx)
            })
        });
    }

    group.finish();
}

fn bench_middleware_chain(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("middleware_chain");

    for depth in [1usize, 8, 32] {
        let ext = ExtensionRuntime::new();
        for i in 0..depth {
            ext.add_middleware_fn(format!("mw-{i}"), i as i32, |ctx, next| {
                Box::pin(next.run(ctx))
            });
        }
        group.bench_with_input(BenchmarkId::new("passthrough", depth), &depth, |b, _| {
            b.to_async(&rt).iter(|| async {
                let ctx = ext
                    .execute_middleware(HookContext::with_request_id("bench"))
                    .await
                    .expect("chain");
                black_box(ctx)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hook_dispatch, bench_middleware_chain);
criterion_main!(benches);
