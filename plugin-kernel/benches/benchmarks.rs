use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use plugin_kernel::instance::PluginInstance;
use plugin_kernel::runtime::PluginRuntime;
use plugin_kernel_sdk::routing::{score_labels, Labels};
use plugin_kernel_sdk::{CodeDomain, PluginContainer, PluginContext, SdkError};

struct NullDomain;
impl CodeDomain for NullDomain {
    fn name(&self) -> &str {
        "bench"
    }
}

struct NullContainer;
#[async_trait]
impl PluginContainer for NullContainer {
    async fn start(&self, _ctx: PluginContext) -> Result<(), SdkError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), SdkError> {
        Ok(())
    }
    fn is_active(&self) -> bool {
        true
    }
    fn lookup(&self, _interface: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        None
    }
    fn code_domain(&self) -> Arc<dyn CodeDomain> {
        Arc::new(NullDomain)
    }
}

fn instance(version: &str, labels: &[(&str, &str)], weight: u32) -> Arc<PluginInstance> {
    let labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>();
    Arc::new(PluginInstance::new(
        "bench-plugin",
        version,
        Arc::new(NullContainer),
        labels,
        weight,
    ))
}

fn bench_score_labels(c: &mut Criterion) {
    let instance_labels: Labels = [
        ("env".to_string(), "canary".to_string()),
        ("region".to_string(), "eu".to_string()),
    ]
    .into();
    let requested: Labels = [("env".to_string(), "canary".to_string())].into();

    c.bench_function("score_labels_matched", |b| {
        b.iter(|| score_labels(black_box(&instance_labels), black_box(&requested)));
    });
}

fn bench_select_instance_weighted(c: &mut Criterion) {
    let runtime = PluginRuntime::new("bench-plugin", 5);
    runtime.pool.add(instance("1.0.0", &[], 30), true);
    runtime.pool.add(instance("2.0.0", &[], 70), false);
    let labels = Labels::new();

    c.bench_function("select_instance_weighted_random", |b| {
        b.iter(|| runtime.select_instance(black_box(&labels)));
    });
}

fn bench_select_instance_by_labels(c: &mut Criterion) {
    let runtime = PluginRuntime::new("bench-plugin", 5);
    runtime.pool.add(instance("1.0.0", &[], 100), true);
    runtime
        .pool
        .add(instance("2.0.0", &[("env", "canary")], 100), false);
    let labels: Labels = [("env".to_string(), "canary".to_string())].into();

    c.bench_function("select_instance_by_label", |b| {
        b.iter(|| runtime.select_instance(black_box(&labels)));
    });
}

fn bench_try_enter_exit(c: &mut Criterion) {
    let inst = instance("1.0.0", &[], 100);
    c.bench_function("instance_try_enter_exit", |b| {
        b.iter(|| {
            black_box(inst.try_enter());
            inst.exit();
        });
    });
}

criterion_group!(
    benches,
    bench_score_labels,
    bench_select_instance_weighted,
    bench_select_instance_by_labels,
    bench_try_enter_exit
);
criterion_main!(benches);
