//! Benchmark for the entry store and the server chain

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use registry_memory::{
    CallContext, MemoryRegistry, NetworkServiceEndpoint, Query, RegistryConfig, RegistryMetrics,
    Store,
};
use std::sync::Arc;

fn nse(i: u64) -> NetworkServiceEndpoint {
    NetworkServiceEndpoint::new(format!("nse-{:04}", i))
        .with_url(format!("tcp://10.0.{}.{}:5000", i / 256, i % 256))
        .with_service(format!("ns-{}", i % 10))
}

fn store() -> Arc<Store<NetworkServiceEndpoint>> {
    Store::new(
        &RegistryConfig::default(),
        Arc::new(RegistryMetrics::new().unwrap()),
    )
}

fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("register_new_entry", |b| {
        let store = store();
        let mut counter = 0u64;

        b.iter(|| {
            counter += 1;
            let _ = store.register(black_box(nse(counter)));
        });
    });

    // Pre-register entries
    let store = store();
    for i in 0..1000 {
        let _ = store.register(nse(i));
    }

    group.bench_function("refresh_existing_entry", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let _ = store.register(black_box(nse(counter % 1000)));
        });
    });

    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    let store = store();
    for i in 0..1000 {
        let _ = store.register(nse(i));
    }

    group.bench_function("list_by_service_1000", |b| {
        let template = NetworkServiceEndpoint::for_service("ns-3");
        b.iter(|| store.list(black_box(&template)));
    });

    group.finish();
}

fn bench_concurrent_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    group.throughput(Throughput::Elements(100));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = MemoryRegistry::new(RegistryConfig::default()).unwrap();
    let chain = registry.endpoint_chain();

    group.bench_function("concurrent_100_registers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for i in 0..100 {
                    let chain = chain.clone();
                    handles.push(tokio::spawn(async move {
                        let _ = chain.register(&mut CallContext::new(), nse(i)).await;
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.bench_function("find_through_chain", |b| {
        b.iter(|| {
            rt.block_on(async {
                let stream = chain
                    .find(
                        &mut CallContext::new(),
                        Query::new(NetworkServiceEndpoint::for_service("ns-3")),
                    )
                    .await
                    .unwrap();
                registry_memory::collect_entries(stream).await.unwrap()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_register, bench_find, bench_concurrent_chain);
criterion_main!(benches);
