//! Benchmarks for the publish/deliver path
//!
//! Measures queueing cost, registry round-trips and handler fan-out.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use typebus::prelude::*;

#[derive(Debug, Clone)]
struct Tick {
    value: u64,
}

fn quiet_controller() -> Controller {
    Controller::builder()
        .enable_logging(false)
        .build()
        .expect("controller")
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));

    let controller = quiet_controller();
    group.bench_function("publish_value", |b| {
        b.iter(|| {
            controller.publish(black_box(Tick { value: 1 })).unwrap();
            if controller.pending_events() >= 10_000 {
                controller.deliver().unwrap();
            }
        })
    });

    group.finish();
}

fn bench_subscribe(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    let controller = quiet_controller();
    group.bench_function("subscribe_unsubscribe", |b| {
        b.iter(|| {
            let handle = controller.subscribe(|_: Tick| ()).unwrap();
            black_box(controller.unsubscribe(&handle).unwrap())
        })
    });

    group.bench_function("handler_count", |b| {
        b.iter(|| black_box(controller.handler_count::<Tick>(Qualifier::Value).unwrap()))
    });

    group.finish();
}

fn bench_deliver(c: &mut Criterion) {
    let mut group = c.benchmark_group("deliver");

    for handlers in [1usize, 8, 64] {
        let controller = quiet_controller();
        let sum = Arc::new(AtomicU64::new(0));
        for _ in 0..handlers {
            let sum = sum.clone();
            controller
                .subscribe_ref(move |tick: &Tick| {
                    sum.fetch_add(tick.value, Ordering::Relaxed);
                })
                .unwrap();
        }

        group.throughput(Throughput::Elements(100 * handlers as u64));
        group.bench_with_input(
            BenchmarkId::new("100_events", handlers),
            &handlers,
            |b, _| {
                b.iter(|| {
                    for value in 0..100 {
                        controller.publish_ref(Tick { value }).unwrap();
                    }
                    black_box(controller.deliver().unwrap())
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_publish, bench_subscribe, bench_deliver);
criterion_main!(benches);
