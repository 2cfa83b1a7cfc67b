use std::{hint::black_box, sync::Arc, time::Duration};

use criterion::{criterion_group, criterion_main, Criterion};
use tagbus::{
    Bridge, CorrelationRouter, DeliveryMode, EventBus, IdStrategy, LocalTransport, Responder,
    RouterConfig,
};

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_round_trip");
    for mode in [DeliveryMode::Inline, DeliveryMode::Worker] {
        let bus = Arc::new(EventBus::new());
        let transport = Arc::new(LocalTransport::new());
        let _bridge = Bridge::attach(bus.clone(), transport.clone(), "**/reply-to/*", mode).unwrap();
        let _responder =
            Responder::bind(transport.clone(), "echo", |req| Ok(req.payload.clone())).unwrap();
        let router = CorrelationRouter::new(bus, transport);

        group.bench_function(format!("{mode:?}"), |b| {
            b.iter(|| {
                router
                    .request("echo", black_box("ping"), Duration::from_secs(1))
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_id_strategies(c: &mut Criterion) {
    c.bench_function("id_uuid", |b| b.iter(|| IdStrategy::Uuid.next_id()));
    c.bench_function("id_counter", |b| b.iter(|| IdStrategy::Counter.next_id()));
}

fn bench_issue_and_cancel(c: &mut Criterion) {
    let bus = Arc::new(EventBus::new());
    let transport = Arc::new(LocalTransport::new());
    let router = CorrelationRouter::with_config(
        bus,
        transport,
        RouterConfig {
            id_strategy: IdStrategy::Counter,
            ..RouterConfig::default()
        },
    );
    c.bench_function("issue_then_drop", |b| {
        b.iter(|| {
            let pending = router
                .issue("nobody", black_box("x"), Duration::from_secs(1))
                .unwrap();
            drop(pending);
        })
    });
}

criterion_group!(
    benches,
    bench_round_trip,
    bench_id_strategies,
    bench_issue_and_cancel
);
criterion_main!(benches);
