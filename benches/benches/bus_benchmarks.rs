use std::{
    hint::black_box,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tagbus::{Envelope, EventBus, Listener};

fn counting_bus(listeners: usize) -> (EventBus, Arc<AtomicU64>) {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicU64::new(0));
    for _ in 0..listeners {
        let h = hits.clone();
        bus.add_listen(
            "chan",
            Listener::from_fn(move |_| {
                h.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .unwrap();
    }
    (bus, hits)
}

fn bench_send_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_fan_out");
    for listeners in [1usize, 10, 100] {
        let (bus, _hits) = counting_bus(listeners);
        let env = Envelope::event("chan", "x");
        group.throughput(Throughput::Elements(listeners as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(listeners),
            &listeners,
            |b, _| b.iter(|| bus.send("chan", black_box(&env)).unwrap()),
        );
    }
    group.finish();
}

fn bench_send_unknown_tag(c: &mut Criterion) {
    let bus = EventBus::new();
    let env = Envelope::event("nobody", "x");
    c.bench_function("send_unknown_tag", |b| {
        b.iter(|| bus.send(black_box("nobody"), &env).unwrap())
    });
}

fn bench_registration_churn(c: &mut Criterion) {
    let bus = EventBus::new();
    // постоянный слушатель, чтобы тег не удалялся на каждой итерации
    bus.add_listen("chan", Listener::from_fn(|_| {})).unwrap();
    c.bench_function("add_remove_listener", |b| {
        b.iter(|| {
            let l = Listener::from_fn(|_| {});
            bus.add_listen("chan", l.clone()).unwrap();
            black_box(bus.remove_listen("chan", &l));
        })
    });

    c.bench_function("add_remove_last_listener", |b| {
        b.iter(|| {
            let l = Listener::from_fn(|_| {});
            bus.add_listen("fresh", l.clone()).unwrap();
            black_box(bus.remove_listen("fresh", &l));
        })
    });
}

fn bench_envelope_codec(c: &mut Criterion) {
    let env = Envelope::event("sensors/temp", serde_json::json!({"value": 21.5, "unit": "C"}));
    let frame = tagbus::envelope::encode(&env).unwrap();
    c.bench_function("envelope_encode", |b| {
        b.iter(|| tagbus::envelope::encode(black_box(&env)).unwrap())
    });
    c.bench_function("envelope_decode", |b| {
        b.iter(|| tagbus::envelope::decode(black_box(&frame)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_send_fan_out,
    bench_send_unknown_tag,
    bench_registration_churn,
    bench_envelope_codec
);
criterion_main!(benches);
