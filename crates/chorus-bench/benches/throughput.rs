//! Throughput benchmarks for Chorus.
//!
//! These benchmarks measure the raw throughput of the codec, the sequencer
//! and fan-out to a growing number of subscribers.

use chorus_core::{fan_out, DeliveryHandle, Message, Registry, Sequencer, SubscriberKind};
use chorus_protocol::{codec, ServerFrame};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

const BODY_SIZES: [(&str, usize); 3] = [("64B", 64), ("1KB", 1024), ("64KB", 65536)];

fn message_frame(size: usize) -> ServerFrame {
    ServerFrame::message(1, "bench", "x".repeat(size))
}

/// Benchmark outbound frame encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for (label, size) in BODY_SIZES {
        let frame = message_frame(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("msgpack/{label}"), |b| {
            b.iter(|| codec::encode(black_box(&frame)))
        });
        group.bench_function(format!("json/{label}"), |b| {
            b.iter(|| codec::encode_json(black_box(&frame)))
        });
    }

    group.finish();
}

/// Benchmark frame decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (label, size) in BODY_SIZES {
        let encoded = codec::encode(&message_frame(size)).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(format!("msgpack/{label}"), |b| {
            b.iter(|| codec::decode::<ServerFrame>(black_box(&encoded)))
        });
    }

    let submit = r#"{"type":"submit","request":7,"author":"bench","body":"hello"}"#;
    group.bench_function("json/submit", |b| {
        b.iter(|| codec::decode_client_json(black_box(submit)))
    });

    group.finish();
}

/// Benchmark ID assignment.
fn bench_sequencer(c: &mut Criterion) {
    let sequencer = Sequencer::new();
    c.bench_function("sequencer/next", |b| b.iter(|| black_box(sequencer.next())));
}

/// Benchmark fan-out scenarios. Every queue is drained each iteration so
/// no subscriber falls behind.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let registry = Registry::new();
            let mut receivers: Vec<_> = (0..size)
                .map(|_| {
                    let (handle, rx) = DeliveryHandle::channel(1);
                    registry.register(SubscriberKind::Push, handle, None);
                    rx
                })
                .collect();
            let message = Arc::new(Message::new(1, "bench", "x".repeat(64)));

            b.iter(|| {
                let report = fan_out(&registry, black_box(&message));
                for rx in &mut receivers {
                    let _ = rx.try_recv();
                }
                report
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_sequencer,
    bench_fanout,
);
criterion_main!(benches);
