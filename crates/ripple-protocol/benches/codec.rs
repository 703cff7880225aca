//! Codec benchmarks for ripple-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ripple_protocol::{codec, Frame};

fn bench_encode_publish(c: &mut Criterion) {
    let frame = Frame::publish("x".repeat(64), "bench-offset-1");

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("publish_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let frame = Frame::message("x".repeat(64), 42);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("message_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = Frame::message("x".repeat(256), 42);

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_publish,
    bench_decode_message,
    bench_roundtrip
);
criterion_main!(benches);
