//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, Frame};
use serde_json::json;

fn chat_frame() -> Frame {
    Frame::invocation("ReceiveMessage", vec![json!("alice"), json!("hello, world")])
}

fn bench_encode(c: &mut Criterion) {
    let frame = chat_frame();
    let encoded_len = codec::encode(&frame).unwrap().len() as u64;

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(encoded_len));
    group.bench_function("chat_invocation", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = chat_frame();
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("chat_invocation", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = Frame::invocation(
        "Mixed",
        vec![json!("payload"), json!(12345), json!(2.5), json!(true), json!(null)],
    );

    c.bench_function("roundtrip_mixed_args", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_roundtrip);
criterion_main!(benches);
