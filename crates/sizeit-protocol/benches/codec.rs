//! Codec benchmarks for sizeit-protocol.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sizeit_protocol::{codec, Event, EventKind};

fn bench_encode_fragment(c: &mut Criterion) {
    let event = Event::new(EventKind::Results, vec![b'x'; 512]);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(512));
    group.bench_function("fragment_512B", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });
    group.finish();
}

fn bench_encode_multiline(c: &mut Criterion) {
    let payload = "<li>participant</li>\n".repeat(32);
    let event = Event::new(EventKind::Results, payload);

    c.bench_function("encode_multiline_32", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });
}

fn bench_roundtrip(c: &mut Criterion) {
    let event = Event::new(EventKind::Tabs, vec![b'x'; 256]);

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&event)).unwrap();
            let mut buf = BytesMut::from(&encoded[..]);
            codec::decode_from(black_box(&mut buf)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_fragment,
    bench_encode_multiline,
    bench_roundtrip
);
criterion_main!(benches);
