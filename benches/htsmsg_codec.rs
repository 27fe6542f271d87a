// ABOUTME: Benchmark suite for the HTSMSG wire codec's encode/decode paths
// ABOUTME: Covers a simple handshake-sized message and a list-heavy channel-listing-sized one

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use htsp_pvr_core::htsmsg::{decode, encode, Value};
use std::time::Duration;

fn hello_message() -> Value {
    Value::map([
        ("method", Value::str("hello")),
        ("htspversion", Value::S64(25)),
        ("clientname", Value::str("mp.tvheadend")),
        ("clientversion", Value::str("1.0")),
    ])
}

fn channel_list_message(channel_count: usize) -> Value {
    let channels = (0..channel_count)
        .map(|i| {
            Value::map([
                ("channelId", Value::S64(i as i128)),
                ("channelName", Value::str(format!("Channel {i}"))),
                ("channelNumber", Value::S64((i + 1) as i128)),
            ])
        })
        .collect();
    Value::map([
        ("method", Value::str("channelAdd")),
        ("channels", Value::List(channels)),
    ])
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.measurement_time(Duration::from_secs(5));

    let hello = hello_message();
    group.bench_function("hello", |b| b.iter(|| encode(black_box(&hello)).unwrap()));

    for &count in &[1usize, 16, 256] {
        let message = channel_list_message(count);
        group.bench_with_input(BenchmarkId::new("channel_list", count), &message, |b, message| {
            b.iter(|| encode(black_box(message)).unwrap())
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.measurement_time(Duration::from_secs(5));

    let hello_bytes = encode(&hello_message()).unwrap();
    group.bench_function("hello", |b| {
        b.iter(|| decode(black_box(&hello_bytes)).unwrap())
    });

    for &count in &[1usize, 16, 256] {
        let bytes = encode(&channel_list_message(count)).unwrap();
        group.bench_with_input(BenchmarkId::new("channel_list", count), &bytes, |b, bytes| {
            b.iter(|| decode(black_box(bytes)).unwrap())
        });
    }

    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("roundtrip");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("hello", |b| {
        b.iter(|| {
            let message = hello_message();
            let bytes = encode(black_box(&message)).unwrap();
            decode(&bytes).unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_roundtrip);
criterion_main!(benches);
