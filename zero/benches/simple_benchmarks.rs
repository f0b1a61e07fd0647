//! Micro-benchmarks for encoding, framing and a local round trip

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use zero::{
    Encoder, MsgPackEncoder, RequestFrame, RequestId, ResponseFrame, ServerConfig, WorkerMode,
    ZeroClient, ZeroServer,
};

#[derive(Serialize, Deserialize, Clone)]
struct BenchmarkData {
    data: Vec<u8>,
    sequence: u64,
}

impl BenchmarkData {
    fn new(size: usize, sequence: u64) -> Self {
        Self {
            data: vec![0u8; size],
            sequence,
        }
    }
}

fn echo(msg: String) -> zero::Result<String> {
    Ok(msg)
}

fn benchmark_encoding(c: &mut Criterion) {
    let encoder = MsgPackEncoder;
    let mut group = c.benchmark_group("msgpack");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(
            BenchmarkId::new("encode_decode", size),
            size,
            |b, &size| {
                b.iter(|| {
                    let data = BenchmarkData::new(size, 0);
                    let encoded = encoder.encode(&data).unwrap();
                    let decoded: BenchmarkData = encoder.decode_type(&encoded).unwrap();
                    black_box(decoded);
                });
            },
        );
    }

    group.finish();
}

fn benchmark_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    let payload = Bytes::from(vec![7u8; 256]);

    group.bench_function("request_encode_parse", |b| {
        b.iter(|| {
            let frame = RequestFrame::new(RequestId::new(), "echo", payload.clone())
                .unwrap()
                .encode();
            black_box(RequestFrame::parse(&frame).unwrap());
        });
    });

    group.bench_function("response_encode_parse", |b| {
        let id = RequestId::new();
        b.iter(|| {
            let frame = ResponseFrame::new(id, payload.clone()).encode();
            black_box(ResponseFrame::parse(&frame).unwrap());
        });
    });

    group.bench_function("request_id", |b| {
        b.iter(|| black_box(RequestId::new()));
    });

    group.finish();
}

fn benchmark_round_trip(c: &mut Criterion) {
    let mut server = ZeroServer::with_config(
        ServerConfig::new("127.0.0.1", 0)
            .with_workers(2)
            .with_worker_mode(WorkerMode::Thread),
    );
    server.register_rpc("echo", echo).unwrap();
    let handle = server.start().unwrap();
    let client = ZeroClient::new("127.0.0.1", handle.port());

    let mut group = c.benchmark_group("round_trip");
    group.measurement_time(Duration::from_secs(5));
    group.bench_function("sync_echo", |b| {
        b.iter(|| {
            let reply: String = client.call("echo", "ping").unwrap();
            black_box(reply);
        });
    });
    group.finish();

    client.close();
    handle.shutdown();
}

criterion_group!(
    benches,
    benchmark_encoding,
    benchmark_framing,
    benchmark_round_trip
);
criterion_main!(benches);
