//! Flow Table Benchmarks
//!
//! Ingest and sweep cost under the single table lock.

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flowwatch_core::{
    Finalizer, FlowKey, FlowTable, IdleTimeouts, LocalAddrs, MemoryEmitter, PacketDescriptor,
    TransportProtocol,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

fn new_table() -> FlowTable {
    let local = Arc::new(LocalAddrs::from_addrs([Ipv4Addr::new(10, 0, 0, 5).into()]));
    let finalizer = Finalizer::new("bench", "eth0", Arc::new(MemoryEmitter::new()));
    FlowTable::new(local, IdleTimeouts::default(), finalizer)
}

fn packet(i: u32) -> PacketDescriptor {
    let src = SocketAddr::new(Ipv4Addr::from(0x0A00_0000 | (i >> 8)).into(), (i & 0xFF) as u16 + 1024);
    let dst = SocketAddr::new(Ipv4Addr::new(8, 8, 8, 8).into(), 443);
    PacketDescriptor::tcp(src, dst, 1500, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
}

fn bench_flow_id(c: &mut Criterion) {
    let key = FlowKey::new(
        Ipv4Addr::new(192, 168, 1, 1).into(),
        Ipv4Addr::new(8, 8, 8, 8).into(),
        12345,
        443,
        TransportProtocol::Tcp,
    );

    c.bench_function("flow_id", |b| b.iter(|| black_box(key).flow_id()));
}

fn bench_ingest_update(c: &mut Criterion) {
    let table = new_table();
    for i in 0..100_000 {
        table.ingest(&packet(i));
    }
    let hot = packet(50_000);

    c.bench_function("ingest_update_100k", |b| b.iter(|| table.ingest(black_box(&hot))));
}

fn bench_ingest_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_create");

    for flows in [1_000u32, 10_000, 100_000].iter() {
        let packets: Vec<_> = (0..*flows).map(packet).collect();
        group.throughput(Throughput::Elements(*flows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(flows), &packets, |b, packets| {
            b.iter(|| {
                let table = new_table();
                for p in packets {
                    table.ingest(p);
                }
                black_box(table.len())
            })
        });
    }
    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");

    for flows in [10_000u32, 100_000].iter() {
        let packets: Vec<_> = (0..*flows).map(packet).collect();
        let now = packets[0].timestamp + Duration::seconds(120);
        group.bench_with_input(BenchmarkId::new("evict_all", flows), &packets, |b, packets| {
            b.iter_batched(
                || {
                    let table = new_table();
                    for p in packets {
                        table.ingest(p);
                    }
                    table
                },
                |table| black_box(table.sweep(now)),
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_flow_id,
    bench_ingest_update,
    bench_ingest_create,
    bench_sweep,
);

criterion_main!(benches);
