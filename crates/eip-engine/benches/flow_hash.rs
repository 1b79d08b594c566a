//! Flow hash and table benchmark

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eip_engine::flow::flow_hash;
use eip_engine::{DmaAllocator, FlowTable, FlowTableConfig, FlowTuple, SimEngine};

fn v4(spi: u32) -> FlowTuple {
    FlowTuple::esp(
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        spi,
        false,
    )
}

fn hash_benchmark(c: &mut Criterion) {
    let iv = [0x6A09_E667, 0xBB67_AE85, 0x3C6E_F372, 0xA54F_F53A];
    let t4 = v4(0x1000);
    let t6 = FlowTuple::esp(
        IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        0x1000,
        true,
    );

    let mut group = c.benchmark_group("flow_hash");
    group.bench_function("ipv4", |b| b.iter(|| flow_hash(&iv, black_box(&t4))));
    group.bench_function("ipv6", |b| b.iter(|| flow_hash(&iv, black_box(&t6))));
    group.finish();
}

fn table_benchmark(c: &mut Criterion) {
    let alloc = Arc::new(DmaAllocator::new());
    let sim = SimEngine::new(alloc.clone());
    let cfg = FlowTableConfig::default();
    let mut table = FlowTable::new(&cfg, &*sim, &alloc).expect("flow table");
    let tuples: Vec<_> = (0..256).map(v4).collect();

    c.bench_function("flow_table/add_delete_256", |b| {
        b.iter(|| {
            for t in &tuples {
                table.add(t, 0x2000_0003);
            }
            for t in &tuples {
                black_box(table.delete(t));
            }
        })
    });
}

criterion_group!(benches, hash_benchmark, table_benchmark);
criterion_main!(benches);
