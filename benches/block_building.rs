//! Benchmarks for export block building
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flashlog_rs::config::max_payload_for_mtu;
use flashlog_rs::export::BlockBuilder;
use flashlog_rs::ingest::Sample;
use flashlog_rs::protocol::{framed_len, Message};
use std::io::Cursor;

fn make_log(rows: usize) -> Vec<u8> {
    let mut log = String::from("date_time,value1,value2\n");
    for i in 0..rows {
        let sample = Sample::new(i as u64 * 1000)
            .with(20.0 + (i % 50) as f64 * 0.1)
            .with(45.0 - (i % 30) as f64 * 0.25);
        log.push_str(&sample.to_row().join(","));
        log.push('\n');
    }
    log.into_bytes()
}

fn bench_drain_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_building");
    let log = make_log(2_000);

    for mtu in [23u16, 185, 247].iter() {
        let max_payload = max_payload_for_mtu(*mtu);
        group.throughput(Throughput::Bytes(log.len() as u64));
        group.bench_with_input(BenchmarkId::new("drain", mtu), &max_payload, |b, &max| {
            b.iter(|| {
                let mut builder = BlockBuilder::new(Box::new(Cursor::new(log.clone())));
                let mut seq = 0u32;
                while let Ok(Some(block)) = builder.next_block(1, seq, black_box(max)) {
                    black_box(block.data.len());
                    seq += 1;
                }
                seq
            });
        });
    }

    group.finish();
}

fn bench_framed_len(c: &mut Criterion) {
    let data = String::from_utf8_lossy(&make_log(8)).into_owned();

    c.bench_function("framed_len_block", |b| {
        b.iter(|| framed_len(black_box(&Message::block(42, 1234, false, data.as_str()))))
    });
}

criterion_group!(benches, bench_drain_log, bench_framed_len);
criterion_main!(benches);
