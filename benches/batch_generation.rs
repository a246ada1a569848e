//! Benchmarks for event building and batch generation
//!
//! Covers the synchronous hot path of every strategy:
//! - PacketFooter split of a packed chunk
//! - Proxy event pairing across sources
//! - Full batch sequences at several pull sizes
//!
//! Platform: Cross-platform (synthetic streams, CI-safe)

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use smd_builder::test_utils::{StreamBuilder, pack};
use smd_builder::{EventBuilder, EventBuilderManager, PacketFooter, Passthrough};
use std::hint::black_box;
use std::sync::Arc;

const SOURCES: usize = 8;
const EVENTS: u64 = 2_000;

fn synthetic_chunk() -> Bytes {
    let timestamps: Vec<u64> = (1..=EVENTS).collect();
    let views = (0..SOURCES)
        .map(|s| StreamBuilder::new(s).events(&timestamps).build())
        .collect();
    pack(views)
}

fn bench_footer_split(c: &mut Criterion) {
    let chunk = synthetic_chunk();

    let mut group = c.benchmark_group("footer");
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    group.bench_function("split", |b| {
        b.iter(|| black_box(PacketFooter::split(black_box(&chunk), SOURCES)))
    });
    group.finish();
}

fn bench_event_pairing(c: &mut Criterion) {
    let chunk = synthetic_chunk();
    let views = PacketFooter::split(&chunk, SOURCES).expect("valid chunk");

    let mut group = c.benchmark_group("event_pairing");
    group.throughput(Throughput::Elements(EVENTS));
    group.bench_function("next_event", |b| {
        b.iter(|| {
            let mut eb = EventBuilder::new(views.clone());
            let mut paired = 0;
            while let Some(evt) = eb.next_event().expect("no framing errors") {
                paired += evt.dgrams.len();
            }
            black_box(paired)
        })
    });
    group.finish();
}

fn bench_batches(c: &mut Criterion) {
    let chunk = synthetic_chunk();

    let mut group = c.benchmark_group("batches");
    group.throughput(Throughput::Elements(EVENTS));
    for pull_size in [10usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(pull_size), &pull_size, |b, &pull| {
            b.iter(|| {
                let mut manager =
                    EventBuilderManager::new(&chunk, SOURCES, pull, Arc::new(Passthrough))
                        .expect("valid chunk");
                let mut bytes = 0;
                for pair in manager.batches() {
                    let (data, step) = pair.expect("no framing errors");
                    bytes += data.byte_len() + step.byte_len();
                }
                black_box(bytes)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_footer_split, bench_event_pairing, bench_batches);
criterion_main!(benches);
