//! Criterion benchmarks for record buffer hot paths.
//!
//! Key metrics:
//! - `put`/`get` throughput for typical exception report sizes
//! - End-to-end throughput through the write coordinator with a concurrent reader
//! - Report encoding cost, plain and LZ4
//!
//! Run with: cargo bench --bench ring_buffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use exceptional::config::WriterConfig;
use exceptional::report::{ExceptionReport, PayloadCodec, StackFrame};
use exceptional::{NoopSignal, Record, RecordBuffer, ReferenceReader, WriteCoordinator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Single-threaded put followed by get, so the buffer never fills.
fn record_buffer_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_buffer_put_get");

    for size in [16usize, 256, 1024, 8192] {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bench.ring");
        let buffer = RecordBuffer::create_shared(&path, 32_760).unwrap();
        let data = vec![0xA5u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("mapped", size), &size, |b, _| {
            b.iter(|| {
                assert!(buffer.put(black_box(&data)));
                black_box(buffer.get());
            });
        });
    }

    group.finish();
}

/// Producers feed the coordinator while a reader thread drains the buffer.
fn coordinator_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator");
    const BATCH: u64 = 1_000;
    group.throughput(Throughput::Elements(BATCH));

    for producers in [1usize, 4] {
        group.bench_with_input(
            BenchmarkId::new("producers", producers),
            &producers,
            |b, &producers| {
                let buffer = Arc::new(RecordBuffer::with_capacity(4096).unwrap());
                let coordinator = Arc::new(
                    WriteCoordinator::spawn(
                        Arc::clone(&buffer),
                        NoopSignal,
                        WriterConfig::default(),
                    )
                    .unwrap(),
                );
                let stop = Arc::new(AtomicBool::new(false));
                let reader = {
                    let stop = Arc::clone(&stop);
                    let mut reader = ReferenceReader::new(Arc::clone(&buffer));
                    thread::spawn(move || {
                        while !stop.load(Ordering::Relaxed) {
                            if reader.next_record().is_none() {
                                thread::yield_now();
                            }
                        }
                    })
                };

                b.iter(|| {
                    let per_producer = BATCH / producers as u64;
                    let handles: Vec<_> = (0..producers)
                        .map(|_| {
                            let coordinator = Arc::clone(&coordinator);
                            thread::spawn(move || {
                                for i in 0..per_producer {
                                    coordinator.submit(Record::new(i.to_be_bytes()).unwrap());
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    coordinator.wait_idle(std::time::Duration::from_secs(10));
                });

                stop.store(true, Ordering::Relaxed);
                reader.join().unwrap();
                coordinator.close().unwrap();
            },
        );
    }

    group.finish();
}

fn report_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("report_encode");
    let mut report = ExceptionReport::new("connection reset by peer")
        .with_cause(ExceptionReport::new("broken pipe"));
    for depth in 0..20 {
        report = report.with_frame(
            StackFrame::new("com.example.net.Client", format!("send{depth}"))
                .at("Client.java", 100 + depth),
        );
    }

    for compress in [false, true] {
        let codec = PayloadCodec::new(compress);
        let label = if compress { "lz4" } else { "json" };
        group.bench_function(label, |b| {
            b.iter(|| black_box(codec.encode(black_box(&report)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    record_buffer_put_get,
    coordinator_throughput,
    report_encoding
);
criterion_main!(benches);
