//! Publish-path throughput benchmarks.
//!
//! Measures the producer-side cost of handing records to the sink under
//! both overload policies, with a counting downstream that consumes as
//! fast as it can.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ringlog::{wrap_with_counters, AsyncSinkConfig, DownstreamSink, Result, SinkCounters};

#[derive(Debug, Default)]
struct Record {
    value: u64,
}

struct CountingSink {
    delivered: Arc<AtomicU64>,
}

impl DownstreamSink<Record> for CountingSink {
    fn emit(&mut self, record: Record) -> Result<()> {
        self.delivered.fetch_add(record.value.max(1), Ordering::Relaxed);
        Ok(())
    }
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));

    for &block in &[false, true] {
        let label = if block { "block" } else { "drop" };
        group.bench_with_input(BenchmarkId::new("policy", label), &block, |b, &block| {
            let delivered = Arc::new(AtomicU64::new(0));
            let sink = wrap_with_counters(
                CountingSink {
                    delivered: Arc::clone(&delivered),
                },
                AsyncSinkConfig::default()
                    .buffer_size(16384)
                    .block_when_full(block),
                Arc::new(SinkCounters::new()),
            )
            .unwrap();

            let mut value = 0u64;
            b.iter(|| {
                value += 1;
                sink.publish(Record { value });
            });

            sink.close().unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_publish);
criterion_main!(benches);
