use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use data_io::{BatchifyFunction, PadBatchify, StackBatchify};
use tch::{Device, Kind, Tensor};

/// Benchmarks for the builtin batchify functions.
///
/// This measures:
/// 1. Stacking: equal-shaped `input_ids` plus a scalar label per sample
/// 2. Padding: ragged `input_ids` padded to the batch maximum
///
/// To run these, use:
/// ```bash
/// cargo bench -p data_io
/// ```

/// Batch sizes swept by every benchmark.
const BATCH_SIZES: [usize; 4] = [8, 32, 128, 512];

const SEQ_LEN: i64 = 128;

fn make_samples(batch_size: usize, ragged: bool) -> Vec<Vec<Tensor>> {
    (0..batch_size)
        .map(|i| {
            let len = if ragged {
                1 + (i as i64 * 37) % SEQ_LEN
            } else {
                SEQ_LEN
            };
            vec![
                Tensor::ones(&[len], (Kind::Int64, Device::Cpu)),
                Tensor::from(i as i64),
            ]
        })
        .collect()
}

fn bench_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("StackBatchify");
    let mut stack = StackBatchify::new();
    stack.init(&[]).expect("stack init");

    for &size in &BATCH_SIZES {
        let samples = make_samples(size, false);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &samples, |b, samples| {
            b.iter(|| {
                let out = stack.batchify(black_box(samples)).expect("stack");
                black_box(out);
            })
        });
    }
    group.finish();
}

fn bench_pad(c: &mut Criterion) {
    let mut group = c.benchmark_group("PadBatchify");
    let mut pad = PadBatchify::new();
    pad.init(&[("round_to".to_string(), "8".to_string())])
        .expect("pad init");

    for &size in &BATCH_SIZES {
        let samples = make_samples(size, true);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &samples, |b, samples| {
            b.iter(|| {
                let out = pad.batchify(black_box(samples)).expect("pad");
                black_box(out);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stack, bench_pad);
criterion_main!(benches);
