//! Packed sequence benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_bench::{random_positions, random_values};
use strata_codec::Varint248;
use strata_packed::{Config, FixedSequence, Page, TreeGeometry, VarSequence};
use strata_testkit::{fixed_page, open_fixed, open_var, var_page};

const SIZES: [usize; 3] = [256, 4096, 65_536];

/// Benchmark range sums through the index versus the value count.
fn bench_fixed_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_sum");
    let geometry = TreeGeometry::DEFAULT;

    for size in SIZES {
        let page = fixed_page(&random_values(size, 1000), geometry);
        let seq = open_fixed(&page, geometry);
        let starts = random_positions(256, size / 2);

        group.bench_with_input(BenchmarkId::from_parameter(size), &starts, |b, starts| {
            b.iter(|| {
                for &start in starts {
                    black_box(seq.sum(0, start, start + size / 2).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark prefix-sum searches.
fn bench_fixed_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_find_ge");
    let geometry = TreeGeometry::DEFAULT;

    for size in SIZES {
        let page = fixed_page(&random_values(size, 1000), geometry);
        let seq = open_fixed(&page, geometry);
        let total = seq.sum_all(0).unwrap();
        let targets = random_values(256, total.max(1));

        group.bench_with_input(BenchmarkId::from_parameter(size), &targets, |b, targets| {
            b.iter(|| {
                for &target in targets {
                    black_box(seq.find_ge(0, target).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark building a sequence by appending one row at a time.
fn bench_fixed_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_append");

    for size in [256usize, 2048] {
        let values = random_values(size, 1000);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &values, |b, values| {
            b.iter(|| {
                let mut page = Page::new(1 << 16, 1).unwrap();
                let mut root = page.root_mut();
                let mut seq = FixedSequence::<_, u64>::create(&mut root, 0, 1, 0, TreeGeometry::DEFAULT).unwrap();
                for &v in values {
                    seq.append(&[v]).unwrap();
                }
                black_box(seq.size());
            });
        });
    }

    group.finish();
}

/// Benchmark positional access in varint columns.
fn bench_var_locate(c: &mut Criterion) {
    let mut group = c.benchmark_group("var_value");
    let config = Config::default();

    for size in SIZES {
        let page = var_page::<Varint248>(&random_values(size, 100_000), &config);
        let seq = open_var::<Varint248>(&page, &config);
        let positions = random_positions(256, size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &positions, |b, positions| {
            b.iter(|| {
                for &idx in positions {
                    black_box(seq.value(0, idx).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark windowed re-encoding.
fn bench_var_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("var_update_values");
    let config = Config::default();

    for size in [1024usize, 8192] {
        let base = var_page::<Varint248>(&random_values(size, 200), &config);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                let mut page = base.clone();
                let root = page.root_mut();
                let child = root.into_child_mut(0).unwrap();
                let mut seq = VarSequence::<_, Varint248>::open(child, config.clone()).unwrap();
                seq.update_values(0, 0, size, |i, v| if i % 2 == 0 { v << 12 } else { v }).unwrap();
                black_box(seq.data_size(0));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fixed_sum,
    bench_fixed_find,
    bench_fixed_append,
    bench_var_locate,
    bench_var_update
);
criterion_main!(benches);
