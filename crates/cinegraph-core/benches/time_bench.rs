//! Benchmarks for cinegraph-core time operations.
//!
//! Run with: cargo bench -p cinegraph-core

use cinegraph_core::{RationalTime, Rounding, TimeRange, TimeRangeList, TimeRangeListFrameIterator};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_rational_time_arithmetic(c: &mut Criterion) {
    let a = RationalTime::new(1001, 30);
    let b = RationalTime::new(500, 24);

    c.bench_function("rational_time_add", |bencher| {
        bencher.iter(|| black_box(a) + black_box(b));
    });

    c.bench_function("rational_time_to_timestamp", |bencher| {
        let timebase = RationalTime::new(1001, 30000);
        bencher.iter(|| black_box(a).to_timestamp(black_box(timebase), Rounding::Round));
    });
}

fn bench_range_list(c: &mut Criterion) {
    c.bench_function("range_list_insert_remove_1000", |bencher| {
        bencher.iter(|| {
            let mut list = TimeRangeList::new();
            for i in 0..1000 {
                list.insert(TimeRange::seconds(i * 3, i * 3 + 2));
            }
            for i in 0..500 {
                list.remove(TimeRange::seconds(i * 6 + 1, i * 6 + 4));
            }
            black_box(list.len())
        });
    });
}

fn bench_frame_iterator(c: &mut Criterion) {
    let list = TimeRangeList::from_ranges([TimeRange::seconds(0, 60), TimeRange::seconds(120, 180)]);
    let timebase = RationalTime::new(1001, 30000);

    c.bench_function("frame_iterator_two_minutes", |bencher| {
        bencher.iter(|| TimeRangeListFrameIterator::new(black_box(list.clone()), timebase).count());
    });
}

criterion_group!(
    benches,
    bench_rational_time_arithmetic,
    bench_range_list,
    bench_frame_iterator,
);
criterion_main!(benches);
