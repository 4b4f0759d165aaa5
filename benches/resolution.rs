//! Benchmarks for interval resolution and output rendering.

use ahash::AHashSet;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cob_interval_reconstructor::store::render_csv;
use cob_interval_reconstructor::{
    assemble_day, filter_icebergs, Action, RawOrderEvent, ResolveStats, ResolverConfig, Side,
    ValidityResolver,
};
use rust_decimal::Decimal;

/// `lineages` orders, each with `chain` Changes and a final Delete.
fn create_test_events(lineages: usize, chain: usize) -> Vec<RawOrderEvent> {
    let base = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
    let mut events = Vec::with_capacity(lineages * (chain + 2));

    for i in 0..lineages {
        let id = (i + 1) as i64;
        let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
        let price = Decimal::new(4000 + (i % 50) as i64, 2);

        for step in 0..=chain + 1 {
            let action = match step {
                0 => Action::Add,
                s if s <= chain => Action::Change,
                _ => Action::Delete,
            };
            let tx = base + Duration::milliseconds((step * lineages + i) as i64);
            events.push(
                RawOrderEvent::new(id, id, action, side, tx)
                    .with_price_quantity(price, Decimal::new((step % 10 + 1) as i64, 0)),
            );
        }
    }

    events.sort_by_key(|e| e.transaction_time);
    events
}

fn bench_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver");

    for chain in [0usize, 4, 16] {
        let events = create_test_events(10_000, chain);
        group.throughput(Throughput::Elements(events.len() as u64));

        group.bench_with_input(BenchmarkId::new("resolve", chain), &events, |b, events| {
            let resolver = ValidityResolver::new(ResolverConfig::new());
            b.iter(|| black_box(resolver.resolve(events.clone())))
        });
    }

    group.finish();
}

fn bench_day_pipeline(c: &mut Criterion) {
    let day = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
    let events = create_test_events(5_000, 4);
    let intervals = ValidityResolver::default()
        .resolve(events.clone())
        .map(|r| r.intervals)
        .unwrap_or_default();

    let mut group = c.benchmark_group("day");
    group.throughput(Throughput::Elements(events.len() as u64));

    group.bench_function("iceberg_filter", |b| {
        b.iter(|| {
            let mut stats = ResolveStats::default();
            black_box(filter_icebergs(events.clone(), &mut stats))
        })
    });

    // every version appears in both days and is collapsed
    let icebergs = AHashSet::new();
    group.bench_function("assemble_and_render", |b| {
        b.iter(|| {
            let partition = assemble_day(day, &intervals, Some(&intervals), &icebergs);
            black_box(render_csv(&partition.rows))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_resolver, bench_day_pipeline);
criterion_main!(benches);
