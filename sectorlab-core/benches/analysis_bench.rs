//! Criterion benchmarks for SectorLab hot paths.
//!
//! Benchmarks:
//! 1. Elbow selection over the k-means candidate sweep
//! 2. Per-sector density annotation
//! 3. Full per-symbol pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use sectorlab_core::cluster::{fit, select_k};
use sectorlab_core::config::StrategyConfig;
use sectorlab_core::density::annotate;
use sectorlab_core::domain::{flatten_prices, Bar};
use sectorlab_core::sector::build;
use sectorlab_core::analyze;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(n: usize) -> Vec<Bar> {
    let base = chrono::NaiveDate::from_ymd_opt(2020, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            Bar {
                timestamp: base + chrono::Duration::days(i as i64),
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000_000.0 + (i % 500) as f64,
            }
        })
        .collect()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_select_k(c: &mut Criterion) {
    let config = StrategyConfig::default();
    let mut group = c.benchmark_group("select_k");
    for bars in [30usize, 250, 1000] {
        let prices = flatten_prices(&make_bars(bars));
        group.bench_with_input(BenchmarkId::from_parameter(bars), &prices, |b, prices| {
            b.iter(|| {
                select_k(
                    black_box(prices),
                    config.clustering.max_clusters,
                    config.min_data_points,
                    &config.clustering,
                )
            })
        });
    }
    group.finish();
}

fn bench_density(c: &mut Criterion) {
    let config = StrategyConfig::default();
    let prices = flatten_prices(&make_bars(250));
    let centroids = fit(&prices, 4, &config.clustering).centroids;
    let set = build(&prices, &centroids, 0.01, 0.3).unwrap();
    c.bench_function("annotate_4_sectors", |b| {
        b.iter(|| {
            let mut set = set.clone();
            annotate(&mut set, black_box(&prices), &config.density);
            set
        })
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let config = StrategyConfig::default();
    let bars = make_bars(250);
    c.bench_function("analyze_250_bars", |b| b.iter(|| analyze(black_box(&bars), &config)));
}

criterion_group!(benches, bench_select_k, bench_density, bench_pipeline);
criterion_main!(benches);
