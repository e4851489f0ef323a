//! Performance benchmarks for regime-signals
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use regime_signals::{
    indicators, DetectionMethod, ParameterStore, PriceSeries, RegimeClassifier, SignalGenerator,
    Symbol,
};

fn series(n: usize) -> PriceSeries {
    let close: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 + t * 0.05 + 4.0 * (t / 7.0).sin() + 1.5 * (t / 3.0).cos()
        })
        .collect();
    let high = close.iter().map(|c| c * 1.005).collect();
    let low = close.iter().map(|c| c * 0.995).collect();
    PriceSeries::new(close)
        .and_then(|s| s.with_high_low(high, low))
        .expect("valid series")
}

fn benchmark_indicators(c: &mut Criterion) {
    let s = series(1_000);
    c.bench_function("atr_14", |b| {
        b.iter(|| indicators::atr(black_box(s.highs_or_closes()), s.lows_or_closes(), s.closes(), 14))
    });
    c.bench_function("rsi_14", |b| b.iter(|| indicators::rsi(black_box(s.closes()), 14)));
}

fn benchmark_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let symbol = Symbol::from("BTC");

    for n in [100, 500, 2_000] {
        let s = series(n);
        for method in [DetectionMethod::TrendStrength, DetectionMethod::Combined] {
            group.bench_with_input(BenchmarkId::new(method.to_string(), n), &s, |b, s| {
                b.iter(|| {
                    // Fresh history keeps the measurement to one classification
                    let mut classifier = RegimeClassifier::default();
                    black_box(classifier.classify(&symbol, s, method))
                })
            });
        }
    }
    group.finish();
}

fn benchmark_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    let generator = SignalGenerator::default();
    let store = ParameterStore::default();
    let symbol = Symbol::from("ETH");

    for n in [100, 500] {
        let s = series(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &s, |b, s| {
            b.iter(|| {
                let mut classifier = RegimeClassifier::default();
                black_box(generator.generate(&mut classifier, &store, &symbol, s))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_indicators, benchmark_classify, benchmark_generate);
criterion_main!(benches);
