use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kolosal_anomaly::engine::{Algorithm, Detector};
use kolosal_anomaly::pipeline::generate_synthetic;

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("train");
    group.sample_size(10); // Fewer samples for training benchmarks

    for n_rows in [500, 1000, 2000].iter() {
        let data = generate_synthetic(*n_rows, 10, 0.1, 1).unwrap().data;

        for algorithm in [Algorithm::IsolationForest, Algorithm::Lof, Algorithm::OneClassSvm] {
            group.bench_with_input(
                BenchmarkId::new(algorithm.as_str(), n_rows),
                &data,
                |b, data| {
                    b.iter(|| {
                        let mut detector = Detector::with_defaults(algorithm);
                        detector.train(black_box(data)).unwrap()
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict");
    let train = generate_synthetic(1000, 10, 0.1, 2).unwrap().data;

    for algorithm in [Algorithm::IsolationForest, Algorithm::Lof, Algorithm::OneClassSvm] {
        let mut detector = Detector::with_defaults(algorithm);
        detector.train(&train).unwrap();

        for batch_size in [1, 100].iter() {
            let batch = generate_synthetic(*batch_size, 10, 0.1, 3).unwrap().data;
            group.bench_with_input(
                BenchmarkId::new(algorithm.as_str(), batch_size),
                &batch,
                |b, batch| b.iter(|| detector.predict(black_box(batch)).unwrap()),
            );
        }
    }

    group.finish();
}

fn bench_timeseries(c: &mut Criterion) {
    let history: Vec<f64> = (0..1000).map(|t| (t as f64 * 0.1).sin()).collect();
    let series = kolosal_anomaly::utils::FeatureMatrix::from_series(&history).unwrap();
    let mut detector = Detector::with_defaults(Algorithm::TimeSeries);
    detector.train(&series).unwrap();

    let next = kolosal_anomaly::utils::FeatureMatrix::from_series(&[0.5]).unwrap();
    c.bench_function("timeseries/score_next", |b| {
        b.iter(|| detector.predict(black_box(&next)).unwrap())
    });
}

criterion_group!(benches, bench_training, bench_scoring, bench_timeseries);
criterion_main!(benches);
