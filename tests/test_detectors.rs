//! Integration test: detector behavior on Gaussian data

use kolosal_anomaly::engine::{Algorithm, Detector, DetectorConfig};
use kolosal_anomaly::utils::FeatureMatrix;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

const BATCH_ALGORITHMS: [Algorithm; 3] = [
    Algorithm::IsolationForest,
    Algorithm::OneClassSvm,
    Algorithm::Lof,
];

fn gaussian(n: usize, d: usize, mean: f64, seed: u64) -> FeatureMatrix {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|_| (0..d).map(|_| mean + rng.sample::<f64, _>(StandardNormal)).collect())
        .collect();
    FeatureMatrix::from_rows(&rows).unwrap()
}

fn trained(algorithm: Algorithm, data: &FeatureMatrix) -> Detector {
    let mut detector = Detector::with_defaults(algorithm);
    detector.train(data).unwrap();
    detector
}

fn anomaly_rate(detector: &mut Detector, data: &FeatureMatrix) -> f64 {
    detector.predict_report(data).unwrap().summary.anomaly_rate
}

#[test]
fn test_training_anomalies_match_contamination() {
    let data = gaussian(400, 3, 0.0, 1);
    for algorithm in BATCH_ALGORITHMS {
        let mut detector = Detector::new(DetectorConfig::default_for(algorithm)).unwrap();
        let report = detector.train(&data).unwrap();
        let expected = 0.1 * data.nrows() as f64;
        let actual = report.anomalies_detected as f64;
        assert!(
            (actual - expected).abs() <= 0.5 * expected,
            "{}: {} anomalies, expected about {}",
            algorithm,
            actual,
            expected
        );
    }
}

#[test]
fn test_in_distribution_rate_near_contamination() {
    let train = gaussian(600, 2, 0.0, 2);
    let test = gaussian(1000, 2, 0.0, 3);

    for algorithm in BATCH_ALGORITHMS {
        let mut detector = trained(algorithm, &train);
        let rate = anomaly_rate(&mut detector, &test);
        assert!(
            (rate - 0.1).abs() <= 0.05,
            "{}: in-distribution anomaly rate {}",
            algorithm,
            rate
        );
    }
}

#[test]
fn test_far_shift_is_flagged() {
    let train = gaussian(300, 4, 0.0, 4);
    let shifted = gaussian(50, 4, 10.0, 5);

    for algorithm in BATCH_ALGORITHMS {
        let mut detector = trained(algorithm, &train);
        let rate = anomaly_rate(&mut detector, &shifted);
        assert!(rate >= 0.5, "{}: shifted anomaly rate {}", algorithm, rate);
    }
}

#[test]
fn test_predict_is_idempotent() {
    let train = gaussian(200, 3, 0.0, 6);
    let test = gaussian(40, 3, 0.5, 7);

    for algorithm in BATCH_ALGORITHMS {
        let mut detector = trained(algorithm, &train);
        let first = detector.predict(&test).unwrap();
        let second = detector.predict(&test).unwrap();
        assert_eq!(first, second, "{} changed between calls", algorithm);
    }
}

#[test]
fn test_isolation_forest_flags_distant_cluster() {
    let train = gaussian(1000, 10, 0.0, 8);
    let far = gaussian(10, 10, 20.0, 9);

    let config = DetectorConfig::default_for(Algorithm::IsolationForest)
        .with_contamination(0.1)
        .unwrap();
    let mut detector = Detector::new(config).unwrap();
    detector.train(&train).unwrap();

    let results = detector.predict(&far).unwrap();
    let flagged = results.iter().filter(|r| r.is_anomaly).count();
    assert!(flagged >= 5, "only {} of 10 flagged", flagged);
}

#[test]
fn test_timeseries_flags_injected_spike() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(10);
    let mut wave = |t: usize| (t as f64 * 0.2).sin() + 0.02 * rng.sample::<f64, _>(StandardNormal);

    let history: Vec<f64> = (0..50).map(&mut wave).collect();
    let mut sequence: Vec<f64> = (50..150).map(&mut wave).collect();
    sequence[50] = 10.0;

    let mut detector = Detector::with_defaults(Algorithm::TimeSeries);
    detector
        .train(&FeatureMatrix::from_series(&history).unwrap())
        .unwrap();
    let results = detector
        .predict(&FeatureMatrix::from_series(&sequence).unwrap())
        .unwrap();

    assert_eq!(results.len(), 100);
    assert!(results[50].is_anomaly);
    assert!(results[50].anomaly_score > 3.0);
}

#[test]
fn test_width_change_is_dimension_mismatch() {
    let mut detector = trained(Algorithm::IsolationForest, &gaussian(100, 3, 0.0, 11));
    let err = detector.predict(&gaussian(5, 4, 0.0, 12)).unwrap_err();
    assert_eq!(err.kind(), "DimensionMismatch");
}

#[test]
fn test_predict_before_train() {
    for algorithm in Algorithm::ALL {
        let mut detector = Detector::with_defaults(algorithm);
        let err = detector.predict(&gaussian(3, 1, 0.0, 13)).unwrap_err();
        assert_eq!(err.kind(), "ModelNotTrained");
    }
}

#[test]
fn test_retraining_replaces_model() {
    let mut detector = trained(Algorithm::Lof, &gaussian(150, 2, 0.0, 14));
    let report = detector.train(&gaussian(120, 5, 0.0, 15)).unwrap();
    assert_eq!(report.n_features, 5);
    assert_eq!(detector.n_features(), Some(5));
}
