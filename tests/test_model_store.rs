//! Integration test: saving and reloading trained detectors

use kolosal_anomaly::engine::{Algorithm, Detector};
use kolosal_anomaly::export::{load_detector, read_header};
use kolosal_anomaly::pipeline::generate_synthetic;
use kolosal_anomaly::utils::FeatureMatrix;
use std::fs;
use tempfile::TempDir;

fn training_data(algorithm: Algorithm) -> FeatureMatrix {
    let n_features = if algorithm == Algorithm::TimeSeries { 1 } else { 4 };
    generate_synthetic(200, n_features, 0.05, 21).unwrap().data
}

fn probe_data(algorithm: Algorithm) -> FeatureMatrix {
    let n_features = if algorithm == Algorithm::TimeSeries { 1 } else { 4 };
    generate_synthetic(60, n_features, 0.2, 22).unwrap().data
}

fn round_trip(extension: &str) {
    let dir = TempDir::new().unwrap();

    for algorithm in Algorithm::ALL {
        let mut original = Detector::with_defaults(algorithm);
        original.train(&training_data(algorithm)).unwrap();

        let path = dir.path().join(format!("{}.{}", algorithm.as_str(), extension));
        let header = original.save(&path).unwrap();
        assert_eq!(header.algorithm, algorithm);

        let mut restored = Detector::load(&path).unwrap();
        assert_eq!(restored.algorithm(), algorithm);
        assert_eq!(restored.n_features(), original.n_features());

        // Both copies start from the same window state, so even the
        // time-series detector must agree row for row
        let probe = probe_data(algorithm);
        let expected = original.predict(&probe).unwrap();
        let actual = restored.predict(&probe).unwrap();
        let expected_labels: Vec<bool> = expected.iter().map(|r| r.is_anomaly).collect();
        let actual_labels: Vec<bool> = actual.iter().map(|r| r.is_anomaly).collect();
        assert_eq!(expected_labels, actual_labels, "{} labels differ after reload", algorithm);
    }
}

#[test]
fn test_binary_round_trip() {
    round_trip("bin");
}

#[test]
fn test_json_round_trip() {
    round_trip("json");
}

#[test]
fn test_header_readable_without_payload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("forest.json");

    let mut detector = Detector::with_defaults(Algorithm::IsolationForest);
    detector.train(&training_data(Algorithm::IsolationForest)).unwrap();
    detector.save(&path).unwrap();

    let header = read_header(&path).unwrap();
    assert_eq!(header.algorithm, Algorithm::IsolationForest);
    assert_eq!(header.n_features, 4);
    assert!(chrono::DateTime::parse_from_rfc3339(&header.trained_at).is_ok());

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"isolation_forest\""));
}

#[test]
fn test_untrained_detector_cannot_be_saved() {
    let dir = TempDir::new().unwrap();
    let detector = Detector::with_defaults(Algorithm::Lof);
    let err = detector.save(dir.path().join("lof.bin")).unwrap_err();
    assert_eq!(err.kind(), "ModelNotTrained");
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = load_detector(&dir.path().join("absent.bin")).unwrap_err();
    assert_eq!(err.kind(), "CorruptOrMissingModel");
}

#[test]
fn test_bad_magic() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.bin");
    fs::write(&path, b"definitely not a model").unwrap();
    assert_eq!(load_detector(&path).unwrap_err().kind(), "CorruptOrMissingModel");
}

#[test]
fn test_corrupted_payload_fails_checksum() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lof.bin");

    let mut detector = Detector::with_defaults(Algorithm::Lof);
    detector.train(&training_data(Algorithm::Lof)).unwrap();
    detector.save(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    // Flip a byte well inside the payload, away from the header and checksum
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert_eq!(load_detector(&path).unwrap_err().kind(), "CorruptOrMissingModel");
}

#[test]
fn test_truncated_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("svm.json");

    let mut detector = Detector::with_defaults(Algorithm::OneClassSvm);
    detector.train(&training_data(Algorithm::OneClassSvm)).unwrap();
    detector.save(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, &text[..text.len() / 2]).unwrap();

    assert_eq!(load_detector(&path).unwrap_err().kind(), "CorruptOrMissingModel");
}
