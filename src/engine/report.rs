//! Training and prediction reports returned by [`Detector`](super::Detector)

use super::Algorithm;
use crate::anomaly::{MethodCounts, MethodFlags, MethodScores, SeriesScore, SeriesStatistics};
use crate::utils::ScoreStats;
use serde::{Deserialize, Serialize};

/// Verdict for one input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub index: usize,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    /// Absolute value of the score
    pub confidence: f64,
    /// Time series only: which methods fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<MethodFlags>,
    /// Time series only: per-method scores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<MethodScores>,
}

impl ScoreResult {
    pub fn new(index: usize, anomaly_score: f64, is_anomaly: bool) -> Self {
        Self {
            index,
            is_anomaly,
            anomaly_score,
            confidence: anomaly_score.abs(),
            methods: None,
            scores: None,
        }
    }

    /// Verdict for one time-series observation; the rolling z is the score
    pub fn from_series(index: usize, score: &SeriesScore) -> Self {
        Self {
            methods: Some(score.methods),
            scores: Some(score.scores),
            ..Self::new(index, score.z(), score.is_anomaly())
        }
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub algorithm: Algorithm,
    pub n_samples: usize,
    pub n_features: usize,
    pub training_time_ms: f64,
    /// Expected anomaly fraction (ν for the one-class SVM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contamination: Option<f64>,
    /// Training rows classified as anomalous by the fitted model
    pub anomalies_detected: usize,
    pub score_stats: ScoreStats,
    /// Decision threshold the model settled on
    pub threshold: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_support_vectors: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_vector_ratio: Option<f64>,
    /// LOF mode, `novelty` or `outlier`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<SeriesStatistics>,
    /// Per-method trigger counts over the training series
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods_triggered: Option<MethodCounts>,
}

/// Aggregate over one prediction batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total_anomalies: usize,
    pub anomaly_rate: f64,
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Present when the results carry per-method flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods_triggered: Option<MethodCounts>,
}

impl PredictionSummary {
    pub fn from_results(results: &[ScoreResult]) -> Self {
        let scores: Vec<f64> = results.iter().map(|r| r.anomaly_score).collect();
        let stats = ScoreStats::from_scores(&scores);
        let total_anomalies = results.iter().filter(|r| r.is_anomaly).count();
        let anomaly_rate = if results.is_empty() {
            0.0
        } else {
            total_anomalies as f64 / results.len() as f64
        };

        let flags: Vec<&MethodFlags> = results.iter().filter_map(|r| r.methods.as_ref()).collect();
        let methods_triggered = (!flags.is_empty()).then(|| MethodCounts::from_flags(flags));

        Self {
            total_anomalies,
            anomaly_rate,
            mean_score: stats.mean,
            min_score: stats.min,
            max_score: stats.max,
            methods_triggered,
        }
    }
}

/// Outcome of a prediction batch, with timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionReport {
    pub algorithm: Algorithm,
    pub n_samples: usize,
    pub scoring_time_ms: f64,
    pub avg_time_per_sample_ms: f64,
    pub results: Vec<ScoreResult>,
    pub summary: PredictionSummary,
}

impl PredictionReport {
    pub fn new(algorithm: Algorithm, results: Vec<ScoreResult>, scoring_time_ms: f64) -> Self {
        let n_samples = results.len();
        Self {
            algorithm,
            n_samples,
            scoring_time_ms,
            avg_time_per_sample_ms: if n_samples == 0 {
                0.0
            } else {
                scoring_time_ms / n_samples as f64
            },
            summary: PredictionSummary::from_results(&results),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_absolute_score() {
        let r = ScoreResult::new(3, -0.62, true);
        assert_eq!(r.confidence, 0.62);
        assert_eq!(r.index, 3);
    }

    #[test]
    fn test_summary() {
        let results = vec![
            ScoreResult::new(0, -0.4, false),
            ScoreResult::new(1, -0.7, true),
            ScoreResult::new(2, -0.4, false),
            ScoreResult::new(3, -0.5, false),
        ];
        let summary = PredictionSummary::from_results(&results);
        assert_eq!(summary.total_anomalies, 1);
        assert_eq!(summary.anomaly_rate, 0.25);
        assert_eq!(summary.min_score, -0.7);
        assert_eq!(summary.max_score, -0.4);
        assert!((summary.mean_score + 0.5).abs() < 1e-12);
        assert!(summary.methods_triggered.is_none());
    }

    #[test]
    fn test_series_results_count_methods() {
        let spike = SeriesScore {
            scores: MethodScores { z_score: 4.2, modified_z_score: 5.0, ema_deviation: 3.1 },
            methods: MethodFlags { z_score: true, modified_z_score: true, ema_deviation: true },
        };
        let drift = SeriesScore {
            scores: MethodScores { z_score: 0.4, modified_z_score: 3.5, ema_deviation: 0.2 },
            methods: MethodFlags { z_score: false, modified_z_score: true, ema_deviation: false },
        };
        let results = vec![ScoreResult::from_series(0, &spike), ScoreResult::from_series(1, &drift)];
        assert_eq!(results[0].anomaly_score, 4.2);
        assert!(!results[1].is_anomaly);

        let summary = PredictionSummary::from_results(&results);
        assert_eq!(summary.total_anomalies, 1);
        assert_eq!(
            summary.methods_triggered,
            Some(MethodCounts { z_score: 1, modified_z_score: 2, ema_deviation: 1 })
        );

        let body = serde_json::to_value(&results[1]).unwrap();
        assert_eq!(body["methods"]["modified_z_score"], true);
        assert_eq!(body["scores"]["z_score"], 0.4);
    }

    #[test]
    fn test_report_timing() {
        let results = vec![ScoreResult::new(0, 1.0, false), ScoreResult::new(1, 2.0, false)];
        let report = PredictionReport::new(Algorithm::OneClassSvm, results, 4.0);
        assert_eq!(report.n_samples, 2);
        assert_eq!(report.avg_time_per_sample_ms, 2.0);
    }
}
