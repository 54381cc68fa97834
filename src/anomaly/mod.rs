//! Anomaly detection module
//!
//! Provides anomaly/outlier detection algorithms including:
//! - Isolation Forest (random partitioning ensemble)
//! - One-Class SVM (single enclosing decision boundary)
//! - Local Outlier Factor (relative local density)
//! - Rolling z-score detector for scalar time series
//! - Ensemble combinator over trained detectors
//!
//! The three batch detectors share one score convention: lower scores are
//! more anomalous, and a sample is an anomaly when its score falls strictly
//! below [`AnomalyDetector::threshold`]. The time-series detector reports a
//! signed z-score and flags `|z| > z_threshold`; it is not an
//! [`AnomalyDetector`] because scoring advances its rolling window.

mod ensemble;
mod isolation_forest;
mod lof;
mod one_class_svm;
mod timeseries;

pub use ensemble::{EnsembleDetector, EnsembleStrategy, EnsembleVerdict};
pub use isolation_forest::{IsolationForest, IsolationForestConfig, IsolationTree};
pub use lof::{LOFResult, LocalOutlierFactor, LofConfig};
pub use one_class_svm::{Gamma, KernelType, OneClassSVM, OneClassSvmConfig};
pub use timeseries::{
    MethodCounts, MethodFlags, MethodScores, RollingWindow, SeriesScore, SeriesStatistics,
    TimeSeriesConfig, TimeSeriesDetector,
};

use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Anomaly detection result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Anomaly scores (lower = more anomalous for batch detectors)
    pub scores: Array1<f64>,
    /// Binary labels (-1 = anomaly, 1 = normal)
    pub labels: Array1<i32>,
    /// Threshold used for classification
    pub threshold: f64,
    /// Number of anomalies detected
    pub n_anomalies: usize,
}

impl AnomalyResult {
    pub fn is_anomaly(&self, index: usize) -> bool {
        self.labels[index] == -1
    }
}

/// Trait for batch anomaly detectors.
///
/// Scoring takes `&self`: a fitted detector is never modified by prediction.
pub trait AnomalyDetector: Send + Sync {
    /// Fit the detector on training data, replacing any previous fit
    fn fit(&mut self, x: &Array2<f64>) -> Result<()>;

    /// Compute anomaly scores for new data
    fn score_samples(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Scores strictly below this value are anomalies
    fn threshold(&self) -> f64;

    /// Whether `fit` has produced a model
    fn is_fitted(&self) -> bool;

    /// Number of features seen at fit time
    fn n_features(&self) -> Option<usize>;

    /// Predict labels (-1 = anomaly, 1 = normal)
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<i32>> {
        let threshold = self.threshold();
        Ok(self
            .score_samples(x)?
            .mapv(|s| if s < threshold { -1 } else { 1 }))
    }

    /// Fit and predict in one step
    fn fit_predict(&mut self, x: &Array2<f64>) -> Result<Array1<i32>> {
        self.fit(x)?;
        self.predict(x)
    }

    /// Get detection results with scores and labels from a single scoring pass
    fn detect(&self, x: &Array2<f64>) -> Result<AnomalyResult> {
        let scores = self.score_samples(x)?;
        let threshold = self.threshold();
        let labels = scores.mapv(|s| if s < threshold { -1 } else { 1 });
        let n_anomalies = labels.iter().filter(|&&l| l == -1).count();

        Ok(AnomalyResult {
            scores,
            labels,
            threshold,
            n_anomalies,
        })
    }
}

/// Reject scoring input whose width differs from the fitted width
pub(crate) fn check_features(expected: Option<usize>, x: &Array2<f64>) -> Result<usize> {
    let expected = expected.ok_or(KolosalError::ModelNotTrained)?;
    if x.ncols() != expected {
        return Err(KolosalError::DimensionMismatch {
            expected,
            actual: x.ncols(),
        });
    }
    Ok(expected)
}

/// Reject contamination outside (0, 0.5]
pub(crate) fn validate_contamination(contamination: f64) -> Result<()> {
    if !(contamination > 0.0 && contamination <= 0.5) {
        return Err(KolosalError::invalid_config(
            "contamination",
            contamination,
            "must be in (0, 0.5]",
        ));
    }
    Ok(())
}

/// Linear-interpolated quantile, `q` in [0, 1]
pub(crate) fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
