//! Closed dispatch over the four detector algorithms

use super::{Algorithm, DetectorConfig, PredictionReport, ScoreResult, TrainingReport};
use crate::anomaly::{
    AnomalyDetector, AnomalyResult, IsolationForest, LocalOutlierFactor, MethodCounts,
    OneClassSVM, TimeSeriesDetector,
};
use crate::error::{KolosalError, Result};
use crate::export::{self, ModelHeader};
use crate::utils::{FeatureMatrix, ScoreStats, Timer};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Fitted internals of one algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    IsolationForest(IsolationForest),
    OneClassSvm(OneClassSVM),
    Lof(LocalOutlierFactor),
    TimeSeries(TimeSeriesDetector),
}

impl TrainedModel {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            TrainedModel::IsolationForest(_) => Algorithm::IsolationForest,
            TrainedModel::OneClassSvm(_) => Algorithm::OneClassSvm,
            TrainedModel::Lof(_) => Algorithm::Lof,
            TrainedModel::TimeSeries(_) => Algorithm::TimeSeries,
        }
    }

    /// Feature count the model was fitted on
    pub fn n_features(&self) -> Option<usize> {
        match self {
            TrainedModel::IsolationForest(m) => m.n_features(),
            TrainedModel::OneClassSvm(m) => m.n_features(),
            TrainedModel::Lof(m) => m.n_features(),
            TrainedModel::TimeSeries(m) => m.is_fitted().then_some(1),
        }
    }
}

/// An anomaly detector of one fixed algorithm.
///
/// The configuration is validated at construction. `train` builds a fresh
/// model from it and swaps it in only once fitting succeeded, so a failed
/// training run leaves the previous model untouched.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
    model: Option<TrainedModel>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, model: None })
    }

    /// Detector with default hyperparameters
    pub fn with_defaults(algorithm: Algorithm) -> Self {
        Self {
            config: DetectorConfig::default_for(algorithm),
            model: None,
        }
    }

    /// Reassemble a detector from persisted parts
    pub(crate) fn from_parts(config: DetectorConfig, model: TrainedModel) -> Result<Self> {
        if config.algorithm() != model.algorithm() {
            return Err(KolosalError::CorruptOrMissingModel(format!(
                "config is for {} but fitted model is {}",
                config.algorithm(),
                model.algorithm()
            )));
        }
        Ok(Self {
            config,
            model: Some(model),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.config.algorithm()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.model.as_ref().and_then(TrainedModel::n_features)
    }

    /// Fit on `data`, replacing any previous model
    pub fn train(&mut self, data: &FeatureMatrix) -> Result<TrainingReport> {
        if data.is_empty() {
            return Err(KolosalError::InvalidInput("training data has no rows".to_string()));
        }
        let x = data.as_array();

        let mut methods_triggered = None;
        let (model, fit, training_time_ms) = match &self.config {
            DetectorConfig::IsolationForest(config) => {
                let mut forest = IsolationForest::new(config.clone());
                let timer = Timer::start("isolation_forest_fit");
                forest.fit(x)?;
                let elapsed_ms = timer.stop();
                let fit = forest.detect(x)?;
                (TrainedModel::IsolationForest(forest), fit, elapsed_ms)
            }
            DetectorConfig::OneClassSvm(config) => {
                let mut svm = OneClassSVM::new(config.clone());
                let timer = Timer::start("one_class_svm_fit");
                svm.fit(x)?;
                let elapsed_ms = timer.stop();
                let fit = svm.detect(x)?;
                (TrainedModel::OneClassSvm(svm), fit, elapsed_ms)
            }
            DetectorConfig::Lof(config) => {
                let mut lof = LocalOutlierFactor::new(config.clone());
                let timer = Timer::start("lof_fit");
                lof.fit(x)?;
                let elapsed_ms = timer.stop();
                // In-sample scores exclude each point from its own neighborhood
                let scores = lof.training_scores()?.clone();
                let fit = labelled(scores, lof.threshold());
                (TrainedModel::Lof(lof), fit, elapsed_ms)
            }
            DetectorConfig::TimeSeries(config) => {
                let series = data.to_series()?;
                let mut ts = TimeSeriesDetector::new(config.clone());
                let timer = Timer::start("timeseries_fit");
                let scores = ts.fit(&series)?;
                let elapsed_ms = timer.stop();
                methods_triggered = Some(MethodCounts::from_flags(scores.iter().map(|s| &s.methods)));
                let fit = AnomalyResult {
                    scores: scores.iter().map(|s| s.z()).collect(),
                    labels: scores
                        .iter()
                        .map(|s| if s.is_anomaly() { -1 } else { 1 })
                        .collect(),
                    threshold: config.z_threshold,
                    n_anomalies: scores.iter().filter(|s| s.is_anomaly()).count(),
                };
                (TrainedModel::TimeSeries(ts), fit, elapsed_ms)
            }
        };

        let mut report = self.build_report(data, &model, &fit, training_time_ms);
        report.methods_triggered = methods_triggered;

        info!(
            algorithm = %report.algorithm,
            n_samples = report.n_samples,
            n_features = report.n_features,
            anomalies = report.anomalies_detected,
            elapsed_ms = report.training_time_ms,
            "Detector trained"
        );

        self.model = Some(model);
        Ok(report)
    }

    fn build_report(
        &self,
        data: &FeatureMatrix,
        model: &TrainedModel,
        fit: &AnomalyResult,
        training_time_ms: f64,
    ) -> TrainingReport {
        let scores = fit.scores.to_vec();
        let mut report = TrainingReport {
            algorithm: self.algorithm(),
            n_samples: data.nrows(),
            n_features: data.ncols(),
            training_time_ms,
            contamination: self.config.contamination(),
            anomalies_detected: fit.n_anomalies,
            score_stats: ScoreStats::from_scores(&scores),
            threshold: fit.threshold,
            n_support_vectors: None,
            support_vector_ratio: None,
            mode: None,
            window_size: None,
            statistics: None,
            methods_triggered: None,
        };

        match model {
            TrainedModel::OneClassSvm(svm) => {
                report.n_support_vectors = Some(svm.n_support_vectors());
                report.support_vector_ratio = Some(svm.support_vector_ratio());
            }
            TrainedModel::Lof(lof) => {
                let mode = if lof.config().novelty { "novelty" } else { "outlier" };
                report.mode = Some(mode.to_string());
            }
            TrainedModel::TimeSeries(ts) => {
                report.window_size = Some(ts.config().window_size);
                report.statistics = ts.statistics().cloned();
            }
            TrainedModel::IsolationForest(_) => {}
        }

        report
    }

    /// Score every row of `data`.
    ///
    /// Batch algorithms leave the model unchanged. The time-series detector
    /// advances its rolling window by every scored value.
    pub fn predict(&mut self, data: &FeatureMatrix) -> Result<Vec<ScoreResult>> {
        let model = self.model.as_mut().ok_or(KolosalError::ModelNotTrained)?;
        if data.is_empty() {
            return Err(KolosalError::InvalidInput("prediction data has no rows".to_string()));
        }

        match model {
            TrainedModel::IsolationForest(m) => batch_results(&*m, data.as_array()),
            TrainedModel::OneClassSvm(m) => batch_results(&*m, data.as_array()),
            TrainedModel::Lof(m) => batch_results(&*m, data.as_array()),
            TrainedModel::TimeSeries(m) => {
                let series = data.to_series()?;
                let scores = m.score_series(&series)?;
                Ok(scores
                    .iter()
                    .enumerate()
                    .map(|(i, score)| ScoreResult::from_series(i, score))
                    .collect())
            }
        }
    }

    /// [`Detector::predict`] with timing and a summary
    pub fn predict_report(&mut self, data: &FeatureMatrix) -> Result<PredictionReport> {
        let timer = Timer::start("predict");
        let results = self.predict(data)?;
        let elapsed_ms = timer.stop();
        Ok(PredictionReport::new(self.algorithm(), results, elapsed_ms))
    }

    /// Persist to `path`; `.json` selects the JSON envelope
    pub fn save(&self, path: impl AsRef<Path>) -> Result<ModelHeader> {
        export::save_detector(self, path.as_ref())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        export::load_detector(path.as_ref())
    }
}

fn batch_results(detector: &dyn AnomalyDetector, x: &Array2<f64>) -> Result<Vec<ScoreResult>> {
    let result = detector.detect(x)?;
    Ok(result
        .scores
        .iter()
        .zip(result.labels.iter())
        .enumerate()
        .map(|(i, (&score, &label))| ScoreResult::new(i, score, label == -1))
        .collect())
}

fn labelled(scores: Array1<f64>, threshold: f64) -> AnomalyResult {
    let labels = scores.mapv(|s| if s < threshold { -1 } else { 1 });
    let n_anomalies = labels.iter().filter(|&&l| l == -1).count();
    AnomalyResult {
        scores,
        labels,
        threshold,
        n_anomalies,
    }
}
