//! Batch training pipeline
//!
//! Trains every applicable algorithm on one dataset, holding out the tail
//! of the rows for validation, and writes each model to an output directory.

mod synthetic;

pub use synthetic::{generate as generate_synthetic, SyntheticData};

use crate::anomaly::validate_contamination;
use crate::engine::{Algorithm, Detector, DetectorConfig, TrainingReport};
use crate::error::{KolosalError, Result};
use crate::export::SerializationFormat;
use crate::utils::FeatureMatrix;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    /// Applied to every algorithm (ν for the one-class SVM)
    pub contamination: f64,
    /// Fraction of rows, taken from the end, held out for validation
    pub validation_split: f64,
    pub format: SerializationFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./models"),
            contamination: 0.1,
            validation_split: 0.2,
            format: SerializationFormat::Binary,
        }
    }
}

impl PipelineConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn with_validation_split(mut self, split: f64) -> Self {
        self.validation_split = split;
        self
    }

    pub fn with_format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_contamination(self.contamination)?;
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(KolosalError::invalid_config(
                "validation_split",
                self.validation_split,
                "must be in [0, 1)",
            ));
        }
        Ok(())
    }

    /// File a model of `algorithm` is written to
    pub fn model_path(&self, algorithm: Algorithm) -> PathBuf {
        let extension = match self.format {
            SerializationFormat::Binary => "bin",
            SerializationFormat::Json => "json",
        };
        self.output_dir
            .join(format!("{}.{}", algorithm.as_str(), extension))
    }
}

/// Held-out behaviour of one trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub n_samples: usize,
    pub anomaly_rate: f64,
    pub mean_score: f64,
}

/// One algorithm that trained successfully
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmOutcome {
    pub model_path: PathBuf,
    pub training: TrainingReport,
    /// `None` when the validation split is empty
    pub validation: Option<ValidationSummary>,
}

/// One algorithm that failed to train
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmFailure {
    pub algorithm: Algorithm,
    pub error_kind: String,
    pub message: String,
}

/// Result of [`TrainingPipeline::train_all`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub output_dir: PathBuf,
    pub n_train_samples: usize,
    pub n_val_samples: usize,
    pub contamination: f64,
    pub results: Vec<AlgorithmOutcome>,
    pub failures: Vec<AlgorithmFailure>,
}

pub struct TrainingPipeline {
    config: PipelineConfig,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Algorithms that accept data of this width; time series needs one column
    pub fn applicable_algorithms(n_features: usize) -> Vec<Algorithm> {
        Algorithm::ALL
            .into_iter()
            .filter(|a| *a != Algorithm::TimeSeries || n_features == 1)
            .collect()
    }

    /// Train, persist and validate every applicable algorithm.
    ///
    /// A failing algorithm is recorded in `failures` and does not stop the others.
    pub fn train_all(&self, data: &FeatureMatrix) -> Result<PipelineReport> {
        self.config.validate()?;
        if data.is_empty() {
            return Err(KolosalError::InvalidInput("training data has no rows".to_string()));
        }

        let split_at = (data.nrows() as f64 * (1.0 - self.config.validation_split)) as usize;
        let (train, validation) = data.split_rows(split_at.max(1));
        info!(
            n_train = train.nrows(),
            n_val = validation.nrows(),
            output_dir = %self.config.output_dir.display(),
            "Training all algorithms"
        );

        let mut results = Vec::new();
        let mut failures = Vec::new();

        for algorithm in Self::applicable_algorithms(data.ncols()) {
            let outcome = DetectorConfig::default_for(algorithm)
                .with_contamination(self.config.contamination)
                .and_then(|config| self.train_one(config, &train, &validation));
            match outcome {
                Ok(outcome) => results.push(outcome),
                Err(e) => {
                    warn!(algorithm = %algorithm, error = %e, "Algorithm failed to train");
                    failures.push(AlgorithmFailure {
                        algorithm,
                        error_kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(PipelineReport {
            output_dir: self.config.output_dir.clone(),
            n_train_samples: train.nrows(),
            n_val_samples: validation.nrows(),
            contamination: self.config.contamination,
            results,
            failures,
        })
    }

    /// Train one detector on all of `data` and save it
    pub fn train_single(&self, config: DetectorConfig, data: &FeatureMatrix) -> Result<AlgorithmOutcome> {
        let empty = FeatureMatrix::new(ndarray::Array2::zeros((0, data.ncols())))?;
        self.train_one(config, data, &empty)
    }

    fn train_one(
        &self,
        config: DetectorConfig,
        train: &FeatureMatrix,
        validation: &FeatureMatrix,
    ) -> Result<AlgorithmOutcome> {
        let algorithm = config.algorithm();
        let mut detector = Detector::new(config)?;
        let training = detector.train(train)?;

        let model_path = self.config.model_path(algorithm);
        detector.save(&model_path)?;

        let validation = if validation.is_empty() {
            None
        } else {
            let report = detector.predict_report(validation)?;
            Some(ValidationSummary {
                n_samples: report.n_samples,
                anomaly_rate: report.summary.anomaly_rate,
                mean_score: report.summary.mean_score,
            })
        };

        Ok(AlgorithmOutcome {
            model_path,
            training,
            validation,
        })
    }
}

/// Write a pipeline report as pretty JSON
pub fn write_report(report: &PipelineReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applicable_algorithms() {
        assert_eq!(TrainingPipeline::applicable_algorithms(1).len(), 4);
        assert!(!TrainingPipeline::applicable_algorithms(3).contains(&Algorithm::TimeSeries));
    }

    #[test]
    fn test_model_path() {
        let config = PipelineConfig::default()
            .with_output_dir("/tmp/out")
            .with_format(SerializationFormat::Json);
        assert_eq!(
            config.model_path(Algorithm::Lof),
            PathBuf::from("/tmp/out/lof.json")
        );
    }

    #[test]
    fn test_invalid_split() {
        let pipeline = TrainingPipeline::new(PipelineConfig::default().with_validation_split(1.0));
        let data = generate_synthetic(20, 2, 0.1, 1).unwrap().data;
        assert_eq!(pipeline.train_all(&data).unwrap_err().kind(), "InvalidConfig");
    }

    #[test]
    fn test_invalid_contamination() {
        let data = generate_synthetic(20, 1, 0.1, 1).unwrap().data;
        for contamination in [0.9, -3.0] {
            let pipeline =
                TrainingPipeline::new(PipelineConfig::default().with_contamination(contamination));
            assert_eq!(pipeline.train_all(&data).unwrap_err().kind(), "InvalidConfig");
        }
    }
}
