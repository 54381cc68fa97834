//! Detector engine
//!
//! A closed set of four algorithms behind one [`Detector`] type. The
//! algorithm is chosen once, from an [`Algorithm`] tag, when the detector is
//! constructed; training replaces the fitted model wholesale.

mod detector;
mod report;

pub use detector::{Detector, TrainedModel};
pub use report::{PredictionReport, PredictionSummary, ScoreResult, TrainingReport};

use crate::anomaly::{
    validate_contamination, IsolationForestConfig, LofConfig, OneClassSvmConfig, TimeSeriesConfig,
};
use crate::error::{KolosalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Algorithm tag used by the protocol and the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "isolation_forest")]
    IsolationForest,
    #[serde(rename = "one_class_svm")]
    OneClassSvm,
    #[serde(rename = "lof", alias = "local_outlier_factor")]
    Lof,
    #[serde(rename = "timeseries")]
    TimeSeries,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::IsolationForest,
        Algorithm::OneClassSvm,
        Algorithm::Lof,
        Algorithm::TimeSeries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::IsolationForest => "isolation_forest",
            Algorithm::OneClassSvm => "one_class_svm",
            Algorithm::Lof => "lof",
            Algorithm::TimeSeries => "timeseries",
        }
    }

    /// Whether scoring advances detector state
    pub fn is_stateful(&self) -> bool {
        matches!(self, Algorithm::TimeSeries)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "isolation_forest" => Ok(Algorithm::IsolationForest),
            "one_class_svm" => Ok(Algorithm::OneClassSvm),
            "lof" | "local_outlier_factor" => Ok(Algorithm::Lof),
            "timeseries" => Ok(Algorithm::TimeSeries),
            other => Err(KolosalError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Hyperparameters for one algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetectorConfig {
    IsolationForest(IsolationForestConfig),
    OneClassSvm(OneClassSvmConfig),
    Lof(LofConfig),
    TimeSeries(TimeSeriesConfig),
}

impl DetectorConfig {
    /// Default hyperparameters for an algorithm
    pub fn default_for(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::IsolationForest => DetectorConfig::IsolationForest(IsolationForestConfig::default()),
            Algorithm::OneClassSvm => DetectorConfig::OneClassSvm(OneClassSvmConfig::default()),
            Algorithm::Lof => DetectorConfig::Lof(LofConfig::default()),
            Algorithm::TimeSeries => DetectorConfig::TimeSeries(TimeSeriesConfig::default()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            DetectorConfig::IsolationForest(_) => Algorithm::IsolationForest,
            DetectorConfig::OneClassSvm(_) => Algorithm::OneClassSvm,
            DetectorConfig::Lof(_) => Algorithm::Lof,
            DetectorConfig::TimeSeries(_) => Algorithm::TimeSeries,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            DetectorConfig::IsolationForest(c) => c.validate(),
            DetectorConfig::OneClassSvm(c) => c.validate(),
            DetectorConfig::Lof(c) => c.validate(),
            DetectorConfig::TimeSeries(c) => c.validate(),
        }
    }

    /// Set the expected anomaly fraction (ν for the one-class SVM).
    ///
    /// The fraction is checked against (0, 0.5] for every algorithm, including
    /// time series, which otherwise ignores it.
    pub fn with_contamination(mut self, contamination: f64) -> Result<Self> {
        validate_contamination(contamination)?;
        match &mut self {
            DetectorConfig::IsolationForest(c) => c.contamination = contamination,
            DetectorConfig::OneClassSvm(c) => c.nu = contamination,
            DetectorConfig::Lof(c) => c.contamination = contamination,
            DetectorConfig::TimeSeries(_) => {}
        }
        Ok(self)
    }

    /// Expected anomaly fraction; ν for the one-class SVM, none for time series
    pub fn contamination(&self) -> Option<f64> {
        match self {
            DetectorConfig::IsolationForest(c) => Some(c.contamination),
            DetectorConfig::OneClassSvm(c) => Some(c.nu),
            DetectorConfig::Lof(c) => Some(c.contamination),
            DetectorConfig::TimeSeries(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("lof".parse::<Algorithm>().unwrap(), Algorithm::Lof);
        assert_eq!(
            "local_outlier_factor".parse::<Algorithm>().unwrap(),
            Algorithm::Lof
        );
        assert_eq!(
            "timeseries".parse::<Algorithm>().unwrap(),
            Algorithm::TimeSeries
        );
        let err = "autoencoder".parse::<Algorithm>().unwrap_err();
        assert_eq!(err.kind(), "UnknownAlgorithm");
    }

    #[test]
    fn test_algorithm_serde_names() {
        for algorithm in Algorithm::ALL {
            let json = serde_json::to_string(&algorithm).unwrap();
            assert_eq!(json, format!("\"{}\"", algorithm.as_str()));
        }
        let alias: Algorithm = serde_json::from_str("\"local_outlier_factor\"").unwrap();
        assert_eq!(alias, Algorithm::Lof);
    }

    #[test]
    fn test_default_configs_validate() {
        for algorithm in Algorithm::ALL {
            let config = DetectorConfig::default_for(algorithm);
            assert_eq!(config.algorithm(), algorithm);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_with_contamination_checks_range() {
        for algorithm in Algorithm::ALL {
            let config = DetectorConfig::default_for(algorithm);
            assert_eq!(
                config.clone().with_contamination(0.9).unwrap_err().kind(),
                "InvalidConfig",
                "{}",
                algorithm
            );
            assert!(config.clone().with_contamination(-3.0).is_err());
            assert!(config.with_contamination(0.2).is_ok());
        }

        match DetectorConfig::default_for(Algorithm::OneClassSvm)
            .with_contamination(0.25)
            .unwrap()
        {
            DetectorConfig::OneClassSvm(c) => assert_eq!(c.nu, 0.25),
            other => panic!("unexpected config {:?}", other),
        }
    }
}
