//! Kolosal Anomaly - Anomaly detection engine
//!
//! This crate trains and applies four unsupervised detectors:
//! - Isolation forest
//! - One-class SVM (SMO-trained, linear/poly/rbf/sigmoid kernels)
//! - Local outlier factor
//! - Rolling z-score time-series detector
//!
//! # Modules
//!
//! ## Detection
//! - [`anomaly`] - Detector algorithms and the weighted ensemble
//! - [`engine`] - Algorithm selection, training and scoring reports
//!
//! ## Persistence
//! - [`export`] - Versioned, checksummed model files (binary or JSON)
//!
//! ## Services
//! - [`service`] - Line-oriented JSON request protocol with model sessions
//! - [`pipeline`] - Train-all batch pipeline and synthetic data
//! - [`cli`] - Command-line interface
//!
//! ## Utilities
//! - [`utils`] - Feature matrices, timers, worker pool sizing

// Core error handling
pub mod error;

// Detection
pub mod anomaly;
pub mod engine;

// Persistence
pub mod export;

// Services
pub mod service;
pub mod pipeline;
pub mod cli;

// Utilities
pub mod utils;

pub use error::{KolosalError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{KolosalError, Result};

    // Detectors
    pub use crate::anomaly::{
        AnomalyDetector, AnomalyResult, EnsembleDetector, EnsembleStrategy, IsolationForest,
        IsolationForestConfig, LocalOutlierFactor, LofConfig, OneClassSVM, OneClassSvmConfig,
        TimeSeriesConfig, TimeSeriesDetector,
    };

    // Engine
    pub use crate::engine::{
        Algorithm, Detector, DetectorConfig, PredictionReport, ScoreResult, TrainingReport,
    };

    // Persistence
    pub use crate::export::{load_detector, read_header, save_detector, ModelHeader, SerializationFormat};

    // Service
    pub use crate::service::{ScoringService, ServiceConfig};

    // Pipeline
    pub use crate::pipeline::{PipelineConfig, TrainingPipeline};

    // Utilities
    pub use crate::utils::FeatureMatrix;
}
