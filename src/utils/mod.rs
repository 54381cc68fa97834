//! Utility functions and types

pub mod matrix;
mod metrics;
mod parallel;

pub use matrix::FeatureMatrix;
pub use metrics::{ScoreStats, Timer};
pub use parallel::ParallelConfig;
