//! Synthetic datasets with planted anomalies

use crate::error::{KolosalError, Result};
use crate::utils::FeatureMatrix;
use ndarray::Array2;
use rand::prelude::*;
use rand_distr::{Normal, StandardNormal};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Mean of the planted anomaly cluster
const ANOMALY_SHIFT: f64 = 5.0;
/// Spread of the planted anomaly cluster
const ANOMALY_SCALE: f64 = 3.0;

/// Generated data with ground-truth labels
#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub data: FeatureMatrix,
    /// `true` for planted anomalies
    pub labels: Vec<bool>,
}

impl SyntheticData {
    pub fn n_anomalies(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }
}

/// N(0, 1) inliers plus N(5, 3²) anomalies, shuffled.
///
/// `⌊n_samples · (1 - contamination)⌋` rows are inliers.
pub fn generate(
    n_samples: usize,
    n_features: usize,
    contamination: f64,
    seed: u64,
) -> Result<SyntheticData> {
    if n_samples == 0 || n_features == 0 {
        return Err(KolosalError::InvalidInput(
            "synthetic data needs at least one sample and one feature".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&contamination) {
        return Err(KolosalError::invalid_config(
            "contamination",
            contamination,
            "must be in [0, 1)",
        ));
    }

    let anomalous_dist = Normal::new(ANOMALY_SHIFT, ANOMALY_SCALE).map_err(|e| {
        KolosalError::InvalidInput(format!("anomaly distribution: {}", e))
    })?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let n_normal = (n_samples as f64 * (1.0 - contamination)) as usize;

    let mut labels: Vec<bool> = (0..n_samples).map(|i| i >= n_normal).collect();
    labels.shuffle(&mut rng);

    let mut data = Array2::zeros((n_samples, n_features));
    for (mut row, &anomalous) in data.rows_mut().into_iter().zip(&labels) {
        for value in row.iter_mut() {
            *value = if anomalous {
                rng.sample(anomalous_dist)
            } else {
                rng.sample(StandardNormal)
            };
        }
    }

    Ok(SyntheticData {
        data: FeatureMatrix::new(data)?,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_labels() {
        let synthetic = generate(200, 4, 0.1, 7).unwrap();
        assert_eq!(synthetic.data.nrows(), 200);
        assert_eq!(synthetic.data.ncols(), 4);
        assert_eq!(synthetic.n_anomalies(), 20);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = generate(50, 3, 0.2, 11).unwrap();
        let b = generate(50, 3, 0.2, 11).unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_cluster_moments() {
        let synthetic = generate(20_000, 1, 0.5, 1).unwrap();
        let (mut inliers, mut planted) = (Vec::new(), Vec::new());
        for (row, &anomalous) in synthetic.data.as_array().rows().into_iter().zip(&synthetic.labels) {
            if anomalous {
                planted.push(row[0]);
            } else {
                inliers.push(row[0]);
            }
        }

        let moments = |xs: &[f64]| {
            let mean = xs.iter().sum::<f64>() / xs.len() as f64;
            let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
            (mean, var.sqrt())
        };
        let (mean, std) = moments(&inliers);
        assert!(mean.abs() < 0.05 && (std - 1.0).abs() < 0.05);
        let (mean, std) = moments(&planted);
        assert!((mean - ANOMALY_SHIFT).abs() < 0.15 && (std - ANOMALY_SCALE).abs() < 0.15);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(generate(0, 3, 0.1, 1).is_err());
        assert!(generate(10, 3, 1.0, 1).is_err());
    }
}
