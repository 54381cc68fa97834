//! Local Outlier Factor (LOF) anomaly detection

use crate::anomaly::{check_features, quantile, validate_contamination, AnomalyDetector};
use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Added to reachability sums so duplicated points keep a finite density
const DENSITY_EPSILON: f64 = 1e-10;

/// Ordered float for priority queue
#[derive(Debug, Clone, Copy)]
struct OrderedFloat(f64, usize);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        // Natural ordering for max-heap: peek() returns largest distance
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Per-point LOF details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LOFResult {
    /// LOF ratios for each point (≈1 inlier, >1 sparser than its neighbors)
    pub lof_scores: Array1<f64>,
    /// k-distances for each point
    pub k_distances: Array1<f64>,
    /// Local reachability densities
    pub lrd: Array1<f64>,
}

/// LOF hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LofConfig {
    /// Number of neighbors
    pub n_neighbors: usize,
    /// Contamination ratio
    pub contamination: f64,
    /// Score new data against the training set (true) or only the training set itself (false)
    pub novelty: bool,
}

impl Default for LofConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 20,
            contamination: 0.1,
            novelty: true,
        }
    }
}

impl LofConfig {
    pub fn with_n_neighbors(mut self, k: usize) -> Self {
        self.n_neighbors = k;
        self
    }

    pub fn with_contamination(mut self, c: f64) -> Self {
        self.contamination = c;
        self
    }

    pub fn with_novelty(mut self, novelty: bool) -> Self {
        self.novelty = novelty;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_contamination(self.contamination)?;
        if self.n_neighbors == 0 {
            return Err(KolosalError::invalid_config("n_neighbors", 0, "must be at least 1"));
        }
        Ok(())
    }
}

/// Local Outlier Factor anomaly detector.
///
/// `score_samples` returns the negated LOF, so inliers sit near -1 and
/// points in sparse regions go increasingly negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    config: LofConfig,
    /// Neighbor count actually used (bounded by n_samples - 1)
    k: usize,
    /// Training data
    x_train: Option<Array2<f64>>,
    /// Precomputed k-distances
    k_distances: Option<Array1<f64>>,
    /// Precomputed LRD values
    lrd: Option<Array1<f64>>,
    /// Negated LOF of every training point
    training_scores: Option<Array1<f64>>,
    /// Decision threshold
    threshold: Option<f64>,
}

impl LocalOutlierFactor {
    /// Create new LOF detector
    pub fn new(config: LofConfig) -> Self {
        Self {
            k: config.n_neighbors.max(1),
            config,
            x_train: None,
            k_distances: None,
            lrd: None,
            training_scores: None,
            threshold: None,
        }
    }

    pub fn config(&self) -> &LofConfig {
        &self.config
    }

    /// In-sample scores computed at fit time (the only scores outlier mode produces)
    pub fn training_scores(&self) -> Result<&Array1<f64>> {
        self.training_scores.as_ref().ok_or(KolosalError::ModelNotTrained)
    }

    /// Euclidean distance between two points
    fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Find k nearest neighbors and their distances
    fn k_nearest_neighbors(
        point: &ArrayView1<f64>,
        data: &Array2<f64>,
        k: usize,
        exclude_self: Option<usize>,
    ) -> Vec<(usize, f64)> {
        let mut heap: BinaryHeap<OrderedFloat> = BinaryHeap::with_capacity(k + 1);

        for (i, row) in data.rows().into_iter().enumerate() {
            if Some(i) == exclude_self {
                continue;
            }

            let dist = Self::euclidean_distance(point, &row);

            if heap.len() < k {
                heap.push(OrderedFloat(dist, i));
            } else if let Some(&OrderedFloat(max_dist, _)) = heap.peek() {
                if dist < max_dist {
                    heap.pop();
                    heap.push(OrderedFloat(dist, i));
                }
            }
        }

        heap.into_iter().map(|OrderedFloat(d, i)| (i, d)).collect()
    }

    /// Distance to the k-th nearest neighbor
    fn k_distance(neighbors: &[(usize, f64)]) -> f64 {
        neighbors.iter().map(|(_, d)| *d).fold(0.0, f64::max)
    }

    /// Local reachability density from reach-dist(p, o) = max(k-dist(o), d(p, o))
    fn compute_lrd(neighbors: &[(usize, f64)], k_distances: &Array1<f64>) -> f64 {
        if neighbors.is_empty() {
            return 0.0;
        }

        let mean_reach = neighbors
            .iter()
            .map(|&(idx, dist)| k_distances[idx].max(dist))
            .sum::<f64>()
            / neighbors.len() as f64;

        1.0 / (mean_reach + DENSITY_EPSILON)
    }

    /// Mean ratio of neighbor density to the point's own density
    fn compute_lof_single(lrd_point: f64, neighbors: &[(usize, f64)], lrd_values: &Array1<f64>) -> f64 {
        if neighbors.is_empty() || lrd_point == 0.0 {
            return 1.0;
        }

        let sum_lrd_ratio: f64 = neighbors
            .iter()
            .map(|&(idx, _)| lrd_values[idx] / lrd_point)
            .sum();

        sum_lrd_ratio / neighbors.len() as f64
    }

    /// Get detailed LOF results for new points scored against the training set
    pub fn compute_lof_details(&self, x: &Array2<f64>) -> Result<LOFResult> {
        let (x_train, train_k_distances, train_lrd) =
            match (&self.x_train, &self.k_distances, &self.lrd) {
                (Some(x_train), Some(k_distances), Some(lrd)) => (x_train, k_distances, lrd),
                _ => return Err(KolosalError::ModelNotTrained),
            };
        check_features(Some(x_train.ncols()), x)?;

        let k = self.k;
        let per_point: Vec<(f64, f64, f64)> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let point = x.row(i);
                let neighbors = Self::k_nearest_neighbors(&point, x_train, k, None);
                let k_dist = Self::k_distance(&neighbors);
                let lrd = Self::compute_lrd(&neighbors, train_k_distances);
                let lof = Self::compute_lof_single(lrd, &neighbors, train_lrd);
                (lof, k_dist, lrd)
            })
            .collect();

        Ok(LOFResult {
            lof_scores: per_point.iter().map(|p| p.0).collect(),
            k_distances: per_point.iter().map(|p| p.1).collect(),
            lrd: per_point.iter().map(|p| p.2).collect(),
        })
    }
}

impl Default for LocalOutlierFactor {
    fn default() -> Self {
        Self::new(LofConfig::default())
    }
}

impl AnomalyDetector for LocalOutlierFactor {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        self.config.validate()?;
        let n = x.nrows();
        if n < 2 {
            return Err(KolosalError::InvalidInput(format!(
                "local outlier factor needs at least 2 samples, got {}",
                n
            )));
        }
        let k = self.config.n_neighbors.min(n - 1).max(1);

        // Neighborhoods of every training point, excluding the point itself
        let all_neighbors: Vec<Vec<(usize, f64)>> = (0..n)
            .into_par_iter()
            .map(|i| Self::k_nearest_neighbors(&x.row(i), x, k, Some(i)))
            .collect();

        let k_distances: Array1<f64> = all_neighbors.iter().map(|nb| Self::k_distance(nb)).collect();

        let lrd: Array1<f64> = all_neighbors
            .par_iter()
            .map(|nb| Self::compute_lrd(nb, &k_distances))
            .collect::<Vec<f64>>()
            .into();

        let training_scores: Array1<f64> = all_neighbors
            .iter()
            .enumerate()
            .map(|(i, nb)| -Self::compute_lof_single(lrd[i], nb, &lrd))
            .collect();

        let threshold = quantile(&training_scores.to_vec(), self.config.contamination);

        self.k = k;
        self.threshold = Some(threshold);
        self.x_train = Some(x.clone());
        self.k_distances = Some(k_distances);
        self.lrd = Some(lrd);
        self.training_scores = Some(training_scores);

        Ok(())
    }

    fn score_samples(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.config.novelty {
            return Err(KolosalError::InvalidInput(
                "local outlier factor in outlier mode scores the training set only; \
                 train with novelty enabled to score new data"
                    .to_string(),
            ));
        }
        let result = self.compute_lof_details(x)?;
        Ok(result.lof_scores.mapv(|lof| -lof))
    }

    fn threshold(&self) -> f64 {
        self.threshold.unwrap_or(-1.5)
    }

    fn is_fitted(&self) -> bool {
        self.x_train.is_some()
    }

    fn n_features(&self) -> Option<usize> {
        self.x_train.as_ref().map(|x| x.ncols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Array2<f64> {
        let mut data = Vec::new();
        for i in 0..10 {
            data.push((i % 5) as f64);
            data.push(((i % 5) + 1) as f64);
        }
        data.extend_from_slice(&[50.0, 50.0]);
        Array2::from_shape_vec((11, 2), data).unwrap()
    }

    #[test]
    fn test_lof_basic() {
        let x = cluster_with_outlier();
        let mut lof = LocalOutlierFactor::new(LofConfig::default().with_n_neighbors(3));
        lof.fit(&x).unwrap();

        let scores = lof.training_scores().unwrap();
        let outlier_score = scores[10];
        let normal_avg: f64 = scores.iter().take(10).sum::<f64>() / 10.0;

        // Negated LOF: the isolated point is far more negative
        assert!(outlier_score < normal_avg);
    }

    #[test]
    fn test_lof_prediction() {
        let mut data = Vec::new();
        for i in 0..15 {
            data.push((i % 6) as f64);
            data.push(((i + 1) % 6) as f64);
        }
        data.extend_from_slice(&[100.0, 100.0]);
        data.extend_from_slice(&[-100.0, -100.0]);
        let x = Array2::from_shape_vec((17, 2), data).unwrap();

        let mut lof = LocalOutlierFactor::new(
            LofConfig::default().with_n_neighbors(5).with_contamination(0.15),
        );
        let labels = lof.fit_predict(&x).unwrap();

        assert_eq!(labels[15], -1);
        assert_eq!(labels[16], -1);
    }

    #[test]
    fn test_novelty_scores_new_points() {
        let x = cluster_with_outlier();
        let mut lof = LocalOutlierFactor::new(LofConfig::default().with_n_neighbors(3));
        lof.fit(&x).unwrap();

        let queries = Array2::from_shape_vec((2, 2), vec![2.0, 3.0, -40.0, 80.0]).unwrap();
        let labels = lof.predict(&queries).unwrap();
        assert_eq!(labels[0], 1);
        assert_eq!(labels[1], -1);
    }

    #[test]
    fn test_outlier_mode_rejects_new_data() {
        let x = cluster_with_outlier();
        let mut lof = LocalOutlierFactor::new(
            LofConfig::default().with_n_neighbors(3).with_novelty(false),
        );
        lof.fit(&x).unwrap();

        assert_eq!(lof.training_scores().unwrap().len(), 11);
        let err = lof.score_samples(&x).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn test_duplicate_points_stay_finite() {
        let x = Array2::from_elem((8, 2), 3.0);
        let mut lof = LocalOutlierFactor::default();
        lof.fit(&x).unwrap();
        assert!(lof.training_scores().unwrap().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_single_sample_rejected() {
        let x = Array2::from_elem((1, 2), 3.0);
        let mut lof = LocalOutlierFactor::default();
        assert_eq!(lof.fit(&x).unwrap_err().kind(), "InvalidInput");
    }
}
