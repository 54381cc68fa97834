//! Isolation Forest anomaly detection

use crate::anomaly::{check_features, quantile, validate_contamination, AnomalyDetector};
use crate::error::{KolosalError, Result};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand::seq::index;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Default subsample size per tree when `max_samples` is unset
const DEFAULT_MAX_SAMPLES: usize = 256;

/// Batches smaller than this are scored on the calling thread
const PARALLEL_SCORE_ROWS: usize = 64;

/// Isolation Tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IsolationTree {
    /// Internal node with split
    Internal {
        /// Feature index for split
        feature: usize,
        /// Split threshold
        threshold: f64,
        /// Left subtree (values < threshold)
        left: Box<IsolationTree>,
        /// Right subtree (values >= threshold)
        right: Box<IsolationTree>,
    },
    /// External (leaf) node
    External {
        /// Number of samples in this node
        size: usize,
    },
}

impl IsolationTree {
    /// Build an isolation tree over the rows in `indices`
    pub fn build(
        x: &Array2<f64>,
        indices: &[usize],
        height: usize,
        max_height: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let n_samples = indices.len();

        if height >= max_height || n_samples <= 1 {
            return IsolationTree::External { size: n_samples };
        }

        let feature = rng.gen_range(0..x.ncols());

        let (min_val, max_val) = indices.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), &i| (lo.min(x[[i, feature]]), hi.max(x[[i, feature]])),
        );

        // Constant feature on this node: nothing left to isolate along it
        if max_val - min_val < 1e-12 {
            return IsolationTree::External { size: n_samples };
        }

        let threshold = rng.gen_range(min_val..max_val);

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, feature]] < threshold);

        if left_indices.is_empty() || right_indices.is_empty() {
            return IsolationTree::External { size: n_samples };
        }

        let left = Box::new(Self::build(x, &left_indices, height + 1, max_height, rng));
        let right = Box::new(Self::build(x, &right_indices, height + 1, max_height, rng));

        IsolationTree::Internal {
            feature,
            threshold,
            left,
            right,
        }
    }

    /// Path length for a sample, with the c(size) correction at leaves
    pub fn path_length(&self, sample: &ArrayView1<f64>) -> f64 {
        let mut node = self;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationTree::External { size } => return depth as f64 + average_path_length(*size),
                IsolationTree::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold { &**left } else { &**right };
                    depth += 1;
                }
            }
        }
    }

    /// Number of nodes, used in debug logging
    pub fn node_count(&self) -> usize {
        match self {
            IsolationTree::External { .. } => 1,
            IsolationTree::Internal { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
///
/// c(n) = 2H(n-1) - 2(n-1)/n with H(i) ≈ ln(i) + γ
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n_f = n as f64;
            2.0 * ((n_f - 1.0).ln() + EULER_GAMMA) - 2.0 * (n_f - 1.0) / n_f
        }
    }
}

/// Isolation Forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestConfig {
    /// Number of trees
    pub n_estimators: usize,
    /// Rows drawn per tree; `None` means min(256, n_samples)
    pub max_samples: Option<usize>,
    /// Expected proportion of outliers in the training data
    pub contamination: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: None,
            contamination: 0.1,
            seed: 42,
        }
    }
}

impl IsolationForestConfig {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = Some(n);
        self
    }

    pub fn with_contamination(mut self, c: f64) -> Self {
        self.contamination = c;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_contamination(self.contamination)?;
        if self.n_estimators == 0 {
            return Err(KolosalError::invalid_config(
                "n_estimators",
                self.n_estimators,
                "must be at least 1",
            ));
        }
        if self.max_samples == Some(0) {
            return Err(KolosalError::invalid_config("max_samples", 0, "must be at least 1"));
        }
        Ok(())
    }
}

/// Isolation Forest anomaly detector.
///
/// `score_samples` returns `-2^(-E[h(x)] / c(ψ))`, which lies in [-1, 0]:
/// values near -1 isolate quickly and are anomalous, values near -0.5 and
/// above sit in the bulk of the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    config: IsolationForestConfig,
    /// Fitted trees
    trees: Option<Vec<IsolationTree>>,
    /// Decision threshold
    threshold: Option<f64>,
    /// Subsample size ψ used for fitting
    sample_size: Option<usize>,
    n_features: Option<usize>,
}

impl IsolationForest {
    /// Create new Isolation Forest
    pub fn new(config: IsolationForestConfig) -> Self {
        Self {
            config,
            trees: None,
            threshold: None,
            sample_size: None,
            n_features: None,
        }
    }

    pub fn config(&self) -> &IsolationForestConfig {
        &self.config
    }

    /// Subsample size used for each tree
    pub fn sample_size(&self) -> Option<usize> {
        self.sample_size
    }

    pub fn n_trees(&self) -> usize {
        self.trees.as_ref().map_or(0, Vec::len)
    }

    fn score_row(trees: &[IsolationTree], c_n: f64, row: ArrayView1<f64>) -> f64 {
        let avg_path_length =
            trees.iter().map(|tree| tree.path_length(&row)).sum::<f64>() / trees.len() as f64;
        -(2.0_f64.powf(-avg_path_length / c_n))
    }

    fn compute_scores(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let trees = self.trees.as_ref().ok_or(KolosalError::ModelNotTrained)?;
        check_features(self.n_features, x)?;

        // c(ψ) is zero for ψ = 1; every path is then zero and the score is -1
        let c_n = average_path_length(self.sample_size.unwrap_or(DEFAULT_MAX_SAMPLES)).max(f64::EPSILON);

        let scores: Vec<f64> = if x.nrows() < PARALLEL_SCORE_ROWS {
            x.rows()
                .into_iter()
                .map(|row| Self::score_row(trees, c_n, row))
                .collect()
        } else {
            x.axis_iter(Axis(0))
                .into_par_iter()
                .map(|row| Self::score_row(trees, c_n, row))
                .collect()
        };

        Ok(Array1::from_vec(scores))
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(IsolationForestConfig::default())
    }
}

impl AnomalyDetector for IsolationForest {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        self.config.validate()?;
        let n_samples = x.nrows();
        if n_samples == 0 {
            return Err(KolosalError::InvalidInput("training data has no rows".to_string()));
        }

        let samples_per_tree = self
            .config
            .max_samples
            .unwrap_or(DEFAULT_MAX_SAMPLES)
            .min(n_samples);
        let max_height = (samples_per_tree as f64).log2().ceil().max(1.0) as usize;

        // One independent stream per tree keeps the forest deterministic under parallel build
        let mut seeder = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
        let tree_seeds: Vec<u64> = (0..self.config.n_estimators).map(|_| seeder.gen()).collect();

        let trees: Vec<IsolationTree> = tree_seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                let indices = index::sample(&mut rng, n_samples, samples_per_tree).into_vec();
                IsolationTree::build(x, &indices, 0, max_height, &mut rng)
            })
            .collect();

        debug!(
            n_trees = trees.len(),
            samples_per_tree,
            max_height,
            nodes = trees.iter().map(IsolationTree::node_count).sum::<usize>(),
            "Isolation forest built"
        );

        self.trees = Some(trees);
        self.sample_size = Some(samples_per_tree);
        self.n_features = Some(x.ncols());

        let scores = self.compute_scores(x)?;
        let scores = scores.to_vec();
        self.threshold = Some(quantile(&scores, self.config.contamination));

        Ok(())
    }

    fn score_samples(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.compute_scores(x)
    }

    fn threshold(&self) -> f64 {
        self.threshold.unwrap_or(-0.5)
    }

    fn is_fitted(&self) -> bool {
        self.trees.is_some()
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_with_outliers() -> Array2<f64> {
        let mut data = Vec::new();
        for i in 0..50 {
            data.push((i % 10) as f64);
            data.push(((i % 10) + 1) as f64);
        }
        data.extend_from_slice(&[100.0, 100.0]);
        data.extend_from_slice(&[-50.0, -50.0]);
        Array2::from_shape_vec((52, 2), data).unwrap()
    }

    #[test]
    fn test_isolation_forest_basic() {
        let x = clustered_with_outliers();

        let mut iforest = IsolationForest::new(
            IsolationForestConfig::default()
                .with_n_estimators(50)
                .with_contamination(0.05),
        );
        iforest.fit(&x).unwrap();

        let scores = iforest.score_samples(&x).unwrap();
        let labels = iforest.predict(&x).unwrap();

        // Outliers isolate faster, so their scores are lower
        assert!(scores[50] < scores[0]);
        assert!(scores[51] < scores[0]);
        assert!(scores.iter().all(|&s| (-1.0..=0.0).contains(&s)));

        assert_eq!(labels[50], -1);
        assert_eq!(labels[51], -1);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let x = clustered_with_outliers();
        let mut a = IsolationForest::default();
        let mut b = IsolationForest::default();
        a.fit(&x).unwrap();
        b.fit(&x).unwrap();
        assert_eq!(a.score_samples(&x).unwrap(), b.score_samples(&x).unwrap());
    }

    #[test]
    fn test_isolation_tree_path_length() {
        let x = Array2::from_shape_vec(
            (10, 2),
            vec![
                1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 5.0, 5.0,
                6.0, 6.0, 7.0, 7.0, 8.0, 8.0, 9.0, 9.0, 10.0, 10.0,
            ],
        )
        .unwrap();

        let indices: Vec<usize> = (0..10).collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let tree = IsolationTree::build(&x, &indices, 0, 10, &mut rng);

        let sample = Array1::from_vec(vec![5.0, 5.0]);
        assert!(tree.path_length(&sample.view()) > 0.0);
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) ≈ 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.05);
    }

    #[test]
    fn test_constant_data_is_not_an_error() {
        let x = Array2::from_elem((20, 3), 1.0);
        let mut iforest = IsolationForest::default();
        iforest.fit(&x).unwrap();
        let scores = iforest.score_samples(&x).unwrap();
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_unfitted_and_mismatch() {
        let iforest = IsolationForest::default();
        let x = Array2::<f64>::zeros((2, 2));
        assert!(matches!(iforest.score_samples(&x), Err(KolosalError::ModelNotTrained)));

        let mut iforest = IsolationForest::default();
        iforest.fit(&clustered_with_outliers()).unwrap();
        let wide = Array2::<f64>::zeros((2, 5));
        assert!(matches!(
            iforest.score_samples(&wide),
            Err(KolosalError::DimensionMismatch { expected: 2, actual: 5 })
        ));
    }

    #[test]
    fn test_invalid_config() {
        let mut iforest = IsolationForest::new(IsolationForestConfig::default().with_n_estimators(0));
        let err = iforest.fit(&clustered_with_outliers()).unwrap_err();
        assert_eq!(err.kind(), "InvalidConfig");
    }
}
