//! Ensemble combinator over batch anomaly detectors

use crate::anomaly::AnomalyDetector;
use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::info;

/// How member verdicts are combined
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnsembleStrategy {
    /// Weighted share of members flagging the sample, compared to the vote threshold
    Voting,
    /// Weighted mean of member margins; anomaly when positive
    Average,
    /// Largest member margin; anomaly when positive
    Max,
}

impl Default for EnsembleStrategy {
    fn default() -> Self {
        EnsembleStrategy::Voting
    }
}

/// Combined verdict for one sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleVerdict {
    pub index: usize,
    pub is_anomaly: bool,
    pub confidence: f64,
    /// Per-member anomaly flags
    pub votes: Vec<bool>,
    /// Per-member raw scores
    pub scores: Vec<f64>,
    /// Fraction of members flagging the sample (unweighted)
    pub agreement: f64,
}

/// Weighted ensemble of batch detectors.
///
/// Members keep their own score scales, so `Average` and `Max` combine the
/// margin `threshold - score` of each member, which is positive exactly when
/// that member flags the sample.
pub struct EnsembleDetector {
    members: Vec<Box<dyn AnomalyDetector>>,
    weights: Vec<f64>,
    strategy: EnsembleStrategy,
    vote_threshold: f64,
}

impl EnsembleDetector {
    pub fn new(strategy: EnsembleStrategy) -> Self {
        Self {
            members: Vec::new(),
            weights: Vec::new(),
            strategy,
            vote_threshold: 0.5,
        }
    }

    pub fn with_vote_threshold(mut self, threshold: f64) -> Self {
        self.vote_threshold = threshold;
        self
    }

    pub fn add_detector(&mut self, detector: Box<dyn AnomalyDetector>, weight: f64) -> Result<()> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(KolosalError::invalid_config("weight", weight, "must be positive"));
        }
        self.members.push(detector);
        self.weights.push(weight);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn strategy(&self) -> EnsembleStrategy {
        self.strategy
    }

    /// Weights normalised to sum to one
    pub fn normalized_weights(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().sum();
        if total <= 0.0 {
            return self.weights.clone();
        }
        self.weights.iter().map(|w| w / total).collect()
    }

    /// Fit every member on the same data
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        if self.members.is_empty() {
            return Err(KolosalError::InvalidInput("ensemble has no detectors".to_string()));
        }
        for member in self.members.iter_mut() {
            member.fit(x)?;
        }
        info!(
            n_detectors = self.members.len(),
            n_samples = x.nrows(),
            strategy = ?self.strategy,
            "Ensemble fitted"
        );
        Ok(())
    }

    pub fn detect(&self, x: &Array2<f64>) -> Result<Vec<EnsembleVerdict>> {
        if self.members.is_empty() {
            return Err(KolosalError::InvalidInput("ensemble has no detectors".to_string()));
        }

        let member_results: Vec<(Array1<f64>, f64)> = self
            .members
            .iter()
            .map(|m| Ok((m.score_samples(x)?, m.threshold())))
            .collect::<Result<_>>()?;

        let weights = self.normalized_weights();
        let n_members = self.members.len() as f64;

        let verdicts = (0..x.nrows())
            .map(|i| {
                let scores: Vec<f64> = member_results.iter().map(|(s, _)| s[i]).collect();
                let margins: Vec<f64> = member_results.iter().map(|(s, t)| t - s[i]).collect();
                let votes: Vec<bool> = margins.iter().map(|&m| m > 0.0).collect();

                let (is_anomaly, confidence) = match self.strategy {
                    EnsembleStrategy::Voting => {
                        let weighted: f64 = votes
                            .iter()
                            .zip(&weights)
                            .filter(|(&v, _)| v)
                            .map(|(_, w)| w)
                            .sum();
                        (weighted > self.vote_threshold, weighted)
                    }
                    EnsembleStrategy::Average => {
                        let mean: f64 = margins.iter().zip(&weights).map(|(m, w)| m * w).sum();
                        (mean > 0.0, mean.abs())
                    }
                    EnsembleStrategy::Max => {
                        let max = margins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        (max > 0.0, max.abs())
                    }
                };

                let agreement = votes.iter().filter(|&&v| v).count() as f64 / n_members;

                EnsembleVerdict {
                    index: i,
                    is_anomaly,
                    confidence,
                    votes,
                    scores,
                    agreement,
                }
            })
            .collect();

        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{IsolationForest, IsolationForestConfig, LocalOutlierFactor, LofConfig};
    use rand::prelude::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn cluster(n: usize, seed: u64) -> Array2<f64> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        Array2::from_shape_fn((n, 3), |_| rng.gen_range(-1.0..1.0))
    }

    fn ensemble(strategy: EnsembleStrategy) -> EnsembleDetector {
        let mut ensemble = EnsembleDetector::new(strategy);
        ensemble
            .add_detector(
                Box::new(IsolationForest::new(IsolationForestConfig::default().with_n_estimators(50))),
                1.0,
            )
            .unwrap();
        ensemble
            .add_detector(Box::new(LocalOutlierFactor::new(LofConfig::default())), 1.0)
            .unwrap();
        ensemble
    }

    #[test]
    fn test_all_strategies_flag_far_point() {
        let x = cluster(200, 3);
        let far = Array2::from_shape_vec((1, 3), vec![15.0, -15.0, 15.0]).unwrap();

        for strategy in [EnsembleStrategy::Voting, EnsembleStrategy::Average, EnsembleStrategy::Max] {
            let mut detector = ensemble(strategy).with_vote_threshold(0.4);
            detector.fit(&x).unwrap();
            let verdicts = detector.detect(&far).unwrap();
            assert!(verdicts[0].is_anomaly, "{:?} missed the outlier", strategy);
            assert_eq!(verdicts[0].votes, vec![true, true]);
            assert_eq!(verdicts[0].agreement, 1.0);
        }
    }

    #[test]
    fn test_weights_are_normalized() {
        let detector = ensemble(EnsembleStrategy::Voting);
        assert_eq!(detector.normalized_weights(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_empty_ensemble() {
        let mut detector = EnsembleDetector::new(EnsembleStrategy::Max);
        assert!(detector.fit(&cluster(10, 1)).is_err());
        assert!(detector.is_empty());
    }

    #[test]
    fn test_rejects_bad_weight() {
        let mut detector = EnsembleDetector::new(EnsembleStrategy::Voting);
        let err = detector
            .add_detector(Box::new(IsolationForest::default()), 0.0)
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidConfig");
    }
}
