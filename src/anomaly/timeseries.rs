//! Rolling z-score detector for scalar time series
//!
//! Every observation is scored against the trailing window of values that
//! arrived before it, then pushed into the window. Scoring therefore needs
//! `&mut self`.
//!
//! The rolling z-score decides `is_anomaly`. Two secondary signals are
//! reported next to it: a MAD-based modified z-score against the training
//! baseline, and the deviation from an exponential moving average that is
//! carried across calls like the window.

use crate::anomaly::quantile;
use crate::error::{KolosalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Standard deviations at or below this are treated as degenerate
const STD_EPSILON: f64 = 1e-12;

/// Scales MAD to the standard deviation of a normal distribution
const MODIFIED_Z_FACTOR: f64 = 0.6745;

/// First spread above [`STD_EPSILON`], else 1.0
fn usable_spread(candidates: &[f64]) -> f64 {
    candidates
        .iter()
        .copied()
        .find(|&s| s > STD_EPSILON)
        .unwrap_or(1.0)
}

/// Fixed-capacity window with running sums
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow {
    data: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    sum_sq: f64,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Add a value, evicting the oldest when full
    pub fn push(&mut self, value: f64) {
        if self.data.len() >= self.capacity {
            if let Some(old) = self.data.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }

        self.data.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.sum / self.data.len() as f64
    }

    /// Sample variance, clamped at zero against cancellation error
    pub fn variance(&self) -> f64 {
        if self.data.len() < 2 {
            return 0.0;
        }
        let n = self.data.len() as f64;
        ((self.sum_sq - (self.sum * self.sum) / n) / (n - 1.0)).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn values(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}

/// Baseline statistics of the training series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStatistics {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub median: f64,
    /// Median absolute deviation from the median
    pub mad: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
}

impl SeriesStatistics {
    pub fn from_series(series: &[f64]) -> Self {
        if series.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                median: 0.0,
                mad: 0.0,
                min: 0.0,
                max: 0.0,
                q25: 0.0,
                q75: 0.0,
            };
        }

        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let std = (series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let median = quantile(series, 0.5);
        let deviations: Vec<f64> = series.iter().map(|v| (v - median).abs()).collect();

        Self {
            mean,
            std,
            median,
            mad: quantile(&deviations, 0.5),
            min: series.iter().copied().fold(f64::INFINITY, f64::min),
            max: series.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            q25: quantile(series, 0.25),
            q75: quantile(series, 0.75),
        }
    }
}

/// Per-method scores for one observation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodScores {
    /// Rolling z-score; the primary anomaly score
    pub z_score: f64,
    pub modified_z_score: f64,
    /// |x - EMA| with the EMA updated by x
    pub ema_deviation: f64,
}

/// Which methods flagged an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodFlags {
    pub z_score: bool,
    pub modified_z_score: bool,
    pub ema_deviation: bool,
}

/// How often each method fired over a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodCounts {
    pub z_score: usize,
    pub modified_z_score: usize,
    pub ema_deviation: usize,
}

impl MethodCounts {
    pub fn record(&mut self, flags: &MethodFlags) {
        self.z_score += flags.z_score as usize;
        self.modified_z_score += flags.modified_z_score as usize;
        self.ema_deviation += flags.ema_deviation as usize;
    }

    pub fn from_flags<'a>(flags: impl IntoIterator<Item = &'a MethodFlags>) -> Self {
        let mut counts = Self::default();
        for f in flags {
            counts.record(f);
        }
        counts
    }
}

/// Scores and flags for one observation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesScore {
    pub scores: MethodScores,
    pub methods: MethodFlags,
}

impl SeriesScore {
    pub fn z(&self) -> f64 {
        self.scores.z_score
    }

    /// Only the rolling z-score decides
    pub fn is_anomaly(&self) -> bool {
        self.methods.z_score
    }
}

/// Time-series detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    /// Trailing window length W
    pub window_size: usize,
    /// Flag when |z| exceeds this; also the modified-z and EMA cut-off
    pub z_threshold: f64,
    /// EMA smoothing factor in (0, 1]
    pub ema_alpha: f64,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            z_threshold: 3.0,
            ema_alpha: 0.2,
        }
    }
}

impl TimeSeriesConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_z_threshold(mut self, z_threshold: f64) -> Self {
        self.z_threshold = z_threshold;
        self
    }

    pub fn with_ema_alpha(mut self, ema_alpha: f64) -> Self {
        self.ema_alpha = ema_alpha;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(KolosalError::invalid_config(
                "window_size",
                self.window_size,
                "must be at least 2",
            ));
        }
        if !(self.z_threshold.is_finite() && self.z_threshold > 0.0) {
            return Err(KolosalError::invalid_config(
                "z_threshold",
                self.z_threshold,
                "must be a positive number",
            ));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(KolosalError::invalid_config(
                "ema_alpha",
                self.ema_alpha,
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Rolling z-score anomaly detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesDetector {
    config: TimeSeriesConfig,
    statistics: Option<SeriesStatistics>,
    window: RollingWindow,
    /// EMA of every value seen so far, training included
    ema: Option<f64>,
}

impl TimeSeriesDetector {
    pub fn new(config: TimeSeriesConfig) -> Self {
        let window = RollingWindow::new(config.window_size);
        Self {
            config,
            statistics: None,
            window,
            ema: None,
        }
    }

    pub fn config(&self) -> &TimeSeriesConfig {
        &self.config
    }

    pub fn statistics(&self) -> Option<&SeriesStatistics> {
        self.statistics.as_ref()
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema
    }

    pub fn is_fitted(&self) -> bool {
        self.statistics.is_some()
    }

    /// Fit baseline statistics and prime the window and EMA.
    ///
    /// Returns the in-sample scores. Rolling z-scores use only the values
    /// before each point; the modified z-score uses the final baseline.
    /// After fitting, the window holds the last W training values.
    pub fn fit(&mut self, series: &[f64]) -> Result<Vec<SeriesScore>> {
        self.config.validate()?;
        if series.is_empty() {
            return Err(KolosalError::InvalidInput("time series is empty".to_string()));
        }
        if series.iter().any(|v| !v.is_finite()) {
            return Err(KolosalError::InvalidInput(
                "time series contains non-finite values".to_string(),
            ));
        }

        let statistics = SeriesStatistics::from_series(series);
        let mut window = RollingWindow::new(self.config.window_size);
        let mut ema = None;
        let scores: Vec<SeriesScore> = series
            .iter()
            .map(|&value| Self::step(&self.config, &statistics, &mut window, &mut ema, value))
            .collect();

        debug!(
            n_samples = series.len(),
            mean = statistics.mean,
            std = statistics.std,
            "Time-series baseline fitted"
        );

        self.statistics = Some(statistics);
        self.window = window;
        self.ema = ema;
        Ok(scores)
    }

    /// Score one observation, then push it into the window and the EMA
    pub fn score_next(&mut self, value: f64) -> Result<SeriesScore> {
        let statistics = self.statistics.as_ref().ok_or(KolosalError::ModelNotTrained)?;
        if !value.is_finite() {
            return Err(KolosalError::InvalidInput(format!(
                "observation {} is not finite",
                value
            )));
        }

        Ok(Self::step(
            &self.config,
            statistics,
            &mut self.window,
            &mut self.ema,
            value,
        ))
    }

    /// Score a sequence in order
    pub fn score_series(&mut self, series: &[f64]) -> Result<Vec<SeriesScore>> {
        if !self.is_fitted() {
            return Err(KolosalError::ModelNotTrained);
        }
        // Validate up front so a bad value does not leave the window half-advanced
        if let Some(bad) = series.iter().find(|v| !v.is_finite()) {
            return Err(KolosalError::InvalidInput(format!(
                "observation {} is not finite",
                bad
            )));
        }

        series
            .iter()
            .map(|&value| self.score_next(value))
            .collect()
    }

    fn step(
        config: &TimeSeriesConfig,
        statistics: &SeriesStatistics,
        window: &mut RollingWindow,
        ema: &mut Option<f64>,
        value: f64,
    ) -> SeriesScore {
        let z_score = Self::z_score(window, statistics.std, value);
        window.push(value);

        let modified_z_score =
            MODIFIED_Z_FACTOR * (value - statistics.median) / usable_spread(&[statistics.mad]);

        let ema_deviation = match *ema {
            Some(previous) => {
                let next = config.ema_alpha * value + (1.0 - config.ema_alpha) * previous;
                *ema = Some(next);
                (value - next).abs()
            }
            None => {
                *ema = Some(value);
                0.0
            }
        };
        let ema_limit = usable_spread(&[statistics.std]) * config.z_threshold;

        SeriesScore {
            scores: MethodScores {
                z_score,
                modified_z_score,
                ema_deviation,
            },
            methods: MethodFlags {
                z_score: z_score.abs() > config.z_threshold,
                modified_z_score: modified_z_score.abs() > config.z_threshold,
                ema_deviation: ema_deviation > ema_limit,
            },
        }
    }

    fn z_score(window: &RollingWindow, baseline_std: f64, value: f64) -> f64 {
        if window.len() < 2 {
            return 0.0;
        }
        (value - window.mean()) / usable_spread(&[window.std_dev(), baseline_std])
    }
}

impl Default for TimeSeriesDetector {
    fn default() -> Self {
        Self::new(TimeSeriesConfig::default())
    }
}
