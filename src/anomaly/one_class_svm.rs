//! One-Class Support Vector Machine
//!
//! Learns a single boundary enclosing roughly `1 - nu` of the training data in
//! kernel feature space. The ν-formulation dual
//!
//! ```text
//! minimise  ½ αᵀ K α    subject to  0 ≤ αᵢ ≤ 1,  Σ αᵢ = ν·n
//! ```
//!
//! is solved with SMO using the maximal-violating-pair working set. Points
//! with αᵢ > 0 are support vectors; the decision value of a sample is its
//! signed distance to the boundary, negative outside.

use crate::anomaly::{check_features, AnomalyDetector};
use crate::error::{KolosalError, Result};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum number of samples for eager kernel matrix computation.
/// Beyond this, training will return an error to prevent OOM.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Multipliers at or below this are treated as zero
const ALPHA_EPSILON: f64 = 1e-8;

/// Floor for the second-order term of a working-set update
const MIN_CURVATURE: f64 = 1e-12;

/// Kernel function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    /// Linear kernel: K(x, y) = x · y
    Linear,
    /// Polynomial kernel: K(x, y) = (γ x · y + r)^d
    #[serde(rename = "poly")]
    Polynomial,
    /// Radial Basis Function (Gaussian): K(x, y) = exp(-γ ||x - y||²)
    Rbf,
    /// Sigmoid kernel: K(x, y) = tanh(γ x · y + r)
    Sigmoid,
}

impl KernelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelType::Linear => "linear",
            KernelType::Polynomial => "poly",
            KernelType::Rbf => "rbf",
            KernelType::Sigmoid => "sigmoid",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "linear" => Ok(KernelType::Linear),
            "poly" | "polynomial" => Ok(KernelType::Polynomial),
            "rbf" => Ok(KernelType::Rbf),
            "sigmoid" => Ok(KernelType::Sigmoid),
            other => Err(KolosalError::invalid_config(
                "kernel",
                other,
                "expected one of linear, poly, rbf, sigmoid",
            )),
        }
    }
}

impl Default for KernelType {
    fn default() -> Self {
        KernelType::Rbf
    }
}

/// Kernel coefficient γ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gamma {
    /// 1 / (n_features · Var(X))
    Scale,
    /// 1 / n_features
    Auto,
    Value(f64),
}

impl Default for Gamma {
    fn default() -> Self {
        Gamma::Scale
    }
}

impl Gamma {
    /// Resolve to a number for the given training data
    fn resolve(&self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match *self {
            Gamma::Scale => {
                let variance = if x.is_empty() { 0.0 } else { x.var(0.0) };
                if variance > 0.0 {
                    1.0 / (n_features * variance)
                } else {
                    1.0
                }
            }
            Gamma::Auto => 1.0 / n_features,
            Gamma::Value(g) => g,
        }
    }
}

impl std::fmt::Display for Gamma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gamma::Scale => write!(f, "scale"),
            Gamma::Auto => write!(f, "auto"),
            Gamma::Value(g) => write!(f, "{}", g),
        }
    }
}

/// One-class SVM hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneClassSvmConfig {
    pub kernel: KernelType,
    pub gamma: Gamma,
    /// Polynomial degree
    pub degree: u32,
    /// Independent term of the polynomial and sigmoid kernels
    pub coef0: f64,
    /// Upper bound on the fraction of training errors, lower bound on the fraction of support vectors
    pub nu: f64,
    /// Stopping tolerance on the maximal KKT violation
    pub tol: f64,
    /// SMO iteration cap
    pub max_iter: usize,
}

impl Default for OneClassSvmConfig {
    fn default() -> Self {
        Self {
            kernel: KernelType::Rbf,
            gamma: Gamma::Scale,
            degree: 3,
            coef0: 0.0,
            nu: 0.1,
            tol: 1e-3,
            max_iter: 100_000,
        }
    }
}

impl OneClassSvmConfig {
    pub fn with_kernel(mut self, kernel: KernelType) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_gamma(mut self, gamma: Gamma) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_nu(mut self, nu: f64) -> Self {
        self.nu = nu;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(KolosalError::invalid_config("nu", self.nu, "must be in (0, 1]"));
        }
        if let Gamma::Value(g) = self.gamma {
            if !(g.is_finite() && g > 0.0) {
                return Err(KolosalError::invalid_config("gamma", g, "must be a positive number"));
            }
        }
        if self.degree == 0 {
            return Err(KolosalError::invalid_config("degree", 0, "must be at least 1"));
        }
        if !self.coef0.is_finite() {
            return Err(KolosalError::invalid_config("coef0", self.coef0, "must be finite"));
        }
        if !(self.tol > 0.0) {
            return Err(KolosalError::invalid_config("tol", self.tol, "must be positive"));
        }
        if self.max_iter == 0 {
            return Err(KolosalError::invalid_config("max_iter", 0, "must be at least 1"));
        }
        Ok(())
    }
}

/// Kernel with γ resolved against the training data
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Kernel {
    kind: KernelType,
    gamma: f64,
    degree: u32,
    coef0: f64,
}

impl Kernel {
    fn eval(&self, a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
        match self.kind {
            KernelType::Linear => a.dot(b),
            KernelType::Polynomial => (self.gamma * a.dot(b) + self.coef0).powi(self.degree as i32),
            KernelType::Rbf => {
                let sq_dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
                (-self.gamma * sq_dist).exp()
            }
            KernelType::Sigmoid => (self.gamma * a.dot(b) + self.coef0).tanh(),
        }
    }

    /// Full Gram matrix, rows computed in parallel
    fn gram_matrix(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = x
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|a| x.rows().into_iter().map(|b| self.eval(&a, &b)).collect())
            .collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        if flat.iter().any(|v| !v.is_finite()) {
            return Err(KolosalError::NumericalFailure(format!(
                "{} kernel produced non-finite values; reduce gamma or rescale the features",
                self.kind.as_str()
            )));
        }
        Ok(Array2::from_shape_vec((n, n), flat)?)
    }
}

/// Solution of the one-class dual
struct DualSolution {
    alphas: Vec<f64>,
    rho: f64,
    iterations: usize,
    converged: bool,
}

/// SMO over the ν-one-class dual with box [0, 1] and Σα = ν·n
fn solve_dual(k: &Array2<f64>, nu: f64, tol: f64, max_iter: usize) -> DualSolution {
    let n = k.nrows();
    let total = nu * n as f64;

    // Feasible start: the first ⌊νn⌋ multipliers at the upper bound, remainder on the next
    let mut alphas = vec![0.0; n];
    let n_full = (total.floor() as usize).min(n);
    for a in alphas.iter_mut().take(n_full) {
        *a = 1.0;
    }
    if n_full < n {
        alphas[n_full] = total - n_full as f64;
    }

    // Gradient of ½αᵀKα is Kα
    let mut grad: Vec<f64> = (0..n)
        .map(|i| {
            alphas
                .iter()
                .enumerate()
                .filter(|(_, &a)| a > 0.0)
                .map(|(j, &a)| k[[i, j]] * a)
                .sum()
        })
        .collect();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iter {
        // i may grow (α < 1) and has the smallest gradient, j may shrink (α > 0) and has the largest
        let mut i_up = None;
        let mut g_min = f64::INFINITY;
        let mut j_low = None;
        let mut g_max = f64::NEG_INFINITY;
        for t in 0..n {
            if alphas[t] < 1.0 && grad[t] < g_min {
                g_min = grad[t];
                i_up = Some(t);
            }
            if alphas[t] > 0.0 && grad[t] > g_max {
                g_max = grad[t];
                j_low = Some(t);
            }
        }

        let (i, j) = match (i_up, j_low) {
            (Some(i), Some(j)) if g_max - g_min >= tol && i != j => (i, j),
            _ => {
                converged = true;
                break;
            }
        };

        let curvature = (k[[i, i]] + k[[j, j]] - 2.0 * k[[i, j]]).max(MIN_CURVATURE);
        let step = ((g_max - g_min) / curvature).min(1.0 - alphas[i]).min(alphas[j]);

        alphas[i] += step;
        alphas[j] -= step;
        if alphas[j] < ALPHA_EPSILON {
            alphas[j] = 0.0;
        }
        if alphas[i] > 1.0 - ALPHA_EPSILON {
            alphas[i] = 1.0;
        }

        for (t, g) in grad.iter_mut().enumerate() {
            *g += step * (k[[t, i]] - k[[t, j]]);
        }

        iterations += 1;
    }

    DualSolution {
        rho: compute_rho(&alphas, &grad),
        alphas,
        iterations,
        converged,
    }
}

/// Offset ρ: mean gradient over free multipliers, else midpoint of the bound sets
fn compute_rho(alphas: &[f64], grad: &[f64]) -> f64 {
    let mut free_sum = 0.0;
    let mut n_free = 0usize;
    let mut ub = f64::INFINITY;
    let mut lb = f64::NEG_INFINITY;

    for (&a, &g) in alphas.iter().zip(grad) {
        if a >= 1.0 {
            lb = lb.max(g);
        } else if a <= 0.0 {
            ub = ub.min(g);
        } else {
            free_sum += g;
            n_free += 1;
        }
    }

    if n_free > 0 {
        free_sum / n_free as f64
    } else if ub.is_finite() && lb.is_finite() {
        (ub + lb) / 2.0
    } else if lb.is_finite() {
        lb
    } else {
        ub
    }
}

/// One-class SVM anomaly detector.
///
/// `score_samples` returns `(Σ αᵢ K(svᵢ, x) − ρ) / (ν·n)`: zero on the
/// boundary, positive inside, negative outside. The threshold is 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneClassSVM {
    config: OneClassSvmConfig,
    kernel: Option<Kernel>,
    /// Support vectors (rows with α > 0)
    support_vectors: Option<Array2<f64>>,
    /// Normalised dual coefficients of the support vectors (sum to 1)
    dual_coef: Option<Array1<f64>>,
    /// Normalised offset
    rho: f64,
    n_train: usize,
}

impl OneClassSVM {
    pub fn new(config: OneClassSvmConfig) -> Self {
        Self {
            config,
            kernel: None,
            support_vectors: None,
            dual_coef: None,
            rho: 0.0,
            n_train: 0,
        }
    }

    pub fn config(&self) -> &OneClassSvmConfig {
        &self.config
    }

    pub fn n_support_vectors(&self) -> usize {
        self.support_vectors.as_ref().map_or(0, |sv| sv.nrows())
    }

    /// Support vectors as a fraction of the training set
    pub fn support_vector_ratio(&self) -> f64 {
        if self.n_train == 0 {
            0.0
        } else {
            self.n_support_vectors() as f64 / self.n_train as f64
        }
    }

    /// γ actually used by the kernel
    pub fn gamma_value(&self) -> Option<f64> {
        self.kernel.map(|k| k.gamma)
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    fn decision_row(kernel: &Kernel, sv: &Array2<f64>, coef: &Array1<f64>, rho: f64, row: ArrayView1<f64>) -> f64 {
        sv.rows()
            .into_iter()
            .zip(coef.iter())
            .map(|(s, &c)| c * kernel.eval(&s, &row))
            .sum::<f64>()
            - rho
    }
}

impl Default for OneClassSVM {
    fn default() -> Self {
        Self::new(OneClassSvmConfig::default())
    }
}

impl AnomalyDetector for OneClassSVM {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        self.config.validate()?;
        let n = x.nrows();
        if n == 0 {
            return Err(KolosalError::InvalidInput("training data has no rows".to_string()));
        }
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(KolosalError::InvalidInput(format!(
                "Dataset has {} samples, exceeding the maximum {} for the SVM kernel matrix. \
                 Consider subsampling or using a different algorithm.",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }

        let kernel = Kernel {
            kind: self.config.kernel,
            gamma: self.config.gamma.resolve(x),
            degree: self.config.degree,
            coef0: self.config.coef0,
        };
        let gram = kernel.gram_matrix(x)?;

        let solution = solve_dual(&gram, self.config.nu, self.config.tol, self.config.max_iter);
        if !solution.converged {
            warn!(
                iterations = solution.iterations,
                max_iter = self.config.max_iter,
                "One-class SVM solver hit the iteration cap before reaching tolerance"
            );
        }

        let scale = self.config.nu * n as f64;
        let rho = solution.rho / scale;
        if !rho.is_finite() {
            return Err(KolosalError::NumericalFailure(
                "one-class SVM offset is not finite".to_string(),
            ));
        }

        let support: Vec<usize> = solution
            .alphas
            .iter()
            .enumerate()
            .filter(|(_, &a)| a > ALPHA_EPSILON)
            .map(|(i, _)| i)
            .collect();

        let support_vectors = x.select(Axis(0), &support);
        let dual_coef: Array1<f64> = support.iter().map(|&i| solution.alphas[i] / scale).collect();

        debug!(
            iterations = solution.iterations,
            n_support = support.len(),
            gamma = kernel.gamma,
            rho,
            "One-class SVM solved"
        );

        self.kernel = Some(kernel);
        self.support_vectors = Some(support_vectors);
        self.dual_coef = Some(dual_coef);
        self.rho = rho;
        self.n_train = n;

        Ok(())
    }

    fn score_samples(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (kernel, sv, coef) = match (&self.kernel, &self.support_vectors, &self.dual_coef) {
            (Some(kernel), Some(sv), Some(coef)) => (kernel, sv, coef),
            _ => return Err(KolosalError::ModelNotTrained),
        };
        check_features(Some(sv.ncols()), x)?;

        let scores: Vec<f64> = x
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| Self::decision_row(kernel, sv, coef, self.rho, row))
            .collect();

        Ok(Array1::from_vec(scores))
    }

    fn threshold(&self) -> f64 {
        0.0
    }

    fn is_fitted(&self) -> bool {
        self.support_vectors.is_some()
    }

    fn n_features(&self) -> Option<usize> {
        self.support_vectors.as_ref().map(|sv| sv.ncols())
    }
}
