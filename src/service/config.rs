//! Scoring service configuration

use crate::engine::Algorithm;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Upper bound on rows accepted in one request
const DEFAULT_MAX_ROWS: usize = 1_000_000;

/// Service configuration.
///
/// `Default` reads `KOLOSAL_DEFAULT_ALGORITHM`, `KOLOSAL_MODELS_DIR` and
/// `KOLOSAL_MAX_ROWS`; command-line flags override through the builders.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Algorithm used when a train request names none
    pub default_algorithm: Option<Algorithm>,
    /// Base directory for relative `model_path`s
    pub models_dir: Option<PathBuf>,
    pub max_rows: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let default_algorithm = std::env::var("KOLOSAL_DEFAULT_ALGORITHM")
            .ok()
            .and_then(|name| match name.parse::<Algorithm>() {
                Ok(algorithm) => Some(algorithm),
                Err(e) => {
                    warn!(value = %name, error = %e, "Ignoring KOLOSAL_DEFAULT_ALGORITHM");
                    None
                }
            });

        Self {
            default_algorithm,
            models_dir: std::env::var("KOLOSAL_MODELS_DIR").ok().map(PathBuf::from),
            max_rows: std::env::var("KOLOSAL_MAX_ROWS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(DEFAULT_MAX_ROWS),
        }
    }
}

impl ServiceConfig {
    /// Configuration that ignores the environment
    pub fn empty() -> Self {
        Self {
            default_algorithm: None,
            models_dir: None,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_default_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.default_algorithm = Some(algorithm);
        self
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(dir.into());
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    /// Relative paths resolve under `models_dir` when one is set
    pub fn resolve_model_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.models_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}
