//! Worker pool sizing for training-time parallelism

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Configuration for the rayon worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Number of threads (None = one per available core)
    pub n_threads: Option<usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            n_threads: std::env::var("KOLOSAL_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0),
        }
    }
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of threads
    pub fn with_threads(mut self, n: usize) -> Self {
        self.n_threads = Some(n.max(1));
        self
    }

    /// Get the number of threads to use
    pub fn num_threads(&self) -> usize {
        self.n_threads.unwrap_or_else(rayon::current_num_threads)
    }

    /// Size the global pool. Only the first call in a process takes effect.
    pub fn install_global(&self) {
        let Some(n) = self.n_threads else {
            debug!(threads = rayon::current_num_threads(), "Using default worker pool");
            return;
        };
        match rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            Ok(()) => debug!(threads = n, "Worker pool sized"),
            Err(e) => warn!(error = %e, "Worker pool already initialized, keeping existing size"),
        }
    }
}
