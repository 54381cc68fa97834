//! JSON request/response protocol

use crate::anomaly::{validate_contamination, Gamma, KernelType};
use crate::engine::{Algorithm, DetectorConfig};
use crate::error::{KolosalError, Result};
use crate::utils::FeatureMatrix;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::str::FromStr;

/// Protocol command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Train,
    Predict,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Train => "train",
            Command::Predict => "predict",
        }
    }
}

impl FromStr for Command {
    type Err = KolosalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Command::Train),
            "predict" => Ok(Command::Predict),
            other => Err(KolosalError::UnknownCommand(other.to_string())),
        }
    }
}

/// One request. Hyperparameter fields only apply to the algorithms that use them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    pub command: Option<String>,
    pub algorithm: Option<String>,
    /// Rows of numbers, or a flat series
    pub data: Option<Value>,
    pub contamination: Option<f64>,
    pub n_estimators: Option<usize>,
    pub max_samples: Option<usize>,
    pub seed: Option<u64>,
    pub kernel: Option<String>,
    /// `"scale"`, `"auto"` or a positive number
    pub gamma: Option<Value>,
    pub nu: Option<f64>,
    pub n_neighbors: Option<usize>,
    pub novelty: Option<bool>,
    pub window_size: Option<usize>,
    pub z_threshold: Option<f64>,
    pub ema_alpha: Option<f64>,
    pub model_path: Option<String>,
    pub model_id: Option<String>,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| KolosalError::InvalidInput(format!("malformed JSON request: {}", e)))?;
        if !value.is_object() {
            return Err(KolosalError::InvalidInput(
                "request must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| KolosalError::InvalidInput(format!("invalid request field: {}", e)))
    }

    pub fn command(&self) -> Result<Command> {
        self.command
            .as_deref()
            .ok_or_else(|| KolosalError::InvalidInput("missing \"command\"".to_string()))?
            .parse()
    }

    /// Requested algorithm, if any; unknown tags are an error
    pub fn algorithm(&self) -> Result<Option<Algorithm>> {
        self.algorithm.as_deref().map(str::parse::<Algorithm>).transpose()
    }

    /// Decode `data` into a feature matrix
    pub fn feature_matrix(&self) -> Result<FeatureMatrix> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| KolosalError::InvalidInput("missing \"data\"".to_string()))?;
        parse_data(data)
    }

    /// Defaults for `algorithm` with this request's overrides applied
    pub fn detector_config(&self, algorithm: Algorithm) -> Result<DetectorConfig> {
        // Range applies to every algorithm, even those that never read it
        if let Some(v) = self.contamination {
            validate_contamination(v)?;
        }
        let mut config = DetectorConfig::default_for(algorithm);
        match &mut config {
            DetectorConfig::IsolationForest(c) => {
                if let Some(v) = self.contamination {
                    c.contamination = v;
                }
                if let Some(v) = self.n_estimators {
                    c.n_estimators = v;
                }
                if let Some(v) = self.max_samples {
                    c.max_samples = Some(v);
                }
                if let Some(v) = self.seed {
                    c.seed = v;
                }
            }
            DetectorConfig::OneClassSvm(c) => {
                // ν plays the role of contamination for the boundary detector
                if let Some(v) = self.nu.or(self.contamination) {
                    c.nu = v;
                }
                if let Some(kernel) = &self.kernel {
                    c.kernel = KernelType::parse(kernel)?;
                }
                if let Some(gamma) = &self.gamma {
                    c.gamma = parse_gamma(gamma)?;
                }
            }
            DetectorConfig::Lof(c) => {
                if let Some(v) = self.contamination {
                    c.contamination = v;
                }
                if let Some(v) = self.n_neighbors {
                    c.n_neighbors = v;
                }
                if let Some(v) = self.novelty {
                    c.novelty = v;
                }
            }
            DetectorConfig::TimeSeries(c) => {
                if let Some(v) = self.window_size {
                    c.window_size = v;
                }
                if let Some(v) = self.z_threshold {
                    c.z_threshold = v;
                }
                if let Some(v) = self.ema_alpha {
                    c.ema_alpha = v;
                }
            }
        }
        Ok(config)
    }
}

/// Accepts `[[f64, ...], ...]` or `[f64, ...]` (an N×1 series)
pub fn parse_data(data: &Value) -> Result<FeatureMatrix> {
    let items = data
        .as_array()
        .ok_or_else(|| KolosalError::InvalidInput("\"data\" must be an array".to_string()))?;

    if items.iter().all(Value::is_number) {
        let series = items
            .iter()
            .map(|v| number(v, 0, 0))
            .collect::<Result<Vec<f64>>>()?;
        return FeatureMatrix::from_series(&series);
    }

    let rows = items
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let cells = row.as_array().ok_or_else(|| {
                KolosalError::InvalidInput(format!("row {} is not an array of numbers", i))
            })?;
            cells
                .iter()
                .enumerate()
                .map(|(j, v)| number(v, i, j))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    FeatureMatrix::from_rows(&rows)
}

fn number(value: &Value, row: usize, col: usize) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        KolosalError::InvalidInput(format!(
            "value at row {}, column {} is not a number: {}",
            row, col, value
        ))
    })
}

pub fn parse_gamma(value: &Value) -> Result<Gamma> {
    match value {
        Value::String(s) if s == "scale" => Ok(Gamma::Scale),
        Value::String(s) if s == "auto" => Ok(Gamma::Auto),
        Value::Number(n) => n
            .as_f64()
            .filter(|g| g.is_finite() && *g > 0.0)
            .map(Gamma::Value)
            .ok_or_else(|| KolosalError::invalid_config("gamma", n, "must be a positive number")),
        other => Err(KolosalError::invalid_config(
            "gamma",
            other,
            "expected \"scale\", \"auto\" or a positive number",
        )),
    }
}

/// Tag a response body with `"status": "success"`
pub fn success(body: Value) -> Value {
    let mut map = match body {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    map.insert("status".to_string(), Value::from("success"));
    Value::Object(map)
}

pub fn error_response(err: &KolosalError) -> Value {
    json!({
        "status": "error",
        "error_kind": err.kind(),
        "message": err.to_string(),
    })
}
