//! Scoring service
//!
//! Dispatches one JSON request at a time to a [`Detector`], and turns every
//! failure into a structured error response instead of ending the process.
//! Detectors trained or loaded with a `model_id` stay in a session registry
//! owned by the service; time-series sessions keep their rolling window
//! between requests.

mod config;
mod protocol;

pub use config::ServiceConfig;
pub use protocol::{error_response, parse_data, parse_gamma, success, Command, Request};

use crate::engine::{Algorithm, Detector};
use crate::error::{KolosalError, Result};
use crate::utils::{FeatureMatrix, Timer};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

/// Request dispatcher with a per-caller session registry
pub struct ScoringService {
    config: ServiceConfig,
    sessions: HashMap<String, Detector>,
}

impl ScoringService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn session(&self, model_id: &str) -> Option<&Detector> {
        self.sessions.get(model_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handle one raw request line, returning the response body
    pub fn handle_line(&mut self, line: &str) -> Value {
        match Request::parse(line).and_then(|request| self.handle(&request)) {
            Ok(body) => body,
            Err(e) => {
                warn!(error_kind = e.kind(), error = %e, "Request failed");
                error_response(&e)
            }
        }
    }

    /// Handle a parsed request
    pub fn handle(&mut self, request: &Request) -> Result<Value> {
        let command = request.command()?;
        let timer = Timer::start("request");

        let body = match command {
            Command::Train => self.train(request)?,
            Command::Predict => self.predict(request)?,
        };

        info!(
            command = command.as_str(),
            model_id = request.model_id.as_deref().unwrap_or("-"),
            elapsed_ms = timer.stop(),
            "Request handled"
        );
        Ok(success(body))
    }

    fn train(&mut self, request: &Request) -> Result<Value> {
        let algorithm = request
            .algorithm()?
            .or(self.config.default_algorithm)
            .ok_or_else(|| {
                KolosalError::InvalidInput(
                    "missing \"algorithm\" and no default algorithm is configured".to_string(),
                )
            })?;
        let data = Self::checked_data(&self.config, request)?;

        let mut detector = Detector::new(request.detector_config(algorithm)?)?;
        let report = detector.train(&data)?;

        let mut body = serde_json::to_value(&report)?;
        let mut model_saved = false;
        if let Some(path) = &request.model_path {
            let path = self.config.resolve_model_path(path);
            detector.save(&path)?;
            model_saved = true;
            body["model_path"] = Value::from(path.display().to_string());
        }
        body["model_saved"] = Value::from(model_saved);

        if let Some(id) = &request.model_id {
            body["model_id"] = Value::from(id.as_str());
            if self.sessions.insert(id.clone(), detector).is_some() {
                debug!(model_id = %id, "Replaced session model");
            }
        }

        Ok(body)
    }

    fn predict(&mut self, request: &Request) -> Result<Value> {
        let requested = request.algorithm()?;

        let mut loaded;
        let detector: &mut Detector = match (&request.model_path, &request.model_id) {
            (Some(path), model_id) => {
                let path = self.config.resolve_model_path(path);
                let detector = Detector::load(&path)?;
                // A rejected request must leave the session untouched
                Self::check_algorithm(requested, &detector)?;
                match model_id {
                    Some(id) => match self.sessions.entry(id.clone()) {
                        Entry::Occupied(mut entry) => {
                            entry.insert(detector);
                            entry.into_mut()
                        }
                        Entry::Vacant(entry) => entry.insert(detector),
                    },
                    None => {
                        loaded = detector;
                        &mut loaded
                    }
                }
            }
            (None, Some(id)) => {
                let detector = self
                    .sessions
                    .get_mut(id)
                    .ok_or(KolosalError::ModelNotTrained)?;
                Self::check_algorithm(requested, detector)?;
                detector
            }
            (None, None) => return Err(KolosalError::ModelNotTrained),
        };

        let data = Self::checked_data(&self.config, request)?;
        let report = detector.predict_report(&data)?;

        let mut body = serde_json::to_value(&report)?;
        if let Some(id) = &request.model_id {
            body["model_id"] = Value::from(id.as_str());
        }
        Ok(body)
    }

    fn check_algorithm(requested: Option<Algorithm>, detector: &Detector) -> Result<()> {
        match requested {
            Some(requested) if requested != detector.algorithm() => {
                Err(KolosalError::InvalidInput(format!(
                    "model is {} but request asked for {}",
                    detector.algorithm(),
                    requested
                )))
            }
            _ => Ok(()),
        }
    }

    fn checked_data(config: &ServiceConfig, request: &Request) -> Result<FeatureMatrix> {
        let data = request.feature_matrix()?;
        if data.nrows() > config.max_rows {
            return Err(KolosalError::InvalidInput(format!(
                "request has {} rows, limit is {}",
                data.nrows(),
                config.max_rows
            )));
        }
        Ok(data)
    }

    /// Answer one request per input line until end of input.
    ///
    /// Blank lines are skipped. Returns the number of requests handled; only
    /// failures of the streams themselves are errors.
    pub fn serve<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<usize> {
        let mut handled = 0;
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line);
            serde_json::to_writer(&mut output, &response)?;
            output.write_all(b"\n")?;
            output.flush()?;
            handled += 1;
        }
        info!(requests = handled, sessions = self.sessions.len(), "Input closed");
        Ok(handled)
    }
}

impl Default for ScoringService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> ScoringService {
        ScoringService::new(ServiceConfig::empty())
    }

    fn grid(n: usize) -> Value {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![(i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1])
            .collect();
        json!(rows)
    }

    #[test]
    fn test_train_then_predict_by_session() {
        let mut service = service();
        let train = json!({
            "command": "train",
            "algorithm": "isolation_forest",
            "data": grid(100),
            "model_id": "plant-a",
        });
        let response = service.handle_line(&train.to_string());
        assert_eq!(response["status"], "success");
        assert_eq!(response["model_saved"], false);
        assert_eq!(response["n_features"], 2);
        assert_eq!(service.session_count(), 1);

        let predict = json!({
            "command": "predict",
            "data": [[0.5, 0.5], [30.0, -30.0]],
            "model_id": "plant-a",
        });
        let response = service.handle_line(&predict.to_string());
        assert_eq!(response["status"], "success");
        assert_eq!(response["n_samples"], 2);
        assert_eq!(response["results"][1]["is_anomaly"], true);
    }

    #[test]
    fn test_predict_without_model() {
        let mut service = service();
        let response = service.handle_line(r#"{"command": "predict", "data": [[1.0]]}"#);
        assert_eq!(response["status"], "error");
        assert_eq!(response["error_kind"], "ModelNotTrained");
    }

    #[test]
    fn test_unknown_algorithm() {
        let mut service = service();
        let response =
            service.handle_line(r#"{"command": "train", "algorithm": "kmeans", "data": [[1.0]]}"#);
        assert_eq!(response["error_kind"], "UnknownAlgorithm");
    }

    #[test]
    fn test_missing_algorithm_uses_configured_default() {
        let mut service = service();
        let request = json!({"command": "train", "data": grid(50)}).to_string();
        assert_eq!(service.handle_line(&request)["error_kind"], "InvalidInput");

        let mut service = ScoringService::new(
            ServiceConfig::empty().with_default_algorithm(Algorithm::Lof),
        );
        let response = service.handle_line(&request);
        assert_eq!(response["status"], "success");
        assert_eq!(response["algorithm"], "lof");
    }

    #[test]
    fn test_row_limit() {
        let mut service = ScoringService::new(ServiceConfig::empty().with_max_rows(10));
        let request = json!({"command": "train", "algorithm": "lof", "data": grid(11)});
        let response = service.handle_line(&request.to_string());
        assert_eq!(response["error_kind"], "InvalidInput");
    }

    #[test]
    fn test_serve_loop_survives_bad_lines() {
        let mut service = service();
        let input = b"not json\n\n{\"command\": \"explode\"}\n" as &[u8];
        let mut output = Vec::new();
        let handled = service.serve(input, &mut output).unwrap();
        assert_eq!(handled, 2);

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["error_kind"], "InvalidInput");
        assert_eq!(lines[1]["error_kind"], "UnknownCommand");
    }
}
