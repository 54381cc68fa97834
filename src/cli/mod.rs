//! Kolosal Anomaly CLI Module
//!
//! `run` and `serve` speak the JSON protocol on stdout; `train-all` and
//! `inspect` print human-readable summaries.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::engine::Algorithm;
use crate::export::{read_header, SerializationFormat};
use crate::pipeline::{self, PipelineConfig, PipelineReport, TrainingPipeline};
use crate::service::{parse_data, ScoringService, ServiceConfig};
use crate::utils::{FeatureMatrix, ParallelConfig};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<16} {}", muted(key), val.white());
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
    let _ = io::stdout().flush();
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-anomaly")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Anomaly detection engine with a line-oriented JSON protocol")]
#[command(long_about = None)]
pub struct Cli {
    /// Worker threads for training and scoring (default: one per core)
    #[arg(long, global = true, env = "KOLOSAL_THREADS")]
    pub threads: Option<usize>,

    /// Algorithm used by train requests that name none
    #[arg(long, global = true, env = "KOLOSAL_DEFAULT_ALGORITHM")]
    pub algorithm: Option<String>,

    /// Base directory for relative model paths
    #[arg(long, global = true, env = "KOLOSAL_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    /// Maximum rows accepted per request
    #[arg(long, global = true, env = "KOLOSAL_MAX_ROWS")]
    pub max_rows: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Handle a single request given as an argument, or read from stdin
    Run {
        /// JSON request; stdin is read when omitted
        request: Option<String>,
    },

    /// Answer one JSON request per stdin line until end of input
    Serve,

    /// Train every applicable algorithm and save the models
    TrainAll {
        /// JSON file holding an array of rows (or a flat series)
        #[arg(short, long, conflicts_with = "synthetic")]
        data: Option<PathBuf>,

        /// Generate Gaussian data with planted anomalies instead of reading a file
        #[arg(long)]
        synthetic: bool,

        /// Synthetic sample count
        #[arg(long, default_value = "1000")]
        n_samples: usize,

        /// Synthetic feature count
        #[arg(long, default_value = "10")]
        n_features: usize,

        /// Expected anomaly fraction (ν for the one-class SVM)
        #[arg(long, default_value = "0.1")]
        contamination: f64,

        /// Fraction of rows held out for validation
        #[arg(long, default_value = "0.2")]
        validation_split: f64,

        /// Output directory for models
        #[arg(short, long, default_value = "./models")]
        output_dir: PathBuf,

        /// Seed for synthetic data
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Write models as JSON envelopes instead of binary
        #[arg(long)]
        json: bool,

        /// Also write the pipeline report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the header of a saved model
    Inspect {
        /// Model file
        model: PathBuf,

        /// Print the header as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Environment defaults overridden by command-line flags
    pub fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = ServiceConfig::default();
        if let Some(name) = &self.algorithm {
            let algorithm: Algorithm = name
                .parse()
                .with_context(|| format!("invalid --algorithm {:?}", name))?;
            config = config.with_default_algorithm(algorithm);
        }
        if let Some(dir) = &self.models_dir {
            config = config.with_models_dir(dir.clone());
        }
        if let Some(max_rows) = self.max_rows {
            config = config.with_max_rows(max_rows);
        }
        Ok(config)
    }

    pub fn parallel_config(&self) -> ParallelConfig {
        match self.threads {
            Some(n) => ParallelConfig::new().with_threads(n),
            None => ParallelConfig::new(),
        }
    }
}

// ─── Protocol commands ─────────────────────────────────────────────────────────

/// First non-empty line of `input`; a request is exactly one line
pub fn first_request<R: BufRead>(input: R) -> anyhow::Result<String> {
    for line in input.lines() {
        let line = line.context("failed to read request")?;
        if !line.trim().is_empty() {
            return Ok(line);
        }
    }
    anyhow::bail!("no request on stdin")
}

pub fn cmd_run(config: ServiceConfig, request: Option<&str>) -> anyhow::Result<()> {
    let request = match request {
        Some(r) => r.to_string(),
        None => first_request(io::stdin().lock())?,
    };

    let mut service = ScoringService::new(config);
    let response = service.handle_line(request.trim());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &response)?;
    writeln!(out)?;
    Ok(())
}

pub fn cmd_serve(config: ServiceConfig) -> anyhow::Result<()> {
    let mut service = ScoringService::new(config);
    let stdin = io::stdin();
    let stdout = io::stdout();
    service
        .serve(stdin.lock(), stdout.lock())
        .context("request stream failed")?;
    Ok(())
}

// ─── Offline commands ──────────────────────────────────────────────────────────

fn load_data(path: &Path) -> anyhow::Result<FeatureMatrix> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_reader(io::BufReader::new(file))
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(parse_data(&value)?)
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_train_all(
    data_path: Option<&Path>,
    synthetic: bool,
    n_samples: usize,
    n_features: usize,
    contamination: f64,
    validation_split: f64,
    output_dir: &Path,
    seed: u64,
    json: bool,
    report_path: Option<&Path>,
) -> anyhow::Result<()> {
    section("Train all");

    let start = Instant::now();
    let data = match (data_path, synthetic) {
        (Some(path), _) => {
            step_run("Loading data");
            let data = load_data(path)?;
            step_done(&format!("{} rows × {} cols in {:?}", data.nrows(), data.ncols(), start.elapsed()));
            data
        }
        (None, true) => {
            step_run("Generating synthetic data");
            let generated = pipeline::generate_synthetic(n_samples, n_features, contamination, seed)?;
            step_done(&format!(
                "{} rows × {} cols, {} planted anomalies",
                generated.data.nrows(),
                generated.data.ncols(),
                generated.n_anomalies()
            ));
            generated.data
        }
        (None, false) => anyhow::bail!("either --data or --synthetic must be given"),
    };

    let format = if json { SerializationFormat::Json } else { SerializationFormat::Binary };
    let config = PipelineConfig::default()
        .with_output_dir(output_dir)
        .with_contamination(contamination)
        .with_validation_split(validation_split)
        .with_format(format);

    step_run("Training");
    let start = Instant::now();
    let report = TrainingPipeline::new(config).train_all(&data)?;
    step_done(&format!("{:?}", start.elapsed()));

    print_pipeline_report(&report);

    if let Some(path) = report_path {
        pipeline::write_report(&report, path)?;
        kv("Report", &path.display().to_string());
        println!();
    }

    Ok(())
}

fn print_pipeline_report(report: &PipelineReport) {
    println!();
    kv("Train rows", &report.n_train_samples.to_string());
    kv("Validation rows", &report.n_val_samples.to_string());
    kv("Output", &report.output_dir.display().to_string());
    println!();

    println!(
        "  {:<18} {:>10} {:>10} {:>12} {:>10}",
        muted("Algorithm"),
        muted("Train ms"),
        muted("Flagged"),
        muted("Val rate"),
        muted("Val mean")
    );
    println!("  {}", dim(&"─".repeat(64)));

    for outcome in &report.results {
        let (rate, mean) = match &outcome.validation {
            Some(v) => (format!("{:.1}%", v.anomaly_rate * 100.0), format!("{:.4}", v.mean_score)),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "  {:<18} {:>10.1} {:>10} {:>12} {:>10}",
            outcome.training.algorithm.as_str(),
            outcome.training.training_time_ms,
            outcome.training.anomalies_detected,
            rate,
            mean
        );
    }

    for failure in &report.failures {
        println!(
            "  {:<18} {}",
            failure.algorithm.as_str(),
            format!("{}: {}", failure.error_kind, failure.message).red()
        );
    }

    println!("  {}", dim(&"─".repeat(64)));
    println!(
        "  {} {} of {} algorithms trained",
        ok("✓"),
        report.results.len(),
        report.results.len() + report.failures.len()
    );
    println!();
}

pub fn cmd_inspect(path: &Path, json: bool) -> anyhow::Result<()> {
    let header = read_header(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&header)?);
        return Ok(());
    }

    section("Model");
    kv("File", &path.display().to_string());
    kv("Algorithm", header.algorithm.as_str());
    kv("Features", &header.n_features.to_string());
    kv("Trained at", &header.trained_at);
    kv("Engine", &format!("v{}", header.engine_version));
    kv("Format", &format!("{:?}", SerializationFormat::from_path(path)));
    println!();
    Ok(())
}

/// Read requests line by line from any reader; used by `serve` and tests
pub fn serve_from<R: BufRead, W: Write>(config: ServiceConfig, input: R, output: W) -> anyhow::Result<usize> {
    Ok(ScoringService::new(config).serve(input, output)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_first_request_takes_one_line() {
        let input = "\n  \n{\"command\": \"train\"}\n{\"command\": \"predict\"}\n";
        assert_eq!(first_request(input.as_bytes()).unwrap(), "{\"command\": \"train\"}");
        assert!(first_request("\n\n".as_bytes()).is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train_all() {
        let cli = Cli::try_parse_from([
            "kolosal-anomaly",
            "--threads",
            "2",
            "train-all",
            "--synthetic",
            "--n-samples",
            "300",
        ])
        .unwrap();
        assert_eq!(cli.threads, Some(2));
        assert!(matches!(
            cli.command,
            Commands::TrainAll { synthetic: true, n_samples: 300, .. }
        ));
    }

    #[test]
    fn test_bad_default_algorithm_is_startup_error() {
        let cli = Cli::try_parse_from(["kolosal-anomaly", "--algorithm", "kmeans", "serve"]).unwrap();
        assert!(cli.service_config().is_err());
    }

    #[test]
    fn test_serve_from_reader() {
        let input = br#"{"command": "predict", "data": [[1.0]]}"# as &[u8];
        let mut output = Vec::new();
        let handled = serve_from(ServiceConfig::empty(), input, &mut output).unwrap();
        assert_eq!(handled, 1);
        assert!(String::from_utf8(output).unwrap().contains("ModelNotTrained"));
    }
}
