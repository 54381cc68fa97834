//! Kolosal Anomaly - Main Entry Point
//!
//! Logs go to stderr; stdout carries protocol responses and reports only.

use clap::Parser;
use kolosal_anomaly::cli::{cmd_inspect, cmd_run, cmd_serve, cmd_train_all, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_anomaly=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    cli.parallel_config().install_global();

    match &cli.command {
        Commands::Run { request } => {
            cmd_run(cli.service_config()?, request.as_deref())?;
        }
        Commands::Serve => {
            cmd_serve(cli.service_config()?)?;
        }
        Commands::TrainAll {
            data,
            synthetic,
            n_samples,
            n_features,
            contamination,
            validation_split,
            output_dir,
            seed,
            json,
            report,
        } => {
            cmd_train_all(
                data.as_deref(),
                *synthetic,
                *n_samples,
                *n_features,
                *contamination,
                *validation_split,
                output_dir,
                *seed,
                *json,
                report.as_deref(),
            )?;
        }
        Commands::Inspect { model, json } => {
            cmd_inspect(model, *json)?;
        }
    }

    Ok(())
}
