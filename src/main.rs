use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use yolo_plates::cli::{Cli, Command};
use yolo_plates::commands;
use yolo_plates::config::AppConfig;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Export(args) => {
            commands::run_export(args, &config.export).context("export failed")?;
        }
        Command::Predict(args) => {
            commands::run_predict(args, &config.predict).context("prediction failed")?;
        }
    }
    Ok(())
}
