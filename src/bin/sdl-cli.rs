//! SDL CLI - Command-line interface for the SDL engine
//!
//! Loads a file, selects a system and runs its analyses, or evaluates ad-hoc
//! targets and predicates against it.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sdl::runtime::{AnalysisReport, EngineConfig, Session};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sdl")]
#[command(about = "Analytic availability and latency engine for the System Design Language", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Latency high-water mark (overrides the config file)
    #[arg(long)]
    latency_high: Option<usize>,

    /// Latency low-water mark (overrides the config file)
    #[arg(long)]
    latency_low: Option<usize>,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Type-check a file and list its systems
    Check {
        /// SDL file
        file: PathBuf,
    },

    /// Run every analyze block of a system
    Run {
        /// SDL file
        file: PathBuf,

        /// System to instantiate
        system: String,

        /// Parameter overrides applied before analysis (instance.param=expr)
        #[arg(long = "set", value_name = "INSTANCE.PARAM=EXPR")]
        sets: Vec<String>,
    },

    /// Analyze one target expression
    Analyze {
        /// SDL file
        file: PathBuf,

        /// System to instantiate
        system: String,

        /// Target expression, e.g. `disk.Read()`
        target: String,

        /// Predicates to check, e.g. `p99 < 50ms`
        #[arg(long = "expect")]
        expectations: Vec<String>,

        /// Parameter overrides applied before analysis (instance.param=expr)
        #[arg(long = "set", value_name = "INSTANCE.PARAM=EXPR")]
        sets: Vec<String>,
    },
}

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(high) = cli.latency_high {
        config.latency_high = high;
    }
    if let Some(low) = cli.latency_low {
        config.latency_low = low;
    }
    config.validate()?;
    Ok(config)
}

fn open(cli: &Cli, file: &Path, system: &str, sets: &[String]) -> Result<Session> {
    let mut session = Session::new(engine_config(cli)?);
    session.load(file)?;
    session.use_system(system)?;
    for assignment in sets {
        let Some((path, expr)) = assignment.split_once('=') else {
            bail!("expected INSTANCE.PARAM=EXPR, got '{assignment}'");
        };
        session.set(path.trim(), expr.trim())?;
    }
    Ok(session)
}

/// Returns whether every analysis and expectation passed.
fn run(cli: Cli) -> Result<bool> {
    match &cli.command {
        Commands::Check { file } => {
            let mut session = Session::new(engine_config(&cli)?);
            let loaded = session.load(file)?;
            println!("{}: ok", file.display());
            for name in loaded.system_names() {
                println!("  system {name}");
            }
            Ok(true)
        }

        Commands::Run { file, system, sets } => {
            let session = open(&cli, file, system, sets)?;
            let reports = session.run_analyses()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    print_report(report);
                }
            }
            Ok(reports.iter().all(AnalysisReport::passed))
        }

        Commands::Analyze {
            file,
            system,
            target,
            expectations,
            sets,
        } => {
            let session = open(&cli, file, system, sets)?;
            let report = match session.analyze(target) {
                Ok(result) => {
                    let outcomes = expectations
                        .iter()
                        .map(|predicate| session.expect(&result, predicate))
                        .collect::<sdl::runtime::Result<Vec<_>>>()?;
                    AnalysisReport {
                        name: target.clone(),
                        result: Some(result),
                        expectations: outcomes,
                        error: None,
                    }
                }
                Err(err) => AnalysisReport {
                    name: target.clone(),
                    result: None,
                    expectations: Vec::new(),
                    error: Some(err.to_string()),
                },
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(report.passed())
        }
    }
}

fn print_report(report: &AnalysisReport) {
    println!("{}:", report.name);
    if let Some(error) = &report.error {
        println!("  error: {error}");
    }
    if let Some(result) = &report.result {
        for (metric, value) in &result.metrics {
            if metric == "availability" {
                println!("  {metric:<12} {value:.6}");
            } else {
                println!("  {metric:<12} {:.3} ms", value * 1000.0);
            }
        }
    }
    for outcome in &report.expectations {
        let status = if outcome.passed { "PASS" } else { "FAIL" };
        match (&outcome.actual, &outcome.error) {
            (Some(actual), _) => println!("  [{status}] {} (actual {actual:.6})", outcome.clause),
            (None, Some(error)) => println!("  [{status}] {} ({error})", outcome.clause),
            (None, None) => println!("  [{status}] {}", outcome.clause),
        }
    }
}
