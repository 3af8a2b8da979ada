use anyhow::Context;
use clap::{Parser, Subcommand};
use reporter_stream::config::StreamConfig;
use reporter_stream::integration::{EnvironmentInfo, RealEnvironment};
use reporter_stream::{ReporterStreamIntegration, StreamError, TestResult};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, trace, warn};

/// Stream test results through the priority output queue
#[derive(Parser)]
#[command(name = "reporter-stream")]
#[command(about = "Priority-ordered streaming test output with failure recovery", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream newline-delimited JSON test results
    Stream {
        /// Input file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Write plain lines regardless of the detected environment
        #[arg(long)]
        degraded: bool,

        /// Print the diagnostics report as JSON after stopping
        #[arg(long)]
        report: bool,
    },
    /// Show the detected terminal environment
    Env,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // stdout carries the stream itself
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("reporter-stream started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match load_config(cli.config.as_deref()).await {
        Ok(config) => match cli.command {
            Commands::Stream {
                input,
                degraded,
                report,
            } => run_stream(config, &input, degraded, report).await,
            Commands::Env => run_env(&config),
            Commands::Config => run_config(&config),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<StreamError>()
            .map_or(1, StreamError::exit_code);
        std::process::exit(code);
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<StreamConfig> {
    let mut config = match path {
        Some(path) => StreamConfig::from_file(path).await?,
        None => StreamConfig::default(),
    };
    config.merge_env(&RealEnvironment)?;
    Ok(config)
}

async fn run_stream(
    mut config: StreamConfig,
    input: &str,
    degraded: bool,
    report: bool,
) -> anyhow::Result<()> {
    if degraded {
        config.integration.force_degraded = true;
    }

    let reader: Box<dyn AsyncRead + Unpin + Send> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(input)
                .await
                .with_context(|| format!("cannot open input {input}"))?,
        )
    };

    let integration = ReporterStreamIntegration::new(config);
    integration.start();

    let streamed = stream_lines(&integration, reader).await;
    let stopped = integration.stop().await;

    streamed?;
    let summary = stopped?;
    debug!(?summary, "Stream finished");

    if report {
        let report = integration.diagnostics_report().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn stream_lines(
    integration: &ReporterStreamIntegration,
    reader: Box<dyn AsyncRead + Unpin + Send>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result: TestResult = match serde_json::from_str(line) {
            Ok(result) => result,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping malformed test result");
                continue;
            }
        };
        integration.stream_test_result(&result).await?;
    }
    Ok(())
}

fn run_env(config: &StreamConfig) -> anyhow::Result<()> {
    let info = EnvironmentInfo::detect(&RealEnvironment);
    let degraded = config.integration.force_degraded
        || info.should_degrade(config.integration.min_terminal_width);
    println!("{}", serde_json::to_string_pretty(&info)?);
    println!("degraded: {degraded}");
    Ok(())
}

fn run_config(config: &StreamConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
