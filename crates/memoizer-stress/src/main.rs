use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use humantime::parse_duration;

use memoizer::MemoizerConfig;

mod logging;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Hammers a memoizer with concurrent workloads and reports throughput, latency and how well
/// computations were deduplicated.
#[derive(Debug, Parser)]
#[command(about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = parse_duration)]
    duration: Duration,

    /// Report tracing events like in production, into a no-op writer.
    #[arg(long)]
    tracing: bool,

    /// Report metrics to a local statsd sink.
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;
    workloads.validate()?;

    let memoizer_config = MemoizerConfig::get(cli.config.as_deref())?;

    let mut logging_guard = logging::init(logging::Config {
        tracing: cli.tracing,
        metrics: cli.metrics,
    })?;
    if let Some(udp_sink) = logging_guard.udp_sink.take() {
        tokio::spawn(udp_sink);
    }

    perform_stresstest(memoizer_config, workloads, cli.duration).await
}
