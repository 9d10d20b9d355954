use clap::{Args, Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure service and response time of an operation issued at a fixed rate.
    ///
    /// A warmup run is executed first and discarded, then the measured run.
    /// Percentile distributions of both latencies are printed and written to
    /// `<out-dir>/<rate in thousands>k{s,r}`.
    Run(RunParams),

    /// Print the run parameters resolved from the flags and the optional config file,
    /// without running anything.
    ///
    /// Example of a config file:
    ///
    /// workers = 4 {n}
    /// throughput = 100000 {n}
    /// duration = "4m" {n}
    /// warmup = "1m" {n}
    /// operation = "log" {n}
    /// [histogram] {n}
    /// highest_trackable = "10s" {n}
    /// significant_digits = 3
    Show(RunParams),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdleChoice {
    /// Spin without yielding if there are enough processors, yield otherwise.
    Auto,
    /// Always spin.
    Noop,
    /// Always yield while waiting.
    Yield,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationChoice {
    /// Log a fixed message.
    Log,
    /// Do nothing; measures the overhead of the harness.
    Noop,
    /// Spin for `--op-latency`.
    Fixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateModeChoice {
    /// Every worker runs at the target throughput.
    PerWorker,
    /// The target throughput is shared between all workers.
    Split,
}

#[derive(Clone, Debug, Default, Args)]
pub struct RunParams {
    /// Path to a TOML file with run parameters.
    ///
    /// Flags given on the command line take precedence over the file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Number of worker threads.
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// Target throughput, in operations per second.
    #[arg(long, short)]
    pub throughput: Option<f64>,

    /// Whether the throughput applies to every worker or to all of them together.
    #[arg(long, value_enum)]
    pub rate_mode: Option<RateModeChoice>,

    /// Duration of the measured run, e.g. `4m` or `30s`.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Duration of the warmup run. `0s` disables the warmup.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub warmup: Option<Duration>,

    /// Operations per batch and worker in the measured run.
    ///
    /// The duration is only checked between batches.
    #[arg(long, short)]
    pub samples: Option<usize>,

    /// Operations per batch and worker in the warmup run.
    #[arg(long)]
    pub warmup_samples: Option<usize>,

    /// Multiple of the target throughput used to catch up after falling behind.
    #[arg(long)]
    pub catch_up: Option<f64>,

    /// What workers do while waiting for the next operation.
    #[arg(long, value_enum)]
    pub idle: Option<IdleChoice>,

    /// The operation being measured.
    #[arg(long, value_enum)]
    pub operation: Option<OperationChoice>,

    /// Latency of the `fixed` operation, e.g. `2ms`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub op_latency: Option<Duration>,

    /// Length of the message logged by the `log` operation.
    #[arg(long)]
    pub payload_len: Option<usize>,

    /// Directory where the percentile distributions are written.
    #[arg(long, short)]
    pub out_dir: Option<PathBuf>,

    /// File receiving the messages of the `log` operation.
    ///
    /// Defaults to `latency.log` in the output directory.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Do not write the percentile distributions to files.
    #[arg(long)]
    pub no_write: bool,
}
