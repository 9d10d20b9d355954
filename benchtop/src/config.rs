use crate::cli::{IdleChoice, OperationChoice, RateModeChoice, RunParams};
use anyhow::{anyhow, bail, Context as _, Result};
use pacebench_core::{
    operation::DEFAULT_PAYLOAD_LEN, Benchmark, FixedLatency, HistogramConfig, IdleKind,
    LogMessage, Noop, Operation, RateMode, RunConfig, DEFAULT_CATCH_UP_MULTIPLE,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

const DEFAULT_DURATION: Duration = Duration::from_secs(4 * 60);
const DEFAULT_WARMUP: Duration = Duration::from_secs(60);
const MEASURED_SAMPLES: usize = 1_000_000;
const WARMUP_SAMPLES: usize = 50_000;
const LATENCY_LOG: &str = "latency.log";

/// Run parameters as read from a TOML file. Every field is optional.
#[derive(serde::Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    workers: Option<usize>,
    throughput: Option<f64>,
    rate_mode: Option<RateModeChoice>,
    duration: Option<String>,
    warmup: Option<String>,
    samples: Option<usize>,
    warmup_samples: Option<usize>,
    catch_up: Option<f64>,
    idle: Option<IdleChoice>,
    operation: Option<OperationChoice>,
    op_latency: Option<String>,
    payload_len: Option<usize>,
    out_dir: Option<PathBuf>,
    log_file: Option<PathBuf>,
    histogram: Option<HistogramSection>,
}

#[derive(serde::Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct HistogramSection {
    highest_trackable: Option<String>,
    significant_digits: Option<u8>,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read run file {}", path.display()))?;
        Self::parse(&input).with_context(|| format!("run file {} wrong format", path.display()))
    }

    fn parse(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| anyhow!("{}", e))
    }
}

fn parse_duration(field: &str, value: Option<&str>) -> Result<Option<Duration>> {
    value
        .map(|v| humantime::parse_duration(v).with_context(|| format!("invalid `{}`", field)))
        .transpose()
}

/// The operation measured by a run.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationSpec {
    Log { payload_len: usize },
    Noop,
    Fixed { latency: Duration },
}

impl OperationSpec {
    pub fn build(&self) -> Arc<dyn Operation> {
        match *self {
            OperationSpec::Log { payload_len } => Arc::new(LogMessage::with_len(payload_len)),
            OperationSpec::Noop => Arc::new(Noop),
            OperationSpec::Fixed { latency } => Arc::new(FixedLatency::new(latency)),
        }
    }
}

impl std::fmt::Display for OperationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationSpec::Log { payload_len } => write!(f, "log ({} bytes)", payload_len),
            OperationSpec::Noop => write!(f, "noop"),
            OperationSpec::Fixed { latency } => {
                write!(f, "fixed ({})", humantime::format_duration(*latency))
            }
        }
    }
}

/// Fully resolved parameters of a benchmark: flags, then the run file, then defaults.
#[derive(Clone, Debug)]
pub struct Settings {
    pub workers: usize,
    pub throughput: f64,
    pub rate_mode: RateMode,
    pub duration: Duration,
    /// `None` if the warmup is disabled.
    pub warmup: Option<Duration>,
    pub samples: usize,
    pub warmup_samples: usize,
    pub catch_up: f64,
    pub idle: IdleKind,
    pub operation: OperationSpec,
    pub out_dir: PathBuf,
    /// File receiving the events of the `log` operation, if any.
    pub log_file: Option<PathBuf>,
    pub write_reports: bool,
    pub histogram: HistogramConfig,
}

impl Settings {
    pub fn from_params(params: &RunParams) -> Result<Self> {
        let file = match params.config {
            Some(ref path) => RunFile::load(path)?,
            None => RunFile::default(),
        };
        Self::resolve(params, file, num_cpus::get())
    }

    /// Merge `params` over `file` over the defaults. `processors` picks the idle strategy when
    /// it is left on `auto`.
    pub fn resolve(params: &RunParams, file: RunFile, processors: usize) -> Result<Self> {
        let workers = params.workers.or(file.workers).unwrap_or(1);
        if workers == 0 {
            bail!("at least one worker is required");
        }
        let throughput = params
            .throughput
            .or(file.throughput)
            .ok_or_else(|| anyhow!("a target throughput is required (--throughput)"))?;

        let rate_mode = match params.rate_mode.or(file.rate_mode) {
            Some(RateModeChoice::Split) => RateMode::Split,
            Some(RateModeChoice::PerWorker) | None => RateMode::PerWorker,
        };

        let duration = match params.duration {
            Some(d) => d,
            None => parse_duration("duration", file.duration.as_deref())?
                .unwrap_or(DEFAULT_DURATION),
        };
        let warmup = match params.warmup {
            Some(d) => d,
            None => parse_duration("warmup", file.warmup.as_deref())?.unwrap_or(DEFAULT_WARMUP),
        };
        let warmup = Some(warmup).filter(|d| !d.is_zero());

        let samples = params
            .samples
            .or(file.samples)
            .unwrap_or((MEASURED_SAMPLES / workers).max(1));
        let warmup_samples = params
            .warmup_samples
            .or(file.warmup_samples)
            .unwrap_or((WARMUP_SAMPLES / workers).max(1));

        let catch_up = params
            .catch_up
            .or(file.catch_up)
            .unwrap_or(DEFAULT_CATCH_UP_MULTIPLE);

        let idle = match params.idle.or(file.idle).unwrap_or(IdleChoice::Auto) {
            IdleChoice::Auto => IdleKind::select(workers, processors),
            IdleChoice::Noop => IdleKind::NoOp,
            IdleChoice::Yield => IdleKind::Yield,
        };

        let operation = match params.operation.or(file.operation).unwrap_or(OperationChoice::Log)
        {
            OperationChoice::Log => OperationSpec::Log {
                payload_len: params
                    .payload_len
                    .or(file.payload_len)
                    .unwrap_or(DEFAULT_PAYLOAD_LEN),
            },
            OperationChoice::Noop => OperationSpec::Noop,
            OperationChoice::Fixed => {
                let latency = match params.op_latency {
                    Some(d) => Some(d),
                    None => parse_duration("op_latency", file.op_latency.as_deref())?,
                };
                OperationSpec::Fixed {
                    latency: latency
                        .ok_or_else(|| anyhow!("the fixed operation requires --op-latency"))?,
                }
            }
        };

        let out_dir = params
            .out_dir
            .clone()
            .or(file.out_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        let log_file = match operation {
            OperationSpec::Log { .. } => Some(
                params
                    .log_file
                    .clone()
                    .or(file.log_file)
                    .unwrap_or_else(|| out_dir.join(LATENCY_LOG)),
            ),
            _ => None,
        };

        let mut histogram = HistogramConfig::default();
        if let Some(section) = file.histogram {
            let highest_trackable = section.highest_trackable.as_deref();
            if let Some(max) = parse_duration("highest_trackable", highest_trackable)? {
                histogram.highest_trackable_value = u64::try_from(max.as_nanos())
                    .context("`highest_trackable` does not fit in nanoseconds")?;
            }
            if let Some(digits) = section.significant_digits {
                histogram.significant_digits = digits;
            }
        }

        let settings = Settings {
            workers,
            throughput,
            rate_mode,
            duration,
            warmup,
            samples,
            warmup_samples,
            catch_up,
            idle,
            operation,
            out_dir,
            log_file,
            write_reports: !params.no_write,
            histogram,
        };
        // surface misconfiguration before any thread or file is created.
        settings.benchmark().measured.validate()?;
        Ok(settings)
    }

    fn run_config(&self, duration: Duration, samples: usize) -> RunConfig {
        RunConfig {
            rate_mode: self.rate_mode,
            catch_up_multiple: self.catch_up,
            histogram: self.histogram,
            ..RunConfig::new(self.workers, self.throughput, duration, samples)
        }
    }

    pub fn benchmark(&self) -> Benchmark {
        Benchmark {
            warmup: self
                .warmup
                .map(|warmup| self.run_config(warmup, self.warmup_samples)),
            measured: self.run_config(self.duration, self.samples),
        }
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "workers:        {}", self.workers)?;
        writeln!(f, "throughput:     {} ops/sec ({:?})", self.throughput, self.rate_mode)?;
        writeln!(f, "duration:       {}", humantime::format_duration(self.duration))?;
        match self.warmup {
            Some(w) => writeln!(f, "warmup:         {}", humantime::format_duration(w))?,
            None => writeln!(f, "warmup:         none")?,
        }
        writeln!(f, "samples:        {} (warmup {})", self.samples, self.warmup_samples)?;
        writeln!(f, "catch-up:       {}x", self.catch_up)?;
        writeln!(f, "idle:           {}", self.idle)?;
        writeln!(f, "operation:      {}", self.operation)?;
        if let Some(ref log_file) = self.log_file {
            writeln!(f, "log file:       {}", log_file.display())?;
        }
        if self.write_reports {
            writeln!(f, "out dir:        {}", self.out_dir.display())?;
        }
        write!(
            f,
            "histogram:      max {} ns, {} digits",
            self.histogram.highest_trackable_value, self.histogram.significant_digits
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{OperationSpec, RunFile, Settings};
    use crate::cli::{IdleChoice, OperationChoice, RunParams};
    use pacebench_core::{IdleKind, RateMode};
    use std::{path::PathBuf, time::Duration};

    fn params(throughput: f64) -> RunParams {
        RunParams {
            throughput: Some(throughput),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let s = Settings::resolve(&params(100_000.0), RunFile::default(), 8).unwrap();
        assert_eq!(s.workers, 1);
        assert_eq!(s.duration, Duration::from_secs(240));
        assert_eq!(s.warmup, Some(Duration::from_secs(60)));
        assert_eq!(s.samples, 1_000_000);
        assert_eq!(s.warmup_samples, 50_000);
        assert_eq!(s.catch_up, 3.0);
        assert_eq!(s.rate_mode, RateMode::PerWorker);
        assert_eq!(s.idle, IdleKind::NoOp);
        assert_eq!(s.operation, OperationSpec::Log { payload_len: 64 });
        assert_eq!(s.log_file, Some(PathBuf::from("./latency.log")));
        assert!(s.write_reports);
    }

    #[test]
    fn samples_are_split_between_workers() {
        let mut p = params(1_000.0);
        p.workers = Some(4);
        let s = Settings::resolve(&p, RunFile::default(), 4).unwrap();
        assert_eq!(s.samples, 250_000);
        assert_eq!(s.warmup_samples, 12_500);
        // not enough processors to spin on all of them.
        assert_eq!(s.idle, IdleKind::Yield);
    }

    #[test]
    fn throughput_is_required() {
        let err = Settings::resolve(&RunParams::default(), RunFile::default(), 4).unwrap_err();
        assert!(err.to_string().contains("throughput"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Settings::resolve(&params(0.0), RunFile::default(), 4).is_err());
        assert!(Settings::resolve(&params(-10.0), RunFile::default(), 4).is_err());

        let mut p = params(1_000.0);
        p.workers = Some(0);
        assert!(Settings::resolve(&p, RunFile::default(), 4).is_err());

        let mut p = params(1_000.0);
        p.operation = Some(OperationChoice::Fixed);
        assert!(Settings::resolve(&p, RunFile::default(), 4).is_err());
    }

    #[test]
    fn flags_override_run_file() {
        let file = RunFile::parse(
            r#"
            workers = 2
            throughput = 50000
            rate_mode = "split"
            duration = "30s"
            warmup = "0s"
            idle = "yield"
            operation = "fixed"
            op_latency = "2ms"
            out_dir = "/tmp/latency"

            [histogram]
            highest_trackable = "1s"
            significant_digits = 2
            "#,
        )
        .unwrap();

        let mut p = RunParams::default();
        p.workers = Some(3);
        p.idle = Some(IdleChoice::Noop);

        let s = Settings::resolve(&p, file, 2).unwrap();
        assert_eq!(s.workers, 3);
        assert_eq!(s.throughput, 50_000.0);
        assert_eq!(s.rate_mode, RateMode::Split);
        assert_eq!(s.duration, Duration::from_secs(30));
        assert_eq!(s.warmup, None);
        assert_eq!(s.idle, IdleKind::NoOp);
        assert_eq!(
            s.operation,
            OperationSpec::Fixed {
                latency: Duration::from_millis(2)
            }
        );
        assert_eq!(s.log_file, None);
        assert_eq!(s.out_dir, PathBuf::from("/tmp/latency"));
        assert_eq!(s.histogram.highest_trackable_value, 1_000_000_000);
        assert_eq!(s.histogram.significant_digits, 2);

        let bench = s.benchmark();
        assert!(bench.warmup.is_none());
        assert_eq!(bench.measured.workers, 3);
        assert_eq!(bench.measured.worker_throughput(), 50_000.0 / 3.0);
    }

    #[test]
    fn run_file_rejects_unknown_fields() {
        assert!(RunFile::parse("wokers = 2").is_err());
        assert!(RunFile::parse("duration = 5").is_err());
    }

    #[test]
    fn bad_duration_in_run_file() {
        let file = RunFile::parse(r#"duration = "a while""#).unwrap();
        let err = Settings::resolve(&params(1_000.0), file, 4).unwrap_err();
        assert!(format!("{:#}", err).contains("duration"));
    }
}
