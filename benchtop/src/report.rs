use anyhow::{Context as _, Result};
use pacebench_core::{RunHistogram, RunResult};
use std::{
    fs::File,
    io::{self, BufWriter, Write as _},
    path::{Path, PathBuf},
};

/// Histogram values are nanoseconds; reports are in microseconds.
pub const OUTPUT_SCALE: f64 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Service,
    Response,
}

impl Kind {
    fn suffix(self) -> char {
        match self {
            Kind::Service => 's',
            Kind::Response => 'r',
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::Service => "service time",
            Kind::Response => "response time",
        }
    }
}

/// The report file name for a run at `throughput` ops/sec: the rate in thousands, then `k`
/// and `s` or `r`.
pub fn file_name(throughput: f64, kind: Kind) -> String {
    format!("{}k{}", (throughput / 1000.0) as u64, kind.suffix())
}

/// Write the service and response time distributions of `result` into `out_dir`.
pub fn write_reports(result: &RunResult, out_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;

    let mut written = Vec::with_capacity(2);
    for (kind, histogram) in [
        (Kind::Service, &result.service),
        (Kind::Response, &result.response),
    ] {
        let path = out_dir.join(file_name(result.config.throughput, kind));
        write_report(histogram, &path)
            .with_context(|| format!("cannot write {} to {}", kind.name(), path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn write_report(histogram: &RunHistogram, path: &Path) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    histogram.write_percentile_distribution(&mut out, OUTPUT_SCALE)?;
    out.flush()
}

/// Print the distributions of `result` to stdout.
pub fn print(result: &RunResult) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (kind, histogram) in [
        (Kind::Service, &result.service),
        (Kind::Response, &result.response),
    ] {
        writeln!(out, "\n{} (us):", kind.name())?;
        histogram.write_percentile_distribution(&mut out, OUTPUT_SCALE)?;
    }
    Ok(())
}

/// A few quantiles of both distributions, in human units.
pub fn print_summary(result: &RunResult) {
    println!(
        "{}: {} ops in {:?}, {:.0} ops/sec",
        result.label,
        result.total_samples(),
        result.elapsed,
        result.achieved_throughput(),
    );
    for (kind, histogram) in [
        (Kind::Service, &result.service),
        (Kind::Response, &result.response),
    ] {
        let h = histogram.histogram();
        println!("  {}:", kind.name());
        for q in [0.5, 0.9, 0.99, 0.999, 0.9999] {
            println!("    {}th: {}", q * 100.0, pretty_display_ns(h.value_at_quantile(q)));
        }
        println!("    max: {}", pretty_display_ns(h.max()));
        println!("    mean: {}", pretty_display_ns(h.mean() as u64));
    }
    let behind = result
        .workers
        .iter()
        .filter(|w| w.pacer_state == pacebench_core::PacerState::CatchingUp)
        .count();
    if behind > 0 {
        println!(
            "  {} of {} workers were behind schedule at the end",
            behind,
            result.workers.len()
        );
    }
}

pub fn pretty_display_ns(ns: u64) -> String {
    // preserve 3 sig figs at minimum.
    let (val, unit) = if ns > 100 * 1_000_000_000 {
        (ns / 1_000_000_000, "s")
    } else if ns > 100 * 1_000_000 {
        (ns / 1_000_000, "ms")
    } else if ns > 100 * 1_000 {
        (ns / 1_000, "us")
    } else {
        (ns, "ns")
    };

    format!("{val} {unit}")
}
