//! Latency histograms: per-worker recording, cross-worker merging and percentile output.
//!
//! The quantile math itself is delegated to [`hdrhistogram`]. This module fixes the shape of the
//! histograms used by a run (trackable range and precision), merges the per-worker histograms of
//! a run into a single result tagged with the run's wall-clock window, and renders the result as
//! a percentile distribution table in the classic HdrHistogram plain-text layout.

use std::{
    io::{self, Write},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context as _;
use hdrhistogram::Histogram;

use crate::error::ConfigError;

/// Largest latency recorded exactly by default: 10 seconds, in nanoseconds.
pub const DEFAULT_HIGHEST_TRACKABLE_VALUE: u64 = 10_000_000_000;

/// Default number of significant decimal digits kept per recorded value.
pub const DEFAULT_SIGNIFICANT_DIGITS: u8 = 3;

/// Quantile steps per halving of the distance to 100%, used by the text report.
pub const DEFAULT_TICKS_PER_HALF_DISTANCE: u32 = 5;

/// Range and precision shared by every histogram of a run. Histograms may only be merged if
/// their configurations match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistogramConfig {
    /// Values above this are clamped to it when recorded.
    pub highest_trackable_value: u64,
    pub significant_digits: u8,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        HistogramConfig {
            highest_trackable_value: DEFAULT_HIGHEST_TRACKABLE_VALUE,
            significant_digits: DEFAULT_SIGNIFICANT_DIGITS,
        }
    }
}

impl HistogramConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.significant_digits > 5 {
            return Err(ConfigError::InvalidHistogram(format!(
                "significant digits must be at most 5, got {}",
                self.significant_digits
            )));
        }
        if self.highest_trackable_value < 2 {
            return Err(ConfigError::InvalidHistogram(format!(
                "highest trackable value must be at least 2, got {}",
                self.highest_trackable_value
            )));
        }
        Ok(())
    }

    /// Create an empty histogram with this configuration.
    pub fn build(&self) -> Result<LatencyHistogram, ConfigError> {
        self.validate()?;
        let inner = Histogram::<u64>::new_with_max(
            self.highest_trackable_value,
            self.significant_digits,
        )
        .map_err(|e| ConfigError::InvalidHistogram(format!("{:?}", e)))?;
        Ok(LatencyHistogram {
            inner,
            config: *self,
        })
    }

    /// The number of sub-buckets per bucket implied by the precision.
    pub fn sub_bucket_count(&self) -> u64 {
        let largest_single_unit_resolution = 2 * 10u64.pow(self.significant_digits as u32);
        largest_single_unit_resolution.next_power_of_two()
    }

    /// The number of power-of-two buckets needed to cover the trackable range.
    pub fn bucket_count(&self) -> u32 {
        let mut smallest_untrackable = self.sub_bucket_count();
        let mut buckets = 1;
        while smallest_untrackable <= self.highest_trackable_value {
            if smallest_untrackable > u64::MAX / 2 {
                return buckets + 1;
            }
            smallest_untrackable <<= 1;
            buckets += 1;
        }
        buckets
    }
}

/// A histogram of latencies in nanoseconds, written by exactly one worker.
#[derive(Clone, Debug)]
pub struct LatencyHistogram {
    inner: Histogram<u64>,
    config: HistogramConfig,
}

impl LatencyHistogram {
    /// Record one latency sample, clamping it to the trackable range.
    #[inline]
    pub fn record(&mut self, nanos: u64) {
        self.inner.saturating_record(nanos);
    }

    /// Add every value recorded in `other` to this histogram.
    pub fn merge(&mut self, other: &LatencyHistogram) -> anyhow::Result<()> {
        if self.config != other.config {
            anyhow::bail!(
                "cannot merge histograms with different configurations: {:?} and {:?}",
                self.config,
                other.config
            );
        }
        self.inner
            .add(&other.inner)
            .map_err(|e| anyhow::anyhow!("{:?}", e))
            .context("histogram merge failed")
    }

    pub fn config(&self) -> HistogramConfig {
        self.config
    }

    /// Number of recorded samples.
    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn value_at_quantile(&self, quantile: f64) -> u64 {
        self.inner.value_at_quantile(quantile)
    }

    pub fn mean(&self) -> f64 {
        self.inner.mean()
    }

    pub fn stdev(&self) -> f64 {
        self.inner.stdev()
    }

    pub fn min(&self) -> u64 {
        self.inner.min()
    }

    pub fn max(&self) -> u64 {
        self.inner.max()
    }

    /// Access the underlying histogram.
    pub fn inner(&self) -> &Histogram<u64> {
        &self.inner
    }
}

/// One line of a percentile distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PercentileRow {
    /// Latency bound in nanoseconds.
    pub value: u64,
    /// Fraction of samples at or below `value`, in `0.0..=1.0`.
    pub quantile: f64,
    /// Number of samples at or below `value`.
    pub total_count: u64,
}

impl PercentileRow {
    /// `1 / (1 - quantile)`, infinite for the last row.
    pub fn inverse(&self) -> f64 {
        1.0 / (1.0 - self.quantile)
    }
}

/// The merged histogram of one run, tagged with the wall-clock window of the run.
///
/// The window is metadata: samples are not filtered by it. The final batch of each worker is
/// always included even when it crossed the end of the window.
#[derive(Clone, Debug)]
pub struct RunHistogram {
    histogram: LatencyHistogram,
    start: SystemTime,
    end: SystemTime,
}

impl RunHistogram {
    pub fn new(
        config: HistogramConfig,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<Self, ConfigError> {
        Ok(RunHistogram {
            histogram: config.build()?,
            start,
            end,
        })
    }

    /// Create a result histogram for `[start, end)` and fold every given histogram into it.
    pub fn merge_all<'a>(
        config: HistogramConfig,
        start: SystemTime,
        end: SystemTime,
        histograms: impl IntoIterator<Item = &'a LatencyHistogram>,
    ) -> anyhow::Result<Self> {
        let mut result = Self::new(config, start, end)?;
        for h in histograms {
            result.add(h)?;
        }
        Ok(result)
    }

    pub fn add(&mut self, histogram: &LatencyHistogram) -> anyhow::Result<()> {
        self.histogram.merge(histogram)
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    pub fn start(&self) -> SystemTime {
        self.start
    }

    pub fn end(&self) -> SystemTime {
        self.end
    }

    /// Length of the window, zero if the end precedes the start.
    pub fn window(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }

    /// The percentile distribution, stepping `ticks_per_half_distance` times per halving of the
    /// remaining distance to 100%.
    pub fn percentile_distribution(&self, ticks_per_half_distance: u32) -> Vec<PercentileRow> {
        if self.histogram.is_empty() {
            return Vec::new();
        }
        let mut total_count = 0;
        self.histogram
            .inner
            .iter_quantiles(ticks_per_half_distance)
            .map(|v| {
                total_count += v.count_since_last_iteration();
                PercentileRow {
                    value: v.value_iterated_to(),
                    quantile: v.quantile_iterated_to(),
                    total_count,
                }
            })
            .collect()
    }

    /// Write the percentile distribution as a plain-text table, dividing every value by
    /// `output_scale` (1000.0 for microseconds).
    pub fn write_percentile_distribution<W: Write>(
        &self,
        w: &mut W,
        output_scale: f64,
    ) -> io::Result<()> {
        let digits = self.histogram.config.significant_digits as usize;
        writeln!(
            w,
            "#[StartTime: {:.3} (seconds since epoch), EndTime: {:.3}]",
            epoch_secs(self.start),
            epoch_secs(self.end),
        )?;
        writeln!(
            w,
            "{:>12} {:>14} {:>10} {:>14}\n",
            "Value", "Percentile", "TotalCount", "1/(1-Percentile)"
        )?;

        for row in self.percentile_distribution(DEFAULT_TICKS_PER_HALF_DISTANCE) {
            let value = row.value as f64 / output_scale;
            if row.quantile < 1.0 {
                writeln!(
                    w,
                    "{:12.digits$} {:2.12} {:10} {:14.2}",
                    value,
                    row.quantile,
                    row.total_count,
                    row.inverse(),
                )?;
            } else {
                writeln!(
                    w,
                    "{:12.digits$} {:2.12} {:10}",
                    value, row.quantile, row.total_count,
                )?;
            }
        }

        let h = &self.histogram;
        let (mean, stdev) = if h.is_empty() {
            (0.0, 0.0)
        } else {
            (h.mean() / output_scale, h.stdev() / output_scale)
        };
        writeln!(
            w,
            "#[Mean    = {:12.digits$}, StdDeviation   = {:12.digits$}]",
            mean, stdev,
        )?;
        writeln!(
            w,
            "#[Max     = {:12.digits$}, Total count    = {:12}]",
            h.max() as f64 / output_scale,
            h.len(),
        )?;
        writeln!(
            w,
            "#[Buckets = {:12}, SubBuckets     = {:12}]",
            h.config.bucket_count(),
            h.config.sub_bucket_count(),
        )
    }
}

fn epoch_secs(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::{HistogramConfig, RunHistogram};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn config_validation() {
        assert!(HistogramConfig::default().build().is_ok());
        let bad_digits = HistogramConfig {
            significant_digits: 6,
            ..Default::default()
        };
        assert!(bad_digits.build().is_err());
        let bad_max = HistogramConfig {
            highest_trackable_value: 1,
            ..Default::default()
        };
        assert!(bad_max.build().is_err());
    }

    #[test]
    fn bucket_layout_for_defaults() {
        let config = HistogramConfig::default();
        assert_eq!(config.sub_bucket_count(), 2048);
        // 2048 * 2^23 is the first power-of-two multiple above 10s.
        assert_eq!(config.bucket_count(), 24);
    }

    #[test]
    fn oversized_values_are_clamped() {
        let config = HistogramConfig {
            highest_trackable_value: 1_000,
            significant_digits: 3,
        };
        let mut h = config.build().unwrap();
        h.record(1_000_000);
        assert_eq!(h.len(), 1);
        assert!(h.max() <= 1_001);
    }

    #[test]
    fn merge_requires_matching_config() {
        let mut a = HistogramConfig::default().build().unwrap();
        let b = HistogramConfig {
            significant_digits: 2,
            ..Default::default()
        }
        .build()
        .unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn window_is_metadata() {
        let start = UNIX_EPOCH + Duration::from_secs(100);
        let end = start + Duration::from_millis(1500);
        let run = RunHistogram::new(HistogramConfig::default(), start, end).unwrap();
        assert_eq!(run.window(), Duration::from_millis(1500));
        assert_eq!(run.start(), start);
        assert_eq!(run.end(), end);

        let backwards = RunHistogram::new(HistogramConfig::default(), end, start).unwrap();
        assert_eq!(backwards.window(), Duration::ZERO);
    }

    #[test]
    fn distribution_table_layout() {
        let config = HistogramConfig::default();
        let mut h = config.build().unwrap();
        for v in 1..=1000u64 {
            h.record(v * 1_000);
        }
        let start = UNIX_EPOCH + Duration::from_secs(1);
        let run =
            RunHistogram::merge_all(config, start, start + Duration::from_secs(1), [&h]).unwrap();

        let rows = run.percentile_distribution(5);
        let last = rows.last().unwrap();
        assert!(last.quantile > 0.999);
        assert_eq!(last.total_count, 1000);
        assert!(rows.windows(2).all(|w| w[0].value <= w[1].value));

        let mut out = Vec::new();
        run.write_percentile_distribution(&mut out, 1000.0).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("#[StartTime: 1.000"));
        assert!(lines[1].contains("Percentile"));
        assert!(lines[1].contains("1/(1-Percentile)"));
        assert!(text.contains("#[Mean    = "));
        assert!(text.contains("Total count    =         1000]"));
        assert!(text.contains("#[Buckets =           24, SubBuckets     =         2048]"));
    }
}
