//! Per-operation latency samples shared by every actor of one scenario run.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Highest latency the percentile histogram tracks, in microseconds (10 minutes).
const HISTOGRAM_MAX_US: u64 = 600_000_000;

// =============================================================================
// Metric Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Registration,
    Login,
    RoomCreation,
    RoomJoin,
    ConnectionEstablishment,
    MessageSend,
    MessageReceive,
}

impl MetricKind {
    pub const COUNT: usize = 7;

    /// Every kind, in report order.
    pub const ALL: [MetricKind; Self::COUNT] = [
        MetricKind::Registration,
        MetricKind::Login,
        MetricKind::RoomCreation,
        MetricKind::RoomJoin,
        MetricKind::ConnectionEstablishment,
        MetricKind::MessageSend,
        MetricKind::MessageReceive,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricKind::Registration => "User registration",
            MetricKind::Login => "Login",
            MetricKind::RoomCreation => "Room creation",
            MetricKind::RoomJoin => "Room join",
            MetricKind::ConnectionEstablishment => "WebSocket connection",
            MetricKind::MessageSend => "Message send",
            MetricKind::MessageReceive => "Message receive",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Collector
// =============================================================================

/// Append-only sample store, one independent lane per [`MetricKind`].
///
/// Writers on different kinds never contend; writers on the same kind
/// serialize on that kind's lock only.
pub struct MetricsCollector {
    lanes: [Mutex<Vec<f64>>; MetricKind::COUNT],
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            lanes: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    fn lane(&self, kind: MetricKind) -> MutexGuard<'_, Vec<f64>> {
        // A panicking writer cannot leave a half-pushed f64 behind.
        self.lanes[kind.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one timed operation.
    pub fn add_sample(&self, kind: MetricKind, duration: Duration) {
        self.lane(kind).push(duration.as_secs_f64());
    }

    /// Record a duration already expressed in seconds.
    ///
    /// Negative values (wall-clock skew between sender and receiver) clamp to
    /// zero; non-finite values are dropped.
    pub fn add_sample_secs(&self, kind: MetricKind, seconds: f64) {
        if !seconds.is_finite() {
            warn!("Dropping non-finite {} sample: {}", kind, seconds);
            return;
        }
        self.lane(kind).push(seconds.max(0.0));
    }

    pub fn count(&self, kind: MetricKind) -> usize {
        self.lane(kind).len()
    }

    /// Copy of the samples recorded so far for `kind`, in arrival order.
    pub fn samples(&self, kind: MetricKind) -> Vec<f64> {
        self.lane(kind).clone()
    }

    /// Summary statistics for `kind`, or `None` when nothing was recorded.
    pub fn summarize(&self, kind: MetricKind) -> Option<Summary> {
        Summary::from_samples(&self.samples(kind))
    }

    pub fn report(&self) -> Report {
        Report {
            entries: MetricKind::ALL
                .iter()
                .map(|&kind| ReportEntry {
                    metric: kind,
                    label: kind.label(),
                    summary: self.summarize(kind),
                })
                .collect(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// Descriptive statistics over one kind's samples. All values are seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; absent for a single sample.
    pub stdev: Option<f64>,
    pub p95: f64,
    pub p99: f64,
}

impl Summary {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };
        let stdev = (count > 1).then(|| {
            let variance =
                sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        });
        let (p95, p99) = percentiles(&sorted);

        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            median,
            stdev,
            p95,
            p99,
        })
    }
}

/// p95 and p99 through an HDR histogram at microsecond resolution.
fn percentiles(samples: &[f64]) -> (f64, f64) {
    let mut hist = match Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_US, 3) {
        Ok(hist) => hist,
        Err(e) => {
            warn!("Failed to build latency histogram: {}", e);
            return (f64::NAN, f64::NAN);
        }
    };
    for &sample in samples {
        let micros = (sample * 1_000_000.0).round() as u64;
        hist.saturating_record(micros.clamp(1, HISTOGRAM_MAX_US));
    }
    (
        hist.value_at_quantile(0.95) as f64 / 1_000_000.0,
        hist.value_at_quantile(0.99) as f64 / 1_000_000.0,
    )
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub metric: MetricKind,
    pub label: &'static str,
    pub summary: Option<Summary>,
}

/// Snapshot of every kind's summary in fixed enumeration order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn get(&self, kind: MetricKind) -> Option<&Summary> {
        self.entries
            .iter()
            .find(|entry| entry.metric == kind)
            .and_then(|entry| entry.summary.as_ref())
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let json = sonic_rs::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json).context(format!("Failed to write report: {:?}", path))?;
        Ok(())
    }
}

fn ms(seconds: f64) -> f64 {
    seconds * 1000.0
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════════")?;
        writeln!(f, "                     LATENCY REPORT")?;
        writeln!(f, "═══════════════════════════════════════════════════════════")?;
        for entry in &self.entries {
            writeln!(f)?;
            writeln!(f, "{} (ms):", entry.label)?;
            match &entry.summary {
                Some(s) => {
                    writeln!(f, "  Count:  {}", s.count)?;
                    writeln!(f, "  Min:    {:.2}", ms(s.min))?;
                    writeln!(f, "  Max:    {:.2}", ms(s.max))?;
                    writeln!(f, "  Mean:   {:.2}", ms(s.mean))?;
                    writeln!(f, "  Median: {:.2}", ms(s.median))?;
                    if let Some(stdev) = s.stdev {
                        writeln!(f, "  Stdev:  {:.2}", ms(stdev))?;
                    }
                    writeln!(f, "  p95:    {:.2}", ms(s.p95))?;
                    writeln!(f, "  p99:    {:.2}", ms(s.p99))?;
                }
                None => writeln!(f, "  No data")?,
            }
        }
        writeln!(f)?;
        write!(f, "═══════════════════════════════════════════════════════════")
    }
}
