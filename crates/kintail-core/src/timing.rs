//! Opt-in latency accounting for calls into the shard source.
//!
//! Enabled with `--timing` or `KINTAIL_TIMING=1`. Samples are kept per
//! operation name for the whole process and summarised once at exit.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static ENABLED: AtomicBool = AtomicBool::new(false);
static SAMPLES: Mutex<BTreeMap<&'static str, Vec<Duration>>> = Mutex::new(BTreeMap::new());

/// Summary of one instrumented operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpTiming {
    pub name: &'static str,
    pub count: usize,
    pub total: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// Per-operation summaries, sorted by operation name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingReport {
    pub operations: Vec<OpTiming>,
}

/// `true` when `KINTAIL_TIMING` is `1`, `true`, `yes` or `on`.
#[must_use]
pub fn enabled_from_env() -> bool {
    std::env::var("KINTAIL_TIMING").is_ok_and(|value| {
        ["1", "true", "yes", "on"]
            .iter()
            .any(|truthy| value.eq_ignore_ascii_case(truthy))
    })
}

pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

#[must_use]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Run `f`, recording its wall time under `name` when timing is enabled.
pub fn timed<R>(name: &'static str, f: impl FnOnce() -> R) -> R {
    if !is_enabled() {
        return f();
    }
    let started = Instant::now();
    let result = f();
    record(name, started.elapsed());
    result
}

fn record(name: &'static str, elapsed: Duration) {
    if let Ok(mut samples) = SAMPLES.lock() {
        samples.entry(name).or_default().push(elapsed);
    }
}

/// Drain all samples into a report.
#[must_use]
pub fn take_report() -> TimingReport {
    let drained = SAMPLES
        .lock()
        .map(|mut samples| std::mem::take(&mut *samples))
        .unwrap_or_default();

    let operations = drained
        .into_iter()
        .map(|(name, mut values)| {
            values.sort_unstable();
            OpTiming {
                name,
                count: values.len(),
                total: values.iter().sum(),
                p50: nearest_rank(&values, 50),
                p95: nearest_rank(&values, 95),
                p99: nearest_rank(&values, 99),
                max: values.last().copied().unwrap_or_default(),
            }
        })
        .collect();

    TimingReport { operations }
}

impl TimingReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Plain-text table for stderr.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "{:<24} {:>7} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
            "operation", "count", "total", "p50", "p95", "p99", "max"
        );
        for op in &self.operations {
            let _ = writeln!(
                out,
                "{:<24} {:>7} {:>10} {:>10} {:>10} {:>10} {:>10}",
                op.name,
                op.count,
                format!("{:.1?}", op.total),
                format!("{:.1?}", op.p50),
                format!("{:.1?}", op.p95),
                format!("{:.1?}", op.p99),
                format!("{:.1?}", op.max),
            );
        }
        out
    }
}

fn nearest_rank(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (pct.min(100) * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
