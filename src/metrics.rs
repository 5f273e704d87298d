//! Per-run measurements.

use serde::Serialize;
use std::time::Duration;

/// Store-side execution statistics parsed from an explain document.
///
/// Each field is `None` when the plan document did not carry it; an unset
/// field is never read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub execution_time_ms: Option<i64>,
    pub total_docs_examined: Option<u64>,
    pub total_keys_examined: Option<u64>,
    pub n_returned: Option<u64>,
}

impl ExecutionStats {
    pub fn is_empty(&self) -> bool {
        self.execution_time_ms.is_none()
            && self.total_docs_examined.is_none()
            && self.total_keys_examined.is_none()
            && self.n_returned.is_none()
    }

    /// `n_returned / total_docs_examined` as a percentage, when both are set
    /// and something was examined.
    pub fn efficiency_pct(&self) -> Option<f64> {
        match (self.n_returned, self.total_docs_examined) {
            (Some(returned), Some(examined)) if examined > 0 => {
                Some(returned as f64 / examined as f64 * 100.0)
            }
            _ => None,
        }
    }
}

/// The outcome of one strategy run. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    duration: Duration,
    records_read: u64,
    memory_used: i64,
    execution_stats: Option<ExecutionStats>,
}

impl Metrics {
    pub fn new(
        duration: Duration,
        records_read: u64,
        memory_used: i64,
        execution_stats: Option<ExecutionStats>,
    ) -> Self {
        Self {
            duration,
            records_read,
            memory_used,
            execution_stats,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Documents actually iterated by the read loop.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Memory delta in bytes. Negative when memory was reclaimed mid-run.
    pub fn memory_used(&self) -> i64 {
        self.memory_used
    }

    pub fn memory_used_mb(&self) -> f64 {
        self.memory_used as f64 / (1024.0 * 1024.0)
    }

    pub fn execution_stats(&self) -> Option<&ExecutionStats> {
        self.execution_stats.as_ref()
    }

    /// Records per second of wall time.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.records_read as f64 / secs
        } else {
            0.0
        }
    }
}

/// Signed difference between two memory samples, never clamped.
pub fn memory_delta(before: u64, after: u64) -> i64 {
    (i128::from(after) - i128::from(before)).clamp(i128::from(i64::MIN), i128::from(i64::MAX))
        as i64
}
