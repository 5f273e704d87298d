//! Human-readable report blocks written through a [`ReportSink`].

use std::time::Duration;

use crate::engine::{ParallelOutcome, Strategy, StrategyRun, WorkerStatus};
use crate::logging::ReportSink;
use crate::metrics::Metrics;
use crate::plan::{self, PlanAnalysis, ScanClassification};

const RULE_WIDTH: usize = 50;

pub fn format_duration(d: Duration) -> String {
    if d.as_secs() > 0 {
        format!("{:.2}s", d.as_secs_f64())
    } else if d.as_millis() > 0 {
        format!("{:.2}ms", d.as_secs_f64() * 1000.0)
    } else {
        format!("{:.2}µs", d.as_secs_f64() * 1_000_000.0)
    }
}

fn format_rate(records: u64, d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs <= 0.0 {
        return "n/a".to_string();
    }
    let rate = records as f64 / secs;
    if rate >= 1_000_000.0 {
        format!("{:.2}M rec/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2}K rec/s", rate / 1_000.0)
    } else {
        format!("{:.2} rec/s", rate)
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

impl Metrics {
    /// Per-run metrics block, including efficiency scoring of the store's
    /// execution statistics.
    pub fn report(&self, label: &str, sink: &dyn ReportSink) {
        sink.write_line("");
        sink.write_line(&format!("=== PERFORMANCE METRICS - {} ===", label));
        sink.write_line(&format!("Total time: {}", format_duration(self.duration())));
        sink.write_line(&format!("Records read: {}", self.records_read()));
        sink.write_line(&format!(
            "Throughput: {}",
            format_rate(self.records_read(), self.duration())
        ));
        sink.write_line(&format!("Memory used: {:.2} MB", self.memory_used_mb()));

        if let Some(stats) = self.execution_stats() {
            sink.write_line("Store execution statistics:");
            sink.write_line(&format!(
                "  Execution time: {} ms",
                or_na(stats.execution_time_ms)
            ));
            sink.write_line(&format!(
                "  Documents examined: {}",
                or_na(stats.total_docs_examined)
            ));
            sink.write_line(&format!(
                "  Keys examined: {}",
                or_na(stats.total_keys_examined)
            ));
            sink.write_line(&format!("  Documents returned: {}", or_na(stats.n_returned)));

            if let Some(pct) = stats.efficiency_pct() {
                sink.write_line(&format!("  Efficiency: {:.2}%", pct));
            }
            for warning in plan::stats_warnings(stats) {
                sink.write_line(&format!("  WARNING: {}", warning));
            }
        }
        sink.write_line(&rule());
    }
}

impl PlanAnalysis {
    /// Explain block: statistics and warnings, the winning stage and index,
    /// then the explain document itself.
    pub fn report(&self, label: &str, sink: &dyn ReportSink) {
        sink.write_line("");
        sink.write_line(&format!("=== EXPLAIN RESULTS - {} ===", label));

        if !self.stats.is_empty() {
            sink.write_line("Execution statistics:");
            sink.write_line(&format!(
                "  Execution time: {} ms",
                or_na(self.stats.execution_time_ms)
            ));
            sink.write_line(&format!(
                "  Documents examined: {}",
                or_na(self.stats.total_docs_examined)
            ));
            sink.write_line(&format!(
                "  Keys examined: {}",
                or_na(self.stats.total_keys_examined)
            ));
            sink.write_line(&format!(
                "  Documents returned: {}",
                or_na(self.stats.n_returned)
            ));
            for warning in &self.warnings {
                sink.write_line(&format!("  WARNING: {}", warning));
            }
        }

        sink.write_line("Query plan:");
        sink.write_line(&format!(
            "  Stage: {} ({})",
            self.winning_stage.as_deref().unwrap_or("n/a"),
            self.classification
        ));
        match self.classification {
            ScanClassification::FullScan => {
                sink.write_line("  WARNING: collection scan examines every document");
                sink.write_line("  An index on the filtered field may be needed");
            }
            ScanClassification::IndexScan | ScanClassification::IndexFetch => {
                sink.write_line("  Index in use");
            }
            ScanClassification::Unknown => {}
        }
        if let Some(index) = &self.index_name {
            sink.write_line(&format!("  Index: {}", index));
        }
        if !self.pipeline_stages.is_empty() {
            sink.write_line("Pipeline stages:");
            for (i, stage) in self.pipeline_stages.iter().enumerate() {
                sink.write_line(&format!("  Stage {}: {}", i + 1, stage));
            }
        }
        if let Ok(text) = serde_json::to_string_pretty(&self.document) {
            sink.write_line("Full explain output:");
            for line in text.lines() {
                sink.write_line(line);
            }
        }
        sink.write_line(&rule());
    }
}

impl ParallelOutcome {
    /// Per-worker summary of a parallel run.
    pub fn report(&self, sink: &dyn ReportSink) {
        sink.write_line("");
        sink.write_line(&format!(
            "Parallel read: {} workers, chunk size {}, {:?} policy",
            self.plan.chunks.len(),
            self.plan.chunk_size,
            self.plan.policy
        ));
        for worker in &self.workers {
            let status = match &worker.status {
                WorkerStatus::Completed => "done".to_string(),
                WorkerStatus::Idle => "idle".to_string(),
                WorkerStatus::Failed(e) => format!("failed: {}", e),
                WorkerStatus::Panicked(e) => format!("panicked: {}", e),
            };
            sink.write_line(&format!(
                "  Worker {:>2} | skip {:>10} | limit {:>8} | read {:>8} | {}",
                worker.chunk.worker_id,
                worker.chunk.skip,
                worker.chunk.limit,
                worker.records_read,
                status
            ));
        }
        sink.write_line(&format!(
            "Matching: {} | read: {} | uncovered by chunks: {} | failed workers: {}",
            self.plan.total,
            self.records_read,
            self.uncovered,
            self.failed_workers()
        ));
        if self.records_read != self.plan.total {
            sink.write_line(&format!(
                "  WARNING: read {} of {} matching records ({} missing)",
                self.records_read,
                self.plan.total,
                self.shortfall()
            ));
        }
    }
}

/// One row of the comparison table.
#[derive(Debug, Clone)]
pub struct ComparisonRow {
    pub strategy: Strategy,
    pub duration: Duration,
    pub records_read: u64,
    pub memory_used_mb: f64,
    pub scan: Option<ScanClassification>,
    /// Baseline duration divided by this duration.
    pub speedup: Option<f64>,
}

/// Side-by-side results of several strategies over the same filter.
#[derive(Debug, Clone, Default)]
pub struct ComparisonReport {
    rows: Vec<ComparisonRow>,
}

impl ComparisonReport {
    /// Build rows, measuring speed-up against the full-materialize run when
    /// one is present.
    pub fn from_runs(runs: &[StrategyRun]) -> Self {
        let baseline = runs
            .iter()
            .find(|r| r.strategy == Strategy::FullMaterialize)
            .map(|r| r.metrics.duration());

        let rows = runs
            .iter()
            .map(|run| {
                let duration = run.metrics.duration();
                ComparisonRow {
                    strategy: run.strategy,
                    duration,
                    records_read: run.metrics.records_read(),
                    memory_used_mb: run.metrics.memory_used_mb(),
                    scan: run.analysis.as_ref().map(|a| a.classification),
                    speedup: baseline
                        .filter(|_| !duration.is_zero())
                        .map(|b| b.as_secs_f64() / duration.as_secs_f64()),
                }
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[ComparisonRow] {
        &self.rows
    }

    /// Non-parallel strategies whose record counts disagree with the first
    /// non-parallel row.
    pub fn mismatches(&self) -> Vec<&ComparisonRow> {
        let mut single = self.rows.iter().filter(|r| !r.strategy.is_parallel());
        let Some(reference) = single.next() else {
            return Vec::new();
        };
        single
            .filter(|r| r.records_read != reference.records_read)
            .collect()
    }

    pub fn render(&self, sink: &dyn ReportSink) {
        sink.write_line("");
        sink.write_line("=== STRATEGY COMPARISON ===");
        sink.write_line(&format!(
            "  {:<22} {:>10} {:>10} {:>12} {:<12} {:>8}",
            "strategy", "time", "records", "memory MB", "scan", "speedup"
        ));
        for row in &self.rows {
            sink.write_line(&format!(
                "  {:<22} {:>10} {:>10} {:>12.2} {:<12} {:>8}",
                row.strategy.label(),
                format_duration(row.duration),
                row.records_read,
                row.memory_used_mb,
                row.scan.map(|s| s.to_string()).unwrap_or_else(|| "n/a".to_string()),
                row.speedup
                    .map(|s| format!("{:.2}x", s))
                    .unwrap_or_else(|| "n/a".to_string()),
            ));
        }

        let mismatches = self.mismatches();
        if let Some(reference) = self.rows.iter().find(|r| !r.strategy.is_parallel()) {
            for row in mismatches {
                sink.write_line(&format!(
                    "  WARNING: {} read {} records, {} read {}",
                    row.strategy, row.records_read, reference.strategy, reference.records_read
                ));
            }
        }
        sink.write_line(&rule());
    }
}
