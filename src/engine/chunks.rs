//! Chunked parallel reads.
//!
//! The matching set is split into `skip`/`limit` ranges, one per worker.
//! Workers never talk to each other; each adds its count to one shared
//! atomic total and the coordinator waits for all of them.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::{BenchError, BenchResult};
use crate::logging::SharedSink;
use crate::store::{DocumentStore, Filter, Projection, Stage};

/// How chunk sizes relate to the matching total.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkPolicy {
    /// `chunk_size` as configured. Records past `num_workers * chunk_size`
    /// are not read; the shortfall is reported.
    #[default]
    Fixed,
    /// `chunk_size = ceil(total / num_workers)`, so every record is read.
    CoverAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    pub num_workers: usize,
    pub chunk_size: u64,
    pub policy: ChunkPolicy,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            num_workers: 10,
            chunk_size: 100_000,
            policy: ChunkPolicy::Fixed,
        }
    }
}

/// One worker's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub worker_id: usize,
    pub skip: u64,
    pub limit: u64,
}

impl Chunk {
    /// Nothing to read: the range starts at or past the end.
    pub fn is_idle(&self, total: u64) -> bool {
        self.skip >= total
    }

    /// Records of `total` that fall inside this range.
    pub fn coverage(&self, total: u64) -> u64 {
        total.saturating_sub(self.skip).min(self.limit)
    }

    /// `$match`, `$skip`, `$limit`, `$project`.
    pub fn pipeline(&self, filter: &Filter, projection: &Projection) -> Vec<Stage> {
        vec![
            Stage::Match(filter.clone()),
            Stage::Skip(self.skip),
            Stage::Limit(self.limit),
            Stage::Project(projection.clone()),
        ]
    }
}

/// The full partition of one parallel run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    pub total: u64,
    pub chunk_size: u64,
    pub policy: ChunkPolicy,
    pub chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn new(
        total: u64,
        num_workers: usize,
        chunk_size: u64,
        policy: ChunkPolicy,
    ) -> BenchResult<Self> {
        if num_workers == 0 {
            return Err(BenchError::InvalidArgument(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if chunk_size == 0 {
            return Err(BenchError::InvalidArgument(
                "chunk_size must be at least 1".to_string(),
            ));
        }

        let chunk_size = match policy {
            ChunkPolicy::Fixed => chunk_size,
            ChunkPolicy::CoverAll => total.div_ceil(num_workers as u64).max(1),
        };

        let chunks = (0..num_workers)
            .map(|worker_id| Chunk {
                worker_id,
                skip: (worker_id as u64).saturating_mul(chunk_size),
                limit: chunk_size,
            })
            .collect();

        Ok(Self {
            total,
            chunk_size,
            policy,
            chunks,
        })
    }

    /// Records some chunk will read.
    pub fn covered(&self) -> u64 {
        self.chunks.iter().map(|c| c.coverage(self.total)).sum()
    }

    /// Records past the last chunk. Zero under `CoverAll`.
    pub fn uncovered(&self) -> u64 {
        self.total.saturating_sub(self.covered())
    }

    pub fn active_workers(&self) -> usize {
        self.chunks.iter().filter(|c| !c.is_idle(self.total)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Completed,
    Idle,
    /// Opening or reading the cursor failed; the partial count was kept.
    Failed(String),
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub chunk: Chunk,
    pub records_read: u64,
    pub status: WorkerStatus,
}

/// Result of one coordinated parallel read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParallelOutcome {
    pub plan: ChunkPlan,
    /// Sum of every worker's contribution.
    pub records_read: u64,
    /// Matching records no chunk covered.
    pub uncovered: u64,
    /// Sorted by worker id.
    pub workers: Vec<WorkerReport>,
}

impl ParallelOutcome {
    pub fn failed_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| matches!(w.status, WorkerStatus::Failed(_) | WorkerStatus::Panicked(_)))
            .count()
    }

    /// Matching records that were not read, for any reason.
    pub fn shortfall(&self) -> u64 {
        self.plan.total.saturating_sub(self.records_read)
    }
}

/// Fans a filtered read out over concurrent workers.
pub struct ChunkCoordinator {
    store: Arc<dyn DocumentStore>,
    sink: SharedSink,
    settings: ParallelSettings,
    batch_size: Option<u32>,
}

impl ChunkCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sink: SharedSink,
        settings: ParallelSettings,
    ) -> Self {
        Self {
            store,
            sink,
            settings,
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: Option<u32>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Count, partition, dispatch, join.
    ///
    /// Only the count and argument validation can fail the run. Worker
    /// failures are logged and reflected in the per-worker reports.
    pub async fn run_parallel(
        &self,
        filter: &Filter,
        projection: &Projection,
    ) -> BenchResult<ParallelOutcome> {
        let total = self.store.count(filter).await?;
        let plan = ChunkPlan::new(
            total,
            self.settings.num_workers,
            self.settings.chunk_size,
            self.settings.policy,
        )?;

        self.sink.write_line(&format!(
            "Matching records: {} | workers: {} | chunk size: {} | active workers: {}",
            total,
            plan.chunks.len(),
            plan.chunk_size,
            plan.active_workers()
        ));

        let uncovered = plan.uncovered();
        if uncovered > 0 {
            tracing::warn!(
                "Chunk plan leaves {} of {} records unread",
                uncovered,
                total
            );
            self.sink.write_line(&format!(
                "  WARNING: partition gap: {} workers x {} = {} records covered, \
                 {} of {} matching records will not be read",
                plan.chunks.len(),
                plan.chunk_size,
                plan.covered(),
                uncovered,
                total
            ));
        }

        let total_read = Arc::new(AtomicU64::new(0));
        let mut set = JoinSet::new();

        for chunk in plan.chunks.iter().copied() {
            let store = self.store.clone();
            let sink = self.sink.clone();
            let total_read = total_read.clone();
            let pipeline = chunk.pipeline(filter, projection);
            let batch_size = self.batch_size;

            set.spawn(async move {
                let worker = run_worker(
                    store,
                    chunk,
                    total,
                    pipeline,
                    batch_size,
                    total_read,
                    sink.clone(),
                );
                match AssertUnwindSafe(worker).catch_unwind().await {
                    Ok(report) => report,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!("Worker {} panicked: {}", chunk.worker_id, message);
                        sink.write_line(&format!(
                            "  Worker {} panicked: {}",
                            chunk.worker_id, message
                        ));
                        WorkerReport {
                            chunk,
                            records_read: 0,
                            status: WorkerStatus::Panicked(message),
                        }
                    }
                }
            });
        }

        let mut workers = Vec::with_capacity(plan.chunks.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => workers.push(report),
                Err(e) => tracing::error!("Worker task did not complete: {}", e),
            }
        }
        workers.sort_by_key(|w| w.chunk.worker_id);

        Ok(ParallelOutcome {
            records_read: total_read.load(Ordering::SeqCst),
            uncovered,
            workers,
            plan,
        })
    }
}

async fn run_worker(
    store: Arc<dyn DocumentStore>,
    chunk: Chunk,
    total: u64,
    pipeline: Vec<Stage>,
    batch_size: Option<u32>,
    total_read: Arc<AtomicU64>,
    sink: SharedSink,
) -> WorkerReport {
    if chunk.is_idle(total) {
        tracing::debug!("Worker {} idle (skip {} >= {})", chunk.worker_id, chunk.skip, total);
        return WorkerReport {
            chunk,
            records_read: 0,
            status: WorkerStatus::Idle,
        };
    }

    let mut cursor = match store.aggregate(&pipeline, batch_size).await {
        Ok(cursor) => cursor,
        Err(e) => {
            tracing::warn!("Worker {} could not open its cursor: {}", chunk.worker_id, e);
            sink.write_line(&format!("  Worker {} error: {}", chunk.worker_id, e));
            return WorkerReport {
                chunk,
                records_read: 0,
                status: WorkerStatus::Failed(e.to_string()),
            };
        }
    };

    let mut local = 0u64;
    let mut failure = None;
    while let Some(item) = cursor.next().await {
        match item.and_then(|raw| raw.decode()) {
            Ok(_) => local += 1,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    total_read.fetch_add(local, Ordering::SeqCst);

    match failure {
        None => {
            sink.write_line(&format!(
                "  Worker {} done: {} records (skip {})",
                chunk.worker_id, local, chunk.skip
            ));
            WorkerReport {
                chunk,
                records_read: local,
                status: WorkerStatus::Completed,
            }
        }
        Some(e) => {
            tracing::warn!(
                "Worker {} stopped after {} records: {}",
                chunk.worker_id,
                local,
                e
            );
            sink.write_line(&format!(
                "  Worker {} stopped after {} records: {}",
                chunk.worker_id, local, e
            ));
            WorkerReport {
                chunk,
                records_read: local,
                status: WorkerStatus::Failed(e.to_string()),
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
