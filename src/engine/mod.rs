//! Strategy execution and measurement.
//!
//! Every strategy follows the same skeleton: explain the exact read about to
//! run, analyze the plan, perform the read between two memory samples, then
//! build and report [`Metrics`]. Strategies differ only in the read shape.

pub mod chunks;
pub mod memory;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{BenchError, BenchResult};
use crate::logging::SharedSink;
use crate::metrics::{memory_delta, Metrics};
use crate::plan::{self, PlanAnalysis};
use crate::store::{
    DocumentCursor, DocumentStore, ExplainCommand, Filter, FindOptions, Projection, RawDocument,
    Stage,
};

pub use chunks::{
    Chunk, ChunkCoordinator, ChunkPlan, ChunkPolicy, ParallelOutcome, ParallelSettings,
    WorkerReport, WorkerStatus,
};
pub use memory::{MemorySampler, ProcessMemorySampler, ScriptedSampler};

pub const DEFAULT_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;

/// Fields read by the projected strategies when none are given.
pub fn default_projection() -> Projection {
    Projection::fields(["userId", "status"]).without_id()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    FullMaterialize,
    CursorStreaming,
    ProjectedStreaming,
    IndexedAggregation,
    ParallelChunked,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::FullMaterialize,
        Strategy::CursorStreaming,
        Strategy::ProjectedStreaming,
        Strategy::IndexedAggregation,
        Strategy::ParallelChunked,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Strategy::FullMaterialize => "full-materialize",
            Strategy::CursorStreaming => "cursor-streaming",
            Strategy::ProjectedStreaming => "projected-streaming",
            Strategy::IndexedAggregation => "indexed-aggregation",
            Strategy::ParallelChunked => "parallel-chunked",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Strategy::FullMaterialize => "buffer the entire result before processing",
            Strategy::CursorStreaming => "iterate the cursor one record at a time",
            Strategy::ProjectedStreaming => "stream a field subset in fixed-size batches",
            Strategy::IndexedAggregation => "$match + $project aggregation pipeline",
            Strategy::ParallelChunked => "skip/limit chunks read by concurrent workers",
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Strategy::ParallelChunked)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Strategy {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.label() == s)
            .ok_or_else(|| BenchError::InvalidArgument(format!("unknown strategy '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub batch_size: u32,
    /// Emit a progress line every N records; 0 disables.
    pub progress_interval: u64,
    pub parallel: ParallelSettings,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            parallel: ParallelSettings::default(),
        }
    }
}

/// Everything one strategy run produced.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    pub strategy: Strategy,
    pub metrics: Metrics,
    /// `None` when explain failed.
    pub analysis: Option<PlanAnalysis>,
    pub parallel: Option<ParallelOutcome>,
}

/// How a strategy reads.
enum ReadShape {
    Find { options: FindOptions, buffered: bool },
    Aggregate { pipeline: Vec<Stage>, batch_size: u32 },
    Parallel { projection: Projection, batch_size: u32 },
}

impl ReadShape {
    fn for_strategy(
        strategy: Strategy,
        filter: &Filter,
        projection: Option<Projection>,
        batch_size: u32,
    ) -> Self {
        let projection = projection.unwrap_or_else(default_projection);
        match strategy {
            Strategy::FullMaterialize => ReadShape::Find {
                options: FindOptions::new(),
                buffered: true,
            },
            Strategy::CursorStreaming => ReadShape::Find {
                options: FindOptions::new(),
                buffered: false,
            },
            Strategy::ProjectedStreaming => ReadShape::Find {
                options: FindOptions::new()
                    .projection(projection)
                    .batch_size(batch_size),
                buffered: false,
            },
            Strategy::IndexedAggregation => ReadShape::Aggregate {
                pipeline: vec![Stage::Match(filter.clone()), Stage::Project(projection)],
                batch_size,
            },
            Strategy::ParallelChunked => ReadShape::Parallel {
                projection,
                batch_size,
            },
        }
    }

    /// The explain command for exactly this read.
    fn explain_command(&self, collection: &str, filter: &Filter) -> ExplainCommand {
        match self {
            ReadShape::Find { options, .. } => {
                ExplainCommand::find(collection, filter.clone(), options.clone())
            }
            ReadShape::Aggregate {
                pipeline,
                batch_size,
            } => ExplainCommand::aggregate(collection, pipeline.clone(), Some(*batch_size)),
            ReadShape::Parallel {
                projection,
                batch_size,
            } => ExplainCommand::aggregate(
                collection,
                vec![Stage::Match(filter.clone()), Stage::Project(projection.clone())],
                Some(*batch_size),
            ),
        }
    }
}

/// Runs read strategies against one store handle.
pub struct StrategyExecutor {
    store: Arc<dyn DocumentStore>,
    sink: SharedSink,
    sampler: Arc<dyn MemorySampler>,
    settings: ExecutorSettings,
}

impl StrategyExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, sink: SharedSink) -> Self {
        Self {
            store,
            sink,
            sampler: Arc::new(ProcessMemorySampler::new()),
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Run `strategy` and return its metrics.
    pub async fn run(
        &self,
        strategy: Strategy,
        filter: &Filter,
        projection: Option<Projection>,
        batch_size: Option<u32>,
    ) -> BenchResult<Metrics> {
        self.run_detailed(strategy, filter, projection, batch_size)
            .await
            .map(|run| run.metrics)
    }

    /// Run `strategy`, keeping the plan analysis and parallel outcome.
    pub async fn run_detailed(
        &self,
        strategy: Strategy,
        filter: &Filter,
        projection: Option<Projection>,
        batch_size: Option<u32>,
    ) -> BenchResult<StrategyRun> {
        let batch_size = batch_size.unwrap_or(self.settings.batch_size);
        let shape = ReadShape::for_strategy(strategy, filter, projection, batch_size);

        tracing::info!("Running {} ({})", strategy, strategy.description());
        let analysis = self.explain(strategy, &shape, filter).await;

        let start = Instant::now();
        let before = self.sampler.sample();

        let (records_read, parallel) = match &shape {
            ReadShape::Find { options, buffered } => {
                let cursor = self.store.find(filter, options).await?;
                let count = if *buffered {
                    self.read_buffered(cursor).await?
                } else {
                    self.read_streaming(cursor).await?
                };
                (count, None)
            }
            ReadShape::Aggregate {
                pipeline,
                batch_size,
            } => {
                let cursor = self.store.aggregate(pipeline, Some(*batch_size)).await?;
                (self.read_streaming(cursor).await?, None)
            }
            ReadShape::Parallel {
                projection,
                batch_size,
            } => {
                let outcome = ChunkCoordinator::new(
                    self.store.clone(),
                    self.sink.clone(),
                    self.settings.parallel,
                )
                .with_batch_size(Some(*batch_size))
                .run_parallel(filter, projection)
                .await?;
                (outcome.records_read, Some(outcome))
            }
        };

        let after = self.sampler.sample();
        let duration = start.elapsed();

        let execution_stats = analysis
            .as_ref()
            .map(|a| a.stats)
            .filter(|stats| !stats.is_empty());
        let metrics = Metrics::new(
            duration,
            records_read,
            memory_delta(before, after),
            execution_stats,
        );

        tracing::info!(
            "{} read {} records in {:?}",
            strategy,
            records_read,
            duration
        );
        let run = StrategyRun {
            strategy,
            metrics,
            analysis,
            parallel,
        };
        self.report(&run);
        Ok(run)
    }

    /// Explain and analyze; failures only produce a warning line.
    async fn explain(
        &self,
        strategy: Strategy,
        shape: &ReadShape,
        filter: &Filter,
    ) -> Option<PlanAnalysis> {
        let command = shape.explain_command(self.store.collection(), filter);
        self.sink
            .write_line(&format!("Explaining {} read...", strategy));

        match self.store.explain(&command).await {
            Ok(plan_doc) => {
                let analysis = plan::analyze(&plan_doc);
                analysis.report(strategy.label(), self.sink.as_ref());
                Some(analysis)
            }
            Err(e) => {
                tracing::warn!("Explain failed for {}: {}", strategy, e);
                self.sink.write_line(&format!(
                    "WARNING: explain failed, continuing without plan analysis: {}",
                    e
                ));
                None
            }
        }
    }

    /// Buffer every document, then decode them all.
    async fn read_buffered(&self, cursor: DocumentCursor) -> BenchResult<u64> {
        let raw = cursor.collect_all().await?;
        let documents = raw
            .iter()
            .map(RawDocument::decode)
            .collect::<BenchResult<Vec<_>>>()?;
        Ok(documents.len() as u64)
    }

    /// Decode one document at a time.
    async fn read_streaming(&self, mut cursor: DocumentCursor) -> BenchResult<u64> {
        let interval = self.settings.progress_interval;
        let mut count = 0u64;
        while let Some(item) = cursor.next().await {
            let _document = item?.decode()?;
            count += 1;
            if interval > 0 && count % interval == 0 {
                self.sink
                    .write_line(&format!("  Processed records: {}", count));
            }
        }
        Ok(count)
    }

    fn report(&self, run: &StrategyRun) {
        let sink = self.sink.as_ref();
        if let Some(outcome) = &run.parallel {
            outcome.report(sink);
        }
        run.metrics.report(run.strategy.label(), sink);
    }
}
