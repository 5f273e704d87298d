pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod plan;
pub mod report;
pub mod seed;
pub mod store;

pub use config::BenchConfig;
pub use engine::{
    ChunkCoordinator, ChunkPlan, ChunkPolicy, ExecutorSettings, ParallelOutcome, ParallelSettings,
    Strategy, StrategyExecutor, StrategyRun,
};
pub use error::{BenchError, BenchResult};
pub use logging::{ReportSink, SharedSink};
pub use metrics::{ExecutionStats, Metrics};
pub use plan::{analyze, PlanAnalysis, PlanWarning, ScanClassification};
pub use report::ComparisonReport;
pub use seed::{seed_collection, OrderGenerator};
pub use store::{DocumentStore, Filter, MemoryStore, Projection, RocksStore};
