//! Results files and the comparison report.

mod common;

use readbench::config::BenchConfig;
use readbench::engine::{ScriptedSampler, Strategy, StrategyExecutor};
use readbench::logging::{MemorySink, TeeSink};
use readbench::report::ComparisonReport;
use readbench::store::Filter;
use std::sync::Arc;
use tempfile::TempDir;

use common::{executor, seeded_memory_store};

#[tokio::test]
async fn test_results_file_mirrors_report() {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = BenchConfig {
        results_dir: tmp_dir.path().join("results"),
        ..Default::default()
    };
    let path = config.results_path(Strategy::CursorStreaming);

    let sink = Arc::new(TeeSink::create(&path).unwrap());
    sink.write_header(Strategy::CursorStreaming.label());
    let store = seeded_memory_store(9).await;
    let executor = StrategyExecutor::new(store, sink)
        .with_sampler(Arc::new(ScriptedSampler::new([0, 2 * 1024 * 1024])));

    executor
        .run(Strategy::CursorStreaming, &config.parsed_filter().unwrap(), None, None)
        .await
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(path.ends_with("results/cursor-streaming_results.txt"));
    assert!(content.contains("TEST: cursor-streaming"));
    assert!(content.contains("Date: "));
    assert!(content.contains("=== EXPLAIN RESULTS - cursor-streaming ==="));
    assert!(content.contains("=== PERFORMANCE METRICS - cursor-streaming ==="));
    assert!(content.contains("Records read: 3"));
    assert!(content.contains("Memory used: 2.00 MB"));
}

#[tokio::test]
async fn test_explain_block_ends_with_explain_document() {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = tmp_dir.path().join("indexed-aggregation_results.txt");
    let sink = Arc::new(TeeSink::create(&path).unwrap());
    let store = seeded_memory_store(12).await;
    let executor = StrategyExecutor::new(store, sink)
        .with_sampler(Arc::new(ScriptedSampler::new([0])));

    executor
        .run(Strategy::IndexedAggregation, &Filter::eq("status", "PAID"), None, None)
        .await
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let block_start = content.find("=== EXPLAIN RESULTS").unwrap();
    let dump_start = content.find("Full explain output:").unwrap();
    let metrics_start = content.find("=== PERFORMANCE METRICS").unwrap();
    assert!(block_start < dump_start && dump_start < metrics_start);

    let dump = &content[dump_start..metrics_start];
    assert!(dump.contains("\"executionStats\": {"));
    assert!(dump.contains("\"stage\": \"COLLSCAN\""));
    assert!(dump.contains("\"status\": \"PAID\""));
}

#[tokio::test]
async fn test_compare_all_strategies() {
    let store = seeded_memory_store(30).await;
    let (executor, _sink) = executor(store);
    let filter = Filter::eq("status", "PAID");

    let mut runs = Vec::new();
    for strategy in Strategy::ALL {
        runs.push(
            executor
                .run_detailed(strategy, &filter, None, None)
                .await
                .unwrap(),
        );
    }

    let report = ComparisonReport::from_runs(&runs);
    assert_eq!(report.rows().len(), 5);
    assert!(report.mismatches().is_empty());
    assert!(report.rows().iter().all(|r| r.records_read == 10));

    let out = MemorySink::new();
    report.render(&out);
    assert!(out.contains("=== STRATEGY COMPARISON ==="));
    for strategy in Strategy::ALL {
        assert!(out.contains(strategy.label()));
    }
    assert!(!out.contains("WARNING"));
}
