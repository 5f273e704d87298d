//! Plan analysis over explain output produced by the stores.

mod common;

use readbench::logging::MemorySink;
use readbench::plan::{analyze, PlanWarning, ScanClassification};
use readbench::store::{
    DocumentStore, ExplainCommand, Filter, FindOptions, IndexOptions, Projection, Stage,
};
use serde_json::json;

use common::{seeded_memory_store, seeded_rocks_store};

fn match_project(filter: Filter) -> Vec<Stage> {
    vec![
        Stage::Match(filter),
        Stage::Project(Projection::fields(["userId", "status"]).without_id()),
    ]
}

#[tokio::test]
async fn test_find_without_index_is_full_scan() {
    let store = seeded_memory_store(30).await;
    let command = ExplainCommand::find("orders", Filter::eq("status", "PAID"), FindOptions::new());

    let analysis = analyze(&store.explain(&command).await.unwrap());

    assert_eq!(analysis.classification, ScanClassification::FullScan);
    assert_eq!(analysis.winning_stage.as_deref(), Some("COLLSCAN"));
    assert_eq!(analysis.stats.total_docs_examined, Some(30));
    assert_eq!(analysis.stats.total_keys_examined, Some(0));
    assert_eq!(analysis.stats.n_returned, Some(10));
    assert!(analysis
        .warnings
        .iter()
        .any(|w| matches!(w, PlanWarning::OverExamined { .. })));
    assert!(analysis
        .warnings
        .iter()
        .any(|w| matches!(w, PlanWarning::LowEfficiency { .. })));
}

#[tokio::test]
async fn test_aggregate_with_index_is_index_fetch() {
    let store = seeded_memory_store(30).await;
    store
        .create_index(&["status".to_string()], &IndexOptions::default())
        .await
        .unwrap();
    let command = ExplainCommand::aggregate(
        "orders",
        match_project(Filter::eq("status", "PAID")),
        Some(100),
    );

    let analysis = analyze(&store.explain(&command).await.unwrap());

    assert_eq!(analysis.classification, ScanClassification::IndexFetch);
    assert_eq!(analysis.index_name.as_deref(), Some("status_1"));
    assert_eq!(analysis.pipeline_stages, vec!["$cursor", "$project"]);
    assert_eq!(analysis.stats.total_docs_examined, Some(10));
    assert_eq!(analysis.efficiency_pct, Some(100.0));
    assert!(!analysis.has_warnings());
}

#[tokio::test]
async fn test_index_not_used_for_unindexed_field() {
    let store = seeded_memory_store(12).await;
    store
        .create_index(&["status".to_string()], &IndexOptions::default())
        .await
        .unwrap();
    let command =
        ExplainCommand::find("orders", Filter::eq("userId", "user-3"), FindOptions::new());

    let analysis = analyze(&store.explain(&command).await.unwrap());
    assert_eq!(analysis.classification, ScanClassification::FullScan);
    assert_eq!(analysis.stats.n_returned, Some(1));
}

#[tokio::test]
async fn test_rocks_explain_matches_memory_explain() {
    let (rocks, _tmp) = seeded_rocks_store(24).await;
    let memory = seeded_memory_store(24).await;
    let pipeline = match_project(Filter::eq("status", "PENDING"));
    let command = ExplainCommand::aggregate("orders", pipeline, None);

    let from_rocks = analyze(&rocks.explain(&command).await.unwrap());
    let from_memory = analyze(&memory.explain(&command).await.unwrap());

    assert_eq!(from_rocks.classification, from_memory.classification);
    assert_eq!(from_rocks.stats.total_docs_examined, from_memory.stats.total_docs_examined);
    assert_eq!(from_rocks.stats.n_returned, Some(8));
}

#[test]
fn test_report_for_legacy_plan_shape() {
    let plan = json!({
        "stages": [
            {"$cursor": {
                "queryPlanner": {"winningPlan": {"stage": "IXSCAN", "indexName": "status_1"}},
                "executionStats": {
                    "executionTimeMillis": {"$numberLong": "250"},
                    "totalDocsExamined": 100,
                    "nReturned": 100
                }
            }},
            {"$project": {"status": 1}}
        ]
    });
    let analysis = analyze(&plan);
    assert_eq!(analysis.classification, ScanClassification::IndexScan);
    assert_eq!(analysis.stats.execution_time_ms, Some(250));
    assert_eq!(
        analysis.warnings,
        vec![PlanWarning::SlowQuery { execution_time_ms: 250 }]
    );

    let sink = MemorySink::new();
    analysis.report("indexed-aggregation", &sink);
    assert!(sink.contains("=== EXPLAIN RESULTS - indexed-aggregation ==="));
    assert!(sink.contains("slow query: 250 ms"));
    assert!(sink.contains("Index: status_1"));
    assert!(sink.contains("Stage 2: $project"));
}

#[test]
fn test_unrecognized_plan_is_unknown() {
    let analysis = analyze(&json!({"ok": 1}));
    assert_eq!(analysis.classification, ScanClassification::Unknown);
    assert!(analysis.stats.is_empty());
    assert!(analysis.warnings.is_empty());

    let sink = MemorySink::new();
    analysis.report("cursor-streaming", &sink);
    assert!(sink.contains("Stage: n/a (unknown)"));
    assert!(!sink.contains("Execution statistics:"));
}
