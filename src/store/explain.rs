//! Explain-by-execution: run the described read, count what it touched,
//! and render the executionStats plan document.

use serde_json::{json, Map, Value};
use std::time::Instant;

use super::exec::{run_stages, AccessPath, Candidate, ExecutionCounters};
use super::query::{ExplainCommand, Stage};
use crate::error::{BenchError, BenchResult};

/// Drain the pipeline over `source`, counting examined and returned documents.
pub fn execute_counted<I>(
    source: I,
    stages: &[Stage],
    access: &AccessPath,
) -> BenchResult<ExecutionCounters>
where
    I: Iterator<Item = BenchResult<Candidate>>,
{
    let mut docs_examined = 0u64;
    let mut n_returned = 0u64;
    let start = Instant::now();

    let counted = source.inspect(|_| docs_examined += 1);
    for item in run_stages(counted, stages) {
        item.map_err(|e| BenchError::Explain(e.to_string()))?;
        n_returned += 1;
    }

    Ok(ExecutionCounters {
        docs_examined,
        keys_examined: if access.is_index_scan() { docs_examined } else { 0 },
        n_returned,
        elapsed: start.elapsed(),
    })
}

/// Render the plan document for `command` after it was executed over `access`.
pub fn explain_document(
    command: &ExplainCommand,
    access: &AccessPath,
    counters: &ExecutionCounters,
) -> Value {
    let pipeline = command.pipeline();
    let filter = match pipeline.first() {
        Some(Stage::Match(filter)) => filter.to_document(),
        _ => json!({}),
    };

    let query_planner = json!({
        "namespace": command.collection(),
        "parsedQuery": filter,
        "winningPlan": winning_plan(access, &filter),
        "rejectedPlans": [],
    });
    let execution_stats = json!({
        "executionSuccess": true,
        "nReturned": counters.n_returned,
        "executionTimeMillis": u64::try_from(counters.elapsed.as_millis()).unwrap_or(u64::MAX),
        "totalKeysExamined": counters.keys_examined,
        "totalDocsExamined": counters.docs_examined,
    });
    let issued = command.to_document()["explain"].clone();

    let mut doc = Map::new();
    if command.is_aggregate() {
        let mut stages = vec![json!({
            "$cursor": {
                "queryPlanner": query_planner,
                "executionStats": execution_stats,
            }
        })];
        let rest = match pipeline.first() {
            Some(Stage::Match(_)) => &pipeline[1..],
            _ => &pipeline[..],
        };
        stages.extend(rest.iter().map(Stage::to_document));
        doc.insert("stages".to_string(), Value::Array(stages));
    } else {
        doc.insert("queryPlanner".to_string(), query_planner);
        doc.insert("executionStats".to_string(), execution_stats);
    }
    doc.insert("command".to_string(), issued);
    doc.insert("ok".to_string(), json!(1));
    Value::Object(doc)
}

fn winning_plan(access: &AccessPath, filter: &Value) -> Value {
    match access {
        AccessPath::CollectionScan => json!({
            "stage": "COLLSCAN",
            "filter": filter,
            "direction": "forward",
        }),
        AccessPath::IndexScan { index, field, key } => {
            let mut key_pattern = Map::new();
            key_pattern.insert(field.clone(), json!(1));
            let mut bounds = Map::new();
            bounds.insert(field.clone(), json!([format!("[{}, {}]", key, key)]));
            json!({
                "stage": "FETCH",
                "inputStage": {
                    "stage": "IXSCAN",
                    "indexName": index,
                    "keyPattern": key_pattern,
                    "isMultiKey": false,
                    "direction": "forward",
                    "indexBounds": bounds,
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::query::{Filter, FindOptions, Projection};
    use std::time::Duration;

    fn orders(n: usize) -> impl Iterator<Item = BenchResult<Candidate>> {
        (0..n).map(|i| {
            let status = if i % 4 == 0 { "PAID" } else { "PENDING" };
            Ok(Candidate::Doc(json!({"status": status, "n": i})))
        })
    }

    #[test]
    fn test_counts_collection_scan() {
        let stages = vec![Stage::Match(Filter::eq("status", "PAID"))];
        let counters = execute_counted(orders(100), &stages, &AccessPath::CollectionScan).unwrap();
        assert_eq!(counters.docs_examined, 100);
        assert_eq!(counters.keys_examined, 0);
        assert_eq!(counters.n_returned, 25);
    }

    #[test]
    fn test_limit_stops_examining() {
        let stages = vec![Stage::Match(Filter::all()), Stage::Limit(10)];
        let counters = execute_counted(orders(100), &stages, &AccessPath::CollectionScan).unwrap();
        assert_eq!(counters.n_returned, 10);
        assert_eq!(counters.docs_examined, 10);
    }

    #[test]
    fn test_find_document_shape() {
        let command = ExplainCommand::find(
            "orders",
            Filter::eq("status", "PAID"),
            FindOptions::new().projection(Projection::fields(["userId"])),
        );
        let counters = ExecutionCounters {
            docs_examined: 100,
            keys_examined: 0,
            n_returned: 25,
            elapsed: Duration::from_millis(7),
        };
        let doc = explain_document(&command, &AccessPath::CollectionScan, &counters);

        assert_eq!(doc["queryPlanner"]["winningPlan"]["stage"], "COLLSCAN");
        assert_eq!(doc["executionStats"]["nReturned"], 25);
        assert_eq!(doc["executionStats"]["executionTimeMillis"], 7);
        assert_eq!(doc["command"]["find"], "orders");
    }

    #[test]
    fn test_aggregate_document_shape() {
        let command = ExplainCommand::aggregate(
            "orders",
            vec![
                Stage::Match(Filter::eq("status", "PAID")),
                Stage::Skip(5),
                Stage::Limit(5),
            ],
            Some(100),
        );
        let access = AccessPath::IndexScan {
            index: "status_1".to_string(),
            field: "status".to_string(),
            key: json!("PAID"),
        };
        let doc = explain_document(&command, &access, &ExecutionCounters::default());

        let stages = doc["stages"].as_array().unwrap();
        assert_eq!(stages.len(), 3);
        let plan = &stages[0]["$cursor"]["queryPlanner"]["winningPlan"];
        assert_eq!(plan["stage"], "FETCH");
        assert_eq!(plan["inputStage"]["stage"], "IXSCAN");
        assert_eq!(plan["inputStage"]["indexName"], "status_1");
        assert_eq!(stages[1], json!({"$skip": 5}));
        assert!(doc.get("queryPlanner").is_none());
    }
}
