//! Plan analysis: what kind of scan the store chose and whether the
//! execution statistics point at a problem.
//!
//! Plan documents are loosely typed. Find explains carry `queryPlanner` and
//! `executionStats` at the top level; aggregate explains nest them in a
//! leading `$cursor` stage. Anything missing is reported as unset.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::metrics::ExecutionStats;

/// Execution time above which a query is flagged as slow.
pub const SLOW_QUERY_THRESHOLD_MS: i64 = 100;

/// Efficiency (percent) below which an index is suggested.
pub const LOW_EFFICIENCY_THRESHOLD_PCT: f64 = 50.0;

/// Examined-to-returned factor above which over-examination is flagged.
pub const OVER_EXAMINATION_FACTOR: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScanClassification {
    FullScan,
    IndexScan,
    IndexFetch,
    Unknown,
}

impl ScanClassification {
    /// Exact, case-sensitive match on the winning stage name.
    pub fn from_stage(stage: &str) -> Self {
        match stage {
            "COLLSCAN" => ScanClassification::FullScan,
            "IXSCAN" => ScanClassification::IndexScan,
            "FETCH" => ScanClassification::IndexFetch,
            _ => ScanClassification::Unknown,
        }
    }

    pub fn uses_index(&self) -> bool {
        matches!(self, ScanClassification::IndexScan | ScanClassification::IndexFetch)
    }
}

impl fmt::Display for ScanClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanClassification::FullScan => "full scan",
            ScanClassification::IndexScan => "index scan",
            ScanClassification::IndexFetch => "index fetch",
            ScanClassification::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanWarning {
    SlowQuery { execution_time_ms: i64 },
    OverExamined { docs_examined: u64, n_returned: u64 },
    LowEfficiency { efficiency_pct: f64 },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanWarning::SlowQuery { execution_time_ms } => write!(
                f,
                "slow query: {} ms (> {} ms), optimization may be needed",
                execution_time_ms, SLOW_QUERY_THRESHOLD_MS
            ),
            PlanWarning::OverExamined {
                docs_examined,
                n_returned,
            } => write!(
                f,
                "examined {}x more documents than returned ({} / {}), an index may be needed",
                docs_examined / n_returned.max(&1),
                docs_examined,
                n_returned
            ),
            PlanWarning::LowEfficiency { efficiency_pct } => write!(
                f,
                "low efficiency: {:.2}% (< {}%), index optimization may help",
                efficiency_pct, LOW_EFFICIENCY_THRESHOLD_PCT
            ),
        }
    }
}

/// Everything read out of one plan document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanAnalysis {
    pub classification: ScanClassification,
    pub winning_stage: Option<String>,
    pub index_name: Option<String>,
    /// Stage names of an aggregate plan, in order. Empty for find plans.
    pub pipeline_stages: Vec<String>,
    pub stats: ExecutionStats,
    pub efficiency_pct: Option<f64>,
    pub warnings: Vec<PlanWarning>,
    /// The explain document the analysis was read from.
    pub document: Value,
}

impl PlanAnalysis {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Analyze a plan document. Never fails.
pub fn analyze(plan: &Value) -> PlanAnalysis {
    let winning = winning_plan(plan);
    let winning_stage = winning
        .and_then(|w| w.get("stage"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| first_declared_stage(plan));
    let stats = parse_execution_stats(plan);

    PlanAnalysis {
        classification: winning_stage
            .as_deref()
            .map(ScanClassification::from_stage)
            .unwrap_or(ScanClassification::Unknown),
        index_name: winning.and_then(index_name),
        pipeline_stages: pipeline_stages(plan),
        efficiency_pct: stats.efficiency_pct(),
        warnings: stats_warnings(&stats),
        winning_stage,
        stats,
        document: plan.clone(),
    }
}

/// Scan kind of the winning plan.
pub fn classify(plan: &Value) -> ScanClassification {
    analyze(plan).classification
}

/// Pull execution statistics out of a plan document.
pub fn parse_execution_stats(plan: &Value) -> ExecutionStats {
    let Some(stats) = section(plan, "executionStats") else {
        return ExecutionStats::default();
    };
    ExecutionStats {
        execution_time_ms: stats.get("executionTimeMillis").and_then(read_int),
        total_docs_examined: stats.get("totalDocsExamined").and_then(read_count),
        total_keys_examined: stats.get("totalKeysExamined").and_then(read_count),
        n_returned: stats.get("nReturned").and_then(read_count),
    }
}

/// Warnings implied by the statistics alone.
pub fn stats_warnings(stats: &ExecutionStats) -> Vec<PlanWarning> {
    let mut warnings = Vec::new();

    if let Some(ms) = stats.execution_time_ms {
        if ms > SLOW_QUERY_THRESHOLD_MS {
            warnings.push(PlanWarning::SlowQuery {
                execution_time_ms: ms,
            });
        }
    }

    if let (Some(examined), Some(returned)) = (stats.total_docs_examined, stats.n_returned) {
        if returned > 0 && examined > returned.saturating_mul(OVER_EXAMINATION_FACTOR) {
            warnings.push(PlanWarning::OverExamined {
                docs_examined: examined,
                n_returned: returned,
            });
        }
    }

    if let Some(pct) = stats.efficiency_pct() {
        if pct < LOW_EFFICIENCY_THRESHOLD_PCT {
            warnings.push(PlanWarning::LowEfficiency { efficiency_pct: pct });
        }
    }

    warnings
}

/// `plan[name]`, or the same section inside a leading `$cursor` stage.
fn section<'a>(plan: &'a Value, name: &str) -> Option<&'a Value> {
    plan.get(name).filter(|v| v.is_object()).or_else(|| {
        plan.get("stages")?
            .as_array()?
            .first()?
            .get("$cursor")?
            .get(name)
            .filter(|v| v.is_object())
    })
}

fn winning_plan(plan: &Value) -> Option<&Value> {
    section(plan, "queryPlanner")?.get("winningPlan")
}

/// Aggregate plans may list stages that name themselves with a `stage` key.
fn first_declared_stage(plan: &Value) -> Option<String> {
    plan.get("stages")?
        .as_array()?
        .iter()
        .find_map(|s| s.get("stage").and_then(Value::as_str))
        .map(str::to_string)
}

fn index_name(stage: &Value) -> Option<String> {
    let mut current = Some(stage);
    while let Some(node) = current {
        if let Some(name) = node.get("indexName").and_then(Value::as_str) {
            return Some(name.to_string());
        }
        current = node.get("inputStage");
    }
    None
}

fn pipeline_stages(plan: &Value) -> Vec<String> {
    let Some(stages) = plan.get("stages").and_then(Value::as_array) else {
        return Vec::new();
    };
    stages
        .iter()
        .filter_map(|stage| {
            if let Some(name) = stage.get("stage").and_then(Value::as_str) {
                return Some(name.to_string());
            }
            stage.as_object()?.keys().next().cloned()
        })
        .collect()
}

/// Integers as plain numbers, integral floats, or `{"$numberLong": "..."}`.
fn read_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
        Value::Object(map) => map
            .get("$numberLong")
            .or_else(|| map.get("$numberInt"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
        _ => None,
    }
}

fn read_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) if n.is_u64() => n.as_u64(),
        other => read_int(other).and_then(|i| u64::try_from(i).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn find_plan(stage: &str, stats: Value) -> Value {
        json!({
            "queryPlanner": {"winningPlan": {"stage": stage}},
            "executionStats": stats,
        })
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(&find_plan("COLLSCAN", json!({}))), ScanClassification::FullScan);
        assert_eq!(classify(&find_plan("IXSCAN", json!({}))), ScanClassification::IndexScan);
        assert_eq!(classify(&find_plan("FETCH", json!({}))), ScanClassification::IndexFetch);
        assert_eq!(classify(&find_plan("SORT", json!({}))), ScanClassification::Unknown);
        assert_eq!(classify(&find_plan("collscan", json!({}))), ScanClassification::Unknown);
        assert_eq!(classify(&json!({})), ScanClassification::Unknown);
        assert_eq!(classify(&json!("not a plan")), ScanClassification::Unknown);
    }

    #[test]
    fn test_efficiency_and_warnings() {
        let plan = find_plan(
            "COLLSCAN",
            json!({"totalDocsExamined": 100, "nReturned": 10, "executionTimeMillis": 20}),
        );
        let analysis = analyze(&plan);
        assert_eq!(analysis.efficiency_pct, Some(10.0));
        assert!(analysis
            .warnings
            .contains(&PlanWarning::LowEfficiency { efficiency_pct: 10.0 }));
        assert!(analysis.warnings.contains(&PlanWarning::OverExamined {
            docs_examined: 100,
            n_returned: 10
        }));
        assert!(!analysis
            .warnings
            .iter()
            .any(|w| matches!(w, PlanWarning::SlowQuery { .. })));
    }

    #[test]
    fn test_latency_threshold() {
        let slow = ExecutionStats {
            execution_time_ms: Some(150),
            ..Default::default()
        };
        assert_eq!(
            stats_warnings(&slow),
            vec![PlanWarning::SlowQuery {
                execution_time_ms: 150
            }]
        );

        let fast = ExecutionStats {
            execution_time_ms: Some(50),
            ..Default::default()
        };
        assert!(stats_warnings(&fast).is_empty());

        let boundary = ExecutionStats {
            execution_time_ms: Some(100),
            ..Default::default()
        };
        assert!(stats_warnings(&boundary).is_empty());
    }

    #[test]
    fn test_over_examination_needs_returned_docs() {
        let stats = ExecutionStats {
            total_docs_examined: Some(500),
            n_returned: Some(0),
            ..Default::default()
        };
        let warnings = stats_warnings(&stats);
        assert!(!warnings
            .iter()
            .any(|w| matches!(w, PlanWarning::OverExamined { .. })));
        assert!(warnings.contains(&PlanWarning::LowEfficiency { efficiency_pct: 0.0 }));
    }

    #[test]
    fn test_efficiency_at_threshold_is_fine() {
        let stats = ExecutionStats {
            total_docs_examined: Some(100),
            n_returned: Some(50),
            ..Default::default()
        };
        assert!(stats_warnings(&stats).is_empty());
    }

    #[test]
    fn test_absent_fields_are_unset() {
        let plan = find_plan("COLLSCAN", json!({"nReturned": 5}));
        let stats = parse_execution_stats(&plan);
        assert_eq!(stats.n_returned, Some(5));
        assert_eq!(stats.total_docs_examined, None);
        assert_eq!(stats.execution_time_ms, None);
        assert_eq!(stats.efficiency_pct(), None);

        assert!(parse_execution_stats(&json!({})).is_empty());
    }

    #[test]
    fn test_extended_json_numbers() {
        let plan = find_plan(
            "COLLSCAN",
            json!({
                "executionTimeMillis": {"$numberLong": "250"},
                "totalDocsExamined": 1000.0,
                "nReturned": -1,
            }),
        );
        let stats = parse_execution_stats(&plan);
        assert_eq!(stats.execution_time_ms, Some(250));
        assert_eq!(stats.total_docs_examined, Some(1000));
        assert_eq!(stats.n_returned, None);
    }

    #[test]
    fn test_aggregate_plan() {
        let plan = json!({
            "stages": [
                {"$cursor": {
                    "queryPlanner": {"winningPlan": {
                        "stage": "FETCH",
                        "inputStage": {"stage": "IXSCAN", "indexName": "status_1"}
                    }},
                    "executionStats": {
                        "nReturned": 40,
                        "totalDocsExamined": 40,
                        "executionTimeMillis": 3
                    }
                }},
                {"$project": {"userId": 1}}
            ]
        });
        let analysis = analyze(&plan);
        assert_eq!(analysis.classification, ScanClassification::IndexFetch);
        assert_eq!(analysis.index_name.as_deref(), Some("status_1"));
        assert_eq!(analysis.pipeline_stages, vec!["$cursor", "$project"]);
        assert_eq!(analysis.efficiency_pct, Some(100.0));
        assert!(!analysis.has_warnings());
    }

    #[test]
    fn test_declared_stage_entries() {
        let plan = json!({"stages": [{"stage": "COLLSCAN"}, {"stage": "PROJECTION_SIMPLE"}]});
        let analysis = analyze(&plan);
        assert_eq!(analysis.classification, ScanClassification::FullScan);
        assert_eq!(analysis.pipeline_stages, vec!["COLLSCAN", "PROJECTION_SIMPLE"]);
    }
}
