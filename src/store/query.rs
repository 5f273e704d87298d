//! Query vocabulary shared by every store binding.
//!
//! Filters and projections use the familiar document-store notation
//! (`{"status": "PAID"}`, `{"userId": 1, "_id": 0}`) so explain commands can
//! echo them back verbatim.

use serde_json::{json, Map, Value};
use std::cmp::Ordering;

use crate::error::{BenchError, BenchResult};

/// Verbosity requested from every explain command.
pub const EXPLAIN_VERBOSITY: &str = "executionStats";

const OPERATORS: [&str; 8] = ["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$exists"];

/// A conjunction of field conditions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    conditions: Map<String, Value>,
}

impl Filter {
    /// Filter matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Single equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut conditions = Map::new();
        conditions.insert(field.into(), value.into());
        Self { conditions }
    }

    /// Parse a filter from its JSON text form.
    pub fn parse(text: &str) -> BenchResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BenchError::InvalidFilter(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Build a filter from a JSON object, validating operator usage.
    pub fn from_value(value: Value) -> BenchResult<Self> {
        let Value::Object(conditions) = value else {
            return Err(BenchError::InvalidFilter(
                "filter must be a JSON object".to_string(),
            ));
        };

        for (field, condition) in &conditions {
            if field.is_empty() {
                return Err(BenchError::InvalidFilter("empty field name".to_string()));
            }
            if field.starts_with('$') {
                return Err(BenchError::InvalidFilter(format!(
                    "top-level operator '{}' is not supported",
                    field
                )));
            }
            validate_condition(field, condition)?;
        }

        Ok(Self { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn to_document(&self) -> Value {
        Value::Object(self.conditions.clone())
    }

    /// The value a field is pinned to by an equality condition, if any.
    pub fn equality_value(&self, field: &str) -> Option<&Value> {
        let condition = self.conditions.get(field)?;
        match operator_map(condition) {
            Some(ops) => ops.get("$eq"),
            None => Some(condition),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, condition)| condition_matches(lookup_path(doc, field), condition))
    }
}

fn operator_map(condition: &Value) -> Option<&Map<String, Value>> {
    match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn validate_condition(field: &str, condition: &Value) -> BenchResult<()> {
    let Value::Object(map) = condition else {
        return Ok(());
    };

    let operator_count = map.keys().filter(|k| k.starts_with('$')).count();
    if operator_count == 0 {
        return Ok(());
    }
    if operator_count != map.len() {
        return Err(BenchError::InvalidFilter(format!(
            "field '{}' mixes operators and literal keys",
            field
        )));
    }

    for (op, operand) in map {
        if !OPERATORS.contains(&op.as_str()) {
            return Err(BenchError::InvalidFilter(format!(
                "unknown operator '{}' on field '{}'",
                op, field
            )));
        }
        if op == "$in" && !operand.is_array() {
            return Err(BenchError::InvalidFilter(format!(
                "$in on field '{}' requires an array",
                field
            )));
        }
        if op == "$exists" && !operand.is_boolean() {
            return Err(BenchError::InvalidFilter(format!(
                "$exists on field '{}' requires a boolean",
                field
            )));
        }
    }
    Ok(())
}

/// Resolve a dotted field path inside a document.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn condition_matches(actual: Option<&Value>, condition: &Value) -> bool {
    let Some(ops) = operator_map(condition) else {
        return actual.is_some_and(|v| equals_or_contains(v, condition));
    };

    ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => actual.is_some_and(|v| equals_or_contains(v, operand)),
        "$ne" => !actual.is_some_and(|v| equals_or_contains(v, operand)),
        "$gt" => ordered(actual, operand, |o| o == Ordering::Greater),
        "$gte" => ordered(actual, operand, |o| o != Ordering::Less),
        "$lt" => ordered(actual, operand, |o| o == Ordering::Less),
        "$lte" => ordered(actual, operand, |o| o != Ordering::Greater),
        "$in" => operand.as_array().is_some_and(|candidates| {
            actual.is_some_and(|v| candidates.iter().any(|c| equals_or_contains(v, c)))
        }),
        "$exists" => operand.as_bool() == Some(actual.is_some()),
        _ => false,
    })
}

fn ordered(actual: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    actual
        .and_then(|v| compare_values(v, operand))
        .is_some_and(accept)
}

fn equals_or_contains(actual: &Value, expected: &Value) -> bool {
    if values_equal(actual, expected) {
        return true;
    }
    match actual {
        Value::Array(items) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        _ => false,
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two scalars of the same kind; `None` across kinds.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A named subset of document fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    fields: Vec<String>,
    include_id: bool,
}

impl Projection {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            include_id: true,
        }
    }

    pub fn without_id(mut self) -> Self {
        self.include_id = false;
        self
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn includes_id(&self) -> bool {
        self.include_id
    }

    /// Parse an inclusion projection such as `{"userId": 1, "_id": 0}`.
    pub fn from_document(doc: &Value) -> BenchResult<Self> {
        let Value::Object(map) = doc else {
            return Err(BenchError::InvalidPipeline(
                "projection must be a JSON object".to_string(),
            ));
        };

        let mut fields = Vec::new();
        let mut include_id = true;
        for (field, flag) in map {
            let included = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                _ => {
                    return Err(BenchError::InvalidPipeline(format!(
                        "projection flag for '{}' must be 0/1 or a boolean",
                        field
                    )))
                }
            };
            if field == "_id" {
                include_id = included;
            } else if included {
                fields.push(field.clone());
            } else {
                return Err(BenchError::InvalidPipeline(format!(
                    "exclusion of '{}' is not supported in an inclusion projection",
                    field
                )));
            }
        }

        Ok(Self { fields, include_id })
    }

    pub fn to_document(&self) -> Value {
        let mut map = Map::new();
        for field in &self.fields {
            map.insert(field.clone(), json!(1));
        }
        if !self.include_id {
            map.insert("_id".to_string(), json!(0));
        }
        Value::Object(map)
    }

    pub fn apply(&self, doc: &Value) -> Value {
        let Value::Object(source) = doc else {
            return doc.clone();
        };

        let mut projected = Map::new();
        if self.include_id {
            if let Some(id) = source.get("_id") {
                projected.insert("_id".to_string(), id.clone());
            }
        }
        for field in &self.fields {
            if let Some(value) = lookup_path(doc, field) {
                insert_path(&mut projected, field, value.clone());
            }
        }
        Value::Object(projected)
    }
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

/// One aggregation pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Project(Projection),
    Skip(u64),
    Limit(u64),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
        }
    }

    pub fn to_document(&self) -> Value {
        let body = match self {
            Stage::Match(filter) => filter.to_document(),
            Stage::Project(projection) => projection.to_document(),
            Stage::Skip(n) | Stage::Limit(n) => json!(n),
        };
        let mut stage = Map::new();
        stage.insert(self.name().to_string(), body);
        Value::Object(stage)
    }

    pub fn from_document(doc: &Value) -> BenchResult<Self> {
        let (name, body) = doc
            .as_object()
            .filter(|m| m.len() == 1)
            .and_then(|m| m.iter().next())
            .ok_or_else(|| {
                BenchError::InvalidPipeline(format!(
                    "stage must be a single-key object, got {}",
                    doc
                ))
            })?;

        let count = |body: &Value| {
            body.as_u64().ok_or_else(|| {
                BenchError::InvalidPipeline(format!("{} requires a non-negative integer", name))
            })
        };

        match name.as_str() {
            "$match" => Ok(Stage::Match(Filter::from_value(body.clone())?)),
            "$project" => Ok(Stage::Project(Projection::from_document(body)?)),
            "$skip" => Ok(Stage::Skip(count(body)?)),
            "$limit" => Ok(Stage::Limit(count(body)?)),
            other => Err(BenchError::InvalidPipeline(format!(
                "unsupported stage '{}'",
                other
            ))),
        }
    }
}

/// Reject pipelines the stores cannot execute.
pub fn validate_pipeline(pipeline: &[Stage]) -> BenchResult<()> {
    for stage in pipeline {
        if let Stage::Limit(0) = stage {
            return Err(BenchError::InvalidPipeline(
                "$limit must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

/// Options accepted by `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    pub batch_size: Option<u32>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The stage list equivalent to `find(filter, self)`.
    pub fn to_pipeline(&self, filter: &Filter) -> Vec<Stage> {
        let mut stages = vec![Stage::Match(filter.clone())];
        if let Some(skip) = self.skip {
            stages.push(Stage::Skip(skip));
        }
        if let Some(limit) = self.limit {
            stages.push(Stage::Limit(limit));
        }
        if let Some(projection) = &self.projection {
            stages.push(Stage::Project(projection.clone()));
        }
        stages
    }
}

/// The read being explained. Mirrors the find/aggregate call exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplainCommand {
    Find {
        collection: String,
        filter: Filter,
        options: FindOptions,
    },
    Aggregate {
        collection: String,
        pipeline: Vec<Stage>,
        batch_size: Option<u32>,
    },
}

impl ExplainCommand {
    pub fn find(collection: impl Into<String>, filter: Filter, options: FindOptions) -> Self {
        ExplainCommand::Find {
            collection: collection.into(),
            filter,
            options,
        }
    }

    pub fn aggregate(
        collection: impl Into<String>,
        pipeline: Vec<Stage>,
        batch_size: Option<u32>,
    ) -> Self {
        ExplainCommand::Aggregate {
            collection: collection.into(),
            pipeline,
            batch_size,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            ExplainCommand::Find { collection, .. }
            | ExplainCommand::Aggregate { collection, .. } => collection,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, ExplainCommand::Aggregate { .. })
    }

    pub fn pipeline(&self) -> Vec<Stage> {
        match self {
            ExplainCommand::Find {
                filter, options, ..
            } => options.to_pipeline(filter),
            ExplainCommand::Aggregate { pipeline, .. } => pipeline.clone(),
        }
    }

    /// Render the full explain command document.
    pub fn to_document(&self) -> Value {
        let inner = match self {
            ExplainCommand::Find {
                collection,
                filter,
                options,
            } => {
                let mut cmd = Map::new();
                cmd.insert("find".to_string(), json!(collection));
                cmd.insert("filter".to_string(), filter.to_document());
                if let Some(projection) = &options.projection {
                    cmd.insert("projection".to_string(), projection.to_document());
                }
                if let Some(limit) = options.limit {
                    cmd.insert("limit".to_string(), json!(limit));
                }
                if let Some(skip) = options.skip {
                    cmd.insert("skip".to_string(), json!(skip));
                }
                if let Some(batch_size) = options.batch_size {
                    cmd.insert("batchSize".to_string(), json!(batch_size));
                }
                Value::Object(cmd)
            }
            ExplainCommand::Aggregate {
                collection,
                pipeline,
                batch_size,
            } => {
                let stages: Vec<Value> = pipeline.iter().map(Stage::to_document).collect();
                let cursor = match batch_size {
                    Some(n) => json!({ "batchSize": n }),
                    None => json!({}),
                };
                json!({
                    "aggregate": collection,
                    "pipeline": stages,
                    "cursor": cursor,
                })
            }
        };

        json!({ "explain": inner, "verbosity": EXPLAIN_VERBOSITY })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_and_array_membership() {
        let filter = Filter::eq("status", "PAID");
        assert!(filter.matches(&json!({"status": "PAID"})));
        assert!(!filter.matches(&json!({"status": "PENDING"})));
        assert!(!filter.matches(&json!({"total": 10})));

        let tags = Filter::eq("tags", "rust");
        assert!(tags.matches(&json!({"tags": ["go", "rust"]})));
    }

    #[test]
    fn test_operators() {
        let filter = Filter::parse(r#"{"total": {"$gte": 100, "$lt": 200}}"#).unwrap();
        assert!(filter.matches(&json!({"total": 100})));
        assert!(filter.matches(&json!({"total": 199.5})));
        assert!(!filter.matches(&json!({"total": 200})));
        assert!(!filter.matches(&json!({"total": "150"})));

        let filter = Filter::parse(r#"{"status": {"$in": ["PAID", "PENDING"]}}"#).unwrap();
        assert!(filter.matches(&json!({"status": "PENDING"})));
        assert!(!filter.matches(&json!({"status": "CANCELLED"})));

        let filter = Filter::parse(r#"{"coupon": {"$exists": false}}"#).unwrap();
        assert!(filter.matches(&json!({"status": "PAID"})));
        assert!(!filter.matches(&json!({"coupon": null})));

        let filter = Filter::parse(r#"{"status": {"$ne": "PAID"}}"#).unwrap();
        assert!(filter.matches(&json!({"total": 1})));
        assert!(!filter.matches(&json!({"status": "PAID"})));
    }

    #[test]
    fn test_dotted_paths() {
        let filter = Filter::eq("items.qty", 3);
        assert!(filter.matches(&json!({"items": {"qty": 3.0}})));
        assert!(!filter.matches(&json!({"items": {"qty": 4}})));
    }

    #[test]
    fn test_invalid_filters_rejected() {
        assert!(matches!(
            Filter::parse(r#"{"status": {"$regex": "^P"}}"#),
            Err(BenchError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::parse(r#"{"$or": []}"#),
            Err(BenchError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::parse(r#"{"a": {"$in": 3}}"#),
            Err(BenchError::InvalidFilter(_))
        ));
        assert!(matches!(Filter::parse("[1]"), Err(BenchError::InvalidFilter(_))));
    }

    #[test]
    fn test_equality_value() {
        let filter = Filter::parse(r#"{"status": "PAID", "total": {"$eq": 5}, "qty": {"$gt": 1}}"#)
            .unwrap();
        assert_eq!(filter.equality_value("status"), Some(&json!("PAID")));
        assert_eq!(filter.equality_value("total"), Some(&json!(5)));
        assert_eq!(filter.equality_value("qty"), None);
        assert_eq!(filter.equality_value("missing"), None);
    }

    #[test]
    fn test_projection_apply() {
        let projection = Projection::fields(["userId", "status"]).without_id();
        let doc = json!({"_id": "a", "userId": "u1", "status": "PAID", "total": 12});
        assert_eq!(projection.apply(&doc), json!({"userId": "u1", "status": "PAID"}));

        let with_id = Projection::fields(["items.qty"]);
        let doc = json!({"_id": "b", "items": {"qty": 2, "price": 9}});
        assert_eq!(with_id.apply(&doc), json!({"_id": "b", "items": {"qty": 2}}));
    }

    #[test]
    fn test_projection_document_roundtrip() {
        let doc = json!({"userId": 1, "status": 1, "_id": 0});
        let projection = Projection::from_document(&doc).unwrap();
        assert!(!projection.includes_id());
        assert_eq!(projection.field_names(), ["userId", "status"]);
        assert_eq!(projection.to_document(), doc);
    }

    #[test]
    fn test_find_options_pipeline_order() {
        let options = FindOptions::new()
            .projection(Projection::fields(["a"]))
            .skip(10)
            .limit(5);
        let pipeline = options.to_pipeline(&Filter::all());
        let names: Vec<&str> = pipeline.iter().map(Stage::name).collect();
        assert_eq!(names, ["$match", "$skip", "$limit", "$project"]);
    }

    #[test]
    fn test_stage_from_document() {
        let stage = Stage::from_document(&json!({"$skip": 200000})).unwrap();
        assert_eq!(stage, Stage::Skip(200000));
        assert!(Stage::from_document(&json!({"$group": {}})).is_err());
        assert!(Stage::from_document(&json!({"$skip": 1, "$limit": 2})).is_err());
        assert!(validate_pipeline(&[Stage::Limit(0)]).is_err());
    }

    #[test]
    fn test_explain_command_documents() {
        let find = ExplainCommand::find(
            "orders",
            Filter::all(),
            FindOptions::new()
                .projection(Projection::fields(["userId"]).without_id())
                .batch_size(1000),
        );
        let doc = find.to_document();
        assert_eq!(doc["verbosity"], "executionStats");
        assert_eq!(doc["explain"]["find"], "orders");
        assert_eq!(doc["explain"]["projection"], json!({"userId": 1, "_id": 0}));

        let agg = ExplainCommand::aggregate(
            "orders",
            vec![Stage::Match(Filter::eq("status", "PAID")), Stage::Limit(10)],
            Some(1000),
        );
        let doc = agg.to_document();
        assert_eq!(doc["explain"]["aggregate"], "orders");
        assert_eq!(doc["explain"]["pipeline"][0], json!({"$match": {"status": "PAID"}}));
        assert_eq!(doc["explain"]["cursor"]["batchSize"], 1000);
    }
}
