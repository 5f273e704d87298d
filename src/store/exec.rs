//! Stage-by-stage pipeline execution shared by the store bindings.

use serde_json::Value;
use std::time::Duration;

use super::query::{Filter, Projection, Stage};
use super::{IndexSpec, RawDocument};
use crate::error::BenchResult;

/// A stored document as the store sees it.
///
/// Bytes that do not parse as a JSON object stay opaque: they pass every
/// `$match`, skip `$project`, and reach the client untouched, where decoding
/// fails.
#[derive(Debug, Clone)]
pub enum Candidate {
    Doc(Value),
    Opaque(Vec<u8>),
}

impl Candidate {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(doc @ Value::Object(_)) => Candidate::Doc(doc),
            _ => Candidate::Opaque(bytes.to_vec()),
        }
    }

    pub fn into_raw(self) -> BenchResult<RawDocument> {
        match self {
            Candidate::Doc(doc) => Ok(RawDocument::new(serde_json::to_vec(&doc)?)),
            Candidate::Opaque(bytes) => Ok(RawDocument::new(bytes)),
        }
    }
}

/// How the leading `$match` reaches its documents.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    CollectionScan,
    IndexScan {
        index: String,
        field: String,
        key: Value,
    },
}

impl AccessPath {
    /// Use an index only for an equality condition on its first key in a
    /// leading `$match`.
    pub fn select(pipeline: &[Stage], indexes: &[IndexSpec]) -> Self {
        let Some(Stage::Match(filter)) = pipeline.first() else {
            return AccessPath::CollectionScan;
        };

        indexes
            .iter()
            .find_map(|index| {
                let field = index.keys.first()?;
                match filter.equality_value(field)? {
                    Value::Array(_) | Value::Object(_) => None,
                    key => Some(AccessPath::IndexScan {
                        index: index.name.clone(),
                        field: field.clone(),
                        key: key.clone(),
                    }),
                }
            })
            .unwrap_or(AccessPath::CollectionScan)
    }

    pub fn is_index_scan(&self) -> bool {
        matches!(self, AccessPath::IndexScan { .. })
    }
}

/// Counters gathered while executing for explain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionCounters {
    pub docs_examined: u64,
    pub keys_examined: u64,
    pub n_returned: u64,
    pub elapsed: Duration,
}

enum StageState<'a> {
    Match(&'a Filter),
    Project(&'a Projection),
    Skip(u64),
    Limit(u64),
}

/// Lazy pipeline over a candidate source: each pulled candidate runs
/// through the stages in order.
///
/// Source errors bypass every stage and are yielded as they come.
pub struct Pipeline<'a, I> {
    source: I,
    stages: Vec<StageState<'a>>,
}

/// Chain the pipeline stages over a candidate source.
pub fn run_stages<'a, I>(source: I, stages: &'a [Stage]) -> Pipeline<'a, I>
where
    I: Iterator<Item = BenchResult<Candidate>>,
{
    let stages = stages
        .iter()
        .map(|stage| match stage {
            Stage::Match(filter) => StageState::Match(filter),
            Stage::Project(projection) => StageState::Project(projection),
            Stage::Skip(n) => StageState::Skip(*n),
            Stage::Limit(n) => StageState::Limit(*n),
        })
        .collect();
    Pipeline { source, stages }
}

impl<'a, I> Pipeline<'a, I> {
    fn exhausted(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| matches!(stage, StageState::Limit(0)))
    }
}

impl<'a, I> Iterator for Pipeline<'a, I>
where
    I: Iterator<Item = BenchResult<Candidate>>,
{
    type Item = BenchResult<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        'pull: loop {
            if self.exhausted() {
                return None;
            }
            let mut candidate = match self.source.next()? {
                Ok(candidate) => candidate,
                Err(e) => return Some(Err(e)),
            };

            for stage in self.stages.iter_mut() {
                match stage {
                    StageState::Match(filter) => {
                        if let Candidate::Doc(doc) = &candidate {
                            if !filter.matches(doc) {
                                continue 'pull;
                            }
                        }
                    }
                    StageState::Project(projection) => {
                        if let Candidate::Doc(doc) = &candidate {
                            candidate = Candidate::Doc(projection.apply(doc));
                        }
                    }
                    StageState::Skip(remaining) => {
                        if *remaining > 0 {
                            *remaining -= 1;
                            continue 'pull;
                        }
                    }
                    StageState::Limit(remaining) => *remaining -= 1,
                }
            }
            return Some(Ok(candidate));
        }
    }
}
