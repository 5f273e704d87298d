//! Store access capability.
//!
//! The benchmark engine only ever talks to a [`DocumentStore`]. Two bindings
//! ship with the crate: [`MemoryStore`] (in-process, used by tests and quick
//! experiments) and [`RocksStore`] (an on-disk collection).

pub mod codec;
pub mod exec;
pub mod explain;
pub mod memory;
pub mod query;
pub mod rocks;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{BenchError, BenchResult};

pub use memory::{MemoryFaults, MemoryStore};
pub use query::{ExplainCommand, Filter, FindOptions, Projection, Stage, EXPLAIN_VERBOSITY};
pub use rocks::RocksStore;

/// The encoded bytes of one document, as delivered by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode into a document tree.
    pub fn decode(&self) -> BenchResult<Value> {
        serde_json::from_slice(&self.bytes).map_err(|e| BenchError::Decode(e.to_string()))
    }
}

/// Lazy, forward-only, single-pass sequence of documents.
pub struct DocumentCursor {
    inner: BoxStream<'static, BenchResult<RawDocument>>,
}

impl DocumentCursor {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = BenchResult<RawDocument>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Next document, or `None` once the cursor is exhausted.
    pub async fn next(&mut self) -> Option<BenchResult<RawDocument>> {
        self.inner.next().await
    }

    /// Buffer every remaining document.
    pub async fn collect_all(self) -> BenchResult<Vec<RawDocument>> {
        self.inner.try_collect().await
    }
}

impl Stream for DocumentCursor {
    type Item = BenchResult<RawDocument>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for DocumentCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCursor").finish_non_exhaustive()
    }
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            unique: false,
        }
    }

    /// The explicit name, or the conventional `field_1[_field2_1...]`.
    pub fn resolve_name(&self, keys: &[String]) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => keys
                .iter()
                .map(|k| format!("{}_1", k))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Created(String),
    AlreadyExists(String),
}

impl IndexOutcome {
    pub fn name(&self) -> &str {
        match self {
            IndexOutcome::Created(name) | IndexOutcome::AlreadyExists(name) => name,
        }
    }
}

/// Read, aggregate and explain operations against one collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the collection this handle reads.
    fn collection(&self) -> &str;

    async fn find(&self, filter: &Filter, options: &FindOptions) -> BenchResult<DocumentCursor>;

    async fn aggregate(
        &self,
        pipeline: &[Stage],
        batch_size: Option<u32>,
    ) -> BenchResult<DocumentCursor>;

    async fn count(&self, filter: &Filter) -> BenchResult<u64>;

    /// Execute `command` for statistics and return the plan document.
    async fn explain(&self, command: &ExplainCommand) -> BenchResult<Value>;

    async fn create_index(&self, keys: &[String], options: &IndexOptions)
        -> BenchResult<IndexOutcome>;

    async fn list_indexes(&self) -> BenchResult<Vec<IndexSpec>>;

    /// Insert documents, assigning `_id` where missing. Returns the number stored.
    async fn insert_many(&self, documents: Vec<Value>) -> BenchResult<usize>;
}

/// Ensure every document is an object with an `_id`.
pub(crate) fn prepare_document(doc: Value) -> BenchResult<(String, Value)> {
    let Value::Object(mut map) = doc else {
        return Err(BenchError::InvalidArgument(
            "documents must be JSON objects".to_string(),
        ));
    };
    let id = match map.get("_id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            map.insert("_id".to_string(), Value::String(id.clone()));
            id
        }
    };
    Ok((id, Value::Object(map)))
}
