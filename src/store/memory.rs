//! In-process document store.
//!
//! Documents are kept in insertion order. Secondary indexes map the
//! binary-comparable key of their first field to document positions, so an
//! equality `$match` on an indexed field touches only the matching entries.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::codec::{encode_key, index_keys};
use super::exec::{run_stages, AccessPath, Candidate};
use super::explain::{execute_counted, explain_document};
use super::query::{lookup_path, validate_pipeline, ExplainCommand, Filter, FindOptions, Stage};
use super::{
    prepare_document, DocumentCursor, DocumentStore, IndexOptions, IndexOutcome, IndexSpec,
};
use crate::error::{BenchError, BenchResult};

/// Failures the store injects on request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFaults {
    pub fail_explain: bool,
    pub fail_open_cursor: bool,
}

struct MemoryIndex {
    spec: IndexSpec,
    entries: BTreeMap<Vec<u8>, Vec<usize>>,
}

impl MemoryIndex {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    fn insert(&mut self, position: usize, candidate: &Candidate) {
        let (Candidate::Doc(doc), Some(field)) = (candidate, self.spec.keys.first()) else {
            return;
        };
        for key in index_keys(lookup_path(doc, field)) {
            self.entries.entry(key).or_default().push(position);
        }
    }

    fn lookup(&self, key: &Value) -> &[usize] {
        self.entries
            .get(&encode_key(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Default)]
struct MemoryState {
    documents: Vec<Arc<Candidate>>,
    indexes: Vec<MemoryIndex>,
}

impl MemoryState {
    fn push(&mut self, candidate: Candidate) {
        let position = self.documents.len();
        for index in &mut self.indexes {
            index.insert(position, &candidate);
        }
        self.documents.push(Arc::new(candidate));
    }

    fn specs(&self) -> Vec<IndexSpec> {
        self.indexes.iter().map(|i| i.spec.clone()).collect()
    }

    /// The access path for `pipeline` and the documents it will visit.
    fn snapshot(&self, pipeline: &[Stage]) -> (AccessPath, Vec<Arc<Candidate>>) {
        let access = AccessPath::select(pipeline, &self.specs());
        let documents = match &access {
            AccessPath::CollectionScan => self.documents.clone(),
            AccessPath::IndexScan { index, key, .. } => self
                .indexes
                .iter()
                .find(|i| &i.spec.name == index)
                .map(|i| {
                    i.lookup(key)
                        .iter()
                        .filter_map(|&pos| self.documents.get(pos).cloned())
                        .collect()
                })
                .unwrap_or_default(),
        };
        (access, documents)
    }
}

fn source(documents: Vec<Arc<Candidate>>) -> impl Iterator<Item = BenchResult<Candidate>> + Send {
    documents.into_iter().map(|c| Ok(Candidate::clone(&c)))
}

/// A collection held entirely in memory.
pub struct MemoryStore {
    collection: String,
    state: Arc<RwLock<MemoryState>>,
    faults: MemoryFaults,
}

impl MemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            state: Arc::new(RwLock::new(MemoryState::default())),
            faults: MemoryFaults::default(),
        }
    }

    pub fn with_faults(mut self, faults: MemoryFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Store bytes verbatim. Bytes that are not a JSON object are served
    /// as-is to every reader and fail to decode there.
    pub fn insert_raw(&self, bytes: Vec<u8>) {
        self.state.write().push(Candidate::from_bytes(&bytes));
    }

    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open(&self, pipeline: Vec<Stage>) -> BenchResult<DocumentCursor> {
        if self.faults.fail_open_cursor {
            return Err(BenchError::OpenCursor(format!(
                "collection '{}' refused the read",
                self.collection
            )));
        }
        validate_pipeline(&pipeline)?;

        let (_, documents) = self.state.read().snapshot(&pipeline);
        Ok(DocumentCursor::new(async_stream::stream! {
            for item in run_stages(source(documents), &pipeline) {
                yield item.and_then(Candidate::into_raw);
            }
        }))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> BenchResult<DocumentCursor> {
        self.open(options.to_pipeline(filter))
    }

    async fn aggregate(
        &self,
        pipeline: &[Stage],
        _batch_size: Option<u32>,
    ) -> BenchResult<DocumentCursor> {
        self.open(pipeline.to_vec())
    }

    async fn count(&self, filter: &Filter) -> BenchResult<u64> {
        let pipeline = vec![Stage::Match(filter.clone())];
        let (_, documents) = self.state.read().snapshot(&pipeline);
        let mut total = 0u64;
        for item in run_stages(source(documents), &pipeline) {
            item?;
            total += 1;
        }
        Ok(total)
    }

    async fn explain(&self, command: &ExplainCommand) -> BenchResult<Value> {
        if self.faults.fail_explain {
            return Err(BenchError::Explain(format!(
                "explain is not permitted on '{}'",
                command.collection()
            )));
        }
        let pipeline = command.pipeline();
        validate_pipeline(&pipeline)?;

        let (access, documents) = self.state.read().snapshot(&pipeline);
        let counters = execute_counted(source(documents), &pipeline, &access)?;
        Ok(explain_document(command, &access, &counters))
    }

    async fn create_index(
        &self,
        keys: &[String],
        options: &IndexOptions,
    ) -> BenchResult<IndexOutcome> {
        if keys.is_empty() {
            return Err(BenchError::InvalidArgument(
                "an index needs at least one key".to_string(),
            ));
        }
        let name = options.resolve_name(keys);

        let mut state = self.state.write();
        if state.indexes.iter().any(|i| i.spec.name == name) {
            return Ok(IndexOutcome::AlreadyExists(name));
        }

        let mut index = MemoryIndex::new(IndexSpec {
            name: name.clone(),
            keys: keys.to_vec(),
            unique: options.unique,
        });
        for (position, candidate) in state.documents.iter().enumerate() {
            index.insert(position, candidate);
        }
        state.indexes.push(index);
        Ok(IndexOutcome::Created(name))
    }

    async fn list_indexes(&self) -> BenchResult<Vec<IndexSpec>> {
        Ok(self.state.read().specs())
    }

    async fn insert_many(&self, documents: Vec<Value>) -> BenchResult<usize> {
        let prepared = documents
            .into_iter()
            .map(|doc| prepare_document(doc).map(|(_, doc)| doc))
            .collect::<BenchResult<Vec<_>>>()?;

        let inserted = prepared.len();
        let mut state = self.state.write();
        for doc in prepared {
            state.push(Candidate::Doc(doc));
        }
        Ok(inserted)
    }
}
