//! RocksDB-backed collection.
//!
//! One column family per collection. Key layout inside it:
//!
//! - `doc:{id}` → document JSON
//! - `idx:{index}:{hex key}:{id}` → id
//! - `idx_meta:{index}` → [`IndexSpec`] JSON

use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::codec::{encode_key_hex, index_keys};
use super::exec::{run_stages, AccessPath, Candidate};
use super::explain::{execute_counted, explain_document};
use super::query::{lookup_path, validate_pipeline, ExplainCommand, Filter, FindOptions, Stage};
use super::{
    prepare_document, DocumentCursor, DocumentStore, IndexOptions, IndexOutcome, IndexSpec,
    RawDocument,
};
use crate::error::{BenchError, BenchResult};

const DOC_PREFIX: &str = "doc:";
const IDX_PREFIX: &str = "idx:";
const IDX_META_PREFIX: &str = "idx_meta:";

/// Channel capacity when the caller gives no batch size.
const DEFAULT_BATCH_SIZE: u32 = 101;

fn doc_key(id: &str) -> Vec<u8> {
    format!("{}{}", DOC_PREFIX, id).into_bytes()
}

fn idx_prefix(index: &str, key: &Value) -> String {
    format!("{}{}:{}:", IDX_PREFIX, index, encode_key_hex(key))
}

fn idx_meta_key(index: &str) -> Vec<u8> {
    format!("{}{}", IDX_META_PREFIX, index).into_bytes()
}

/// Every `idx:` entry key a document contributes to `spec`.
fn idx_entry_keys(spec: &IndexSpec, id: &str, doc: &Value) -> Vec<Vec<u8>> {
    let Some(field) = spec.keys.first() else {
        return Vec::new();
    };
    index_keys(lookup_path(doc, field))
        .into_iter()
        .map(|key| format!("{}{}:{}:{}", IDX_PREFIX, spec.name, hex::encode(key), id).into_bytes())
        .collect()
}

fn column_family<'a>(db: &'a DB, collection: &str) -> BenchResult<&'a ColumnFamily> {
    db.cf_handle(collection).ok_or_else(|| {
        BenchError::Storage(format!("column family '{}' is missing", collection))
    })
}

fn load_indexes(db: &DB, cf: &ColumnFamily) -> BenchResult<Vec<IndexSpec>> {
    let prefix = IDX_META_PREFIX.as_bytes();
    let mut specs = Vec::new();
    for entry in db.prefix_iterator_cf(cf, prefix) {
        let (key, value) = entry?;
        if !key.starts_with(prefix) {
            break;
        }
        specs.push(serde_json::from_slice(&value)?);
    }
    Ok(specs)
}

/// Visit candidates along `access`. Must be consumed on the thread that built it.
fn candidates<'a>(
    db: &'a DB,
    cf: &'a ColumnFamily,
    access: &AccessPath,
) -> Box<dyn Iterator<Item = BenchResult<Candidate>> + 'a> {
    match access {
        AccessPath::CollectionScan => {
            let prefix = DOC_PREFIX.as_bytes();
            Box::new(
                db.prefix_iterator_cf(cf, prefix)
                    .take_while(move |entry| {
                        entry.as_ref().map_or(true, |(key, _)| key.starts_with(prefix))
                    })
                    .map(|entry| {
                        entry
                            .map(|(_, value)| Candidate::from_bytes(&value))
                            .map_err(BenchError::from)
                    }),
            )
        }
        AccessPath::IndexScan { index, key, .. } => {
            let prefix = idx_prefix(index, key).into_bytes();
            Box::new(
                db.prefix_iterator_cf(cf, prefix.clone())
                    .take_while(move |entry| {
                        entry.as_ref().map_or(true, |(k, _)| k.starts_with(&prefix))
                    })
                    .filter_map(move |entry| {
                        let fetched = entry.map_err(BenchError::from).and_then(|(_, id)| {
                            let id = String::from_utf8_lossy(&id);
                            Ok(db.get_cf(cf, doc_key(&id))?)
                        });
                        match fetched {
                            Ok(Some(bytes)) => Some(Ok(Candidate::from_bytes(&bytes))),
                            Ok(None) => None,
                            Err(e) => Some(Err(e)),
                        }
                    }),
            )
        }
    }
}

/// A collection stored in a RocksDB column family.
pub struct RocksStore {
    db: Arc<DB>,
    path: PathBuf,
    collection: String,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.path)
            .field("collection", &self.collection)
            .finish()
    }
}

impl RocksStore {
    /// Open (creating if needed) the database at `path` with a column family
    /// for `collection`.
    pub fn open<P: AsRef<Path>>(path: P, collection: impl Into<String>) -> BenchResult<Self> {
        let path = path.as_ref().to_path_buf();
        let collection = collection.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(5);

        let mut cf_names =
            DB::list_cf(&opts, &path).unwrap_or_else(|_| vec!["default".to_string()]);
        if !cf_names.contains(&collection) {
            cf_names.push(collection.clone());
        }
        let descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, descriptors).map_err(|e| {
            BenchError::Connection(format!(
                "Failed to open RocksDB at {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!("Opened {} collection '{}'", path.display(), collection);
        Ok(Self {
            db: Arc::new(db),
            path,
            collection,
        })
    }

    /// Open the store, giving up after `timeout`.
    ///
    /// The timeout covers handle acquisition only; reads are never timed out.
    pub async fn connect<P: AsRef<Path>>(
        path: P,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> BenchResult<Self> {
        let path = path.as_ref().to_path_buf();
        let collection = collection.into();
        let opening = tokio::task::spawn_blocking(move || Self::open(path, collection));

        match tokio::time::timeout(timeout, opening).await {
            Ok(joined) => joined.map_err(|e| BenchError::Connection(e.to_string()))?,
            Err(_) => Err(BenchError::ConnectTimeout(timeout)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a blocking closure against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> BenchResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DB, &ColumnFamily) -> BenchResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        let collection = self.collection.clone();
        tokio::task::spawn_blocking(move || {
            let cf = column_family(&db, &collection)?;
            f(&db, cf)
        })
        .await?
    }

    /// Stream `pipeline` results through a channel fed by a blocking reader.
    fn open_cursor(
        &self,
        pipeline: Vec<Stage>,
        batch_size: Option<u32>,
    ) -> BenchResult<DocumentCursor> {
        validate_pipeline(&pipeline)?;
        if self.db.cf_handle(&self.collection).is_none() {
            return Err(BenchError::OpenCursor(format!(
                "collection '{}' does not exist",
                self.collection
            )));
        }

        let capacity = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1) as usize;
        let (tx, mut rx) = mpsc::channel::<BenchResult<RawDocument>>(capacity);
        let db = self.db.clone();
        let collection = self.collection.clone();

        let reader = tokio::task::spawn_blocking(move || {
            let cf = match column_family(&db, &collection) {
                Ok(cf) => cf,
                Err(e) => {
                    let _ = tx.blocking_send(Err(BenchError::Cursor(e.to_string())));
                    return;
                }
            };
            let access = match load_indexes(&db, cf) {
                Ok(indexes) => AccessPath::select(&pipeline, &indexes),
                Err(e) => {
                    let _ = tx.blocking_send(Err(BenchError::Cursor(e.to_string())));
                    return;
                }
            };

            for item in run_stages(candidates(&db, cf, &access), &pipeline) {
                if tx.blocking_send(item.and_then(Candidate::into_raw)).is_err() {
                    tracing::debug!("Cursor on '{}' dropped before exhaustion", collection);
                    return;
                }
            }
        });

        Ok(DocumentCursor::new(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
            if let Err(e) = reader.await {
                yield Err(BenchError::Cursor(format!("reader task failed: {}", e)));
            }
        }))
    }
}

#[async_trait]
impl DocumentStore for RocksStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> BenchResult<DocumentCursor> {
        self.open_cursor(options.to_pipeline(filter), options.batch_size)
    }

    async fn aggregate(
        &self,
        pipeline: &[Stage],
        batch_size: Option<u32>,
    ) -> BenchResult<DocumentCursor> {
        self.open_cursor(pipeline.to_vec(), batch_size)
    }

    async fn count(&self, filter: &Filter) -> BenchResult<u64> {
        let pipeline = vec![Stage::Match(filter.clone())];
        self.blocking(move |db, cf| {
            let access = AccessPath::select(&pipeline, &load_indexes(db, cf)?);
            let mut total = 0u64;
            for item in run_stages(candidates(db, cf, &access), &pipeline) {
                item?;
                total += 1;
            }
            Ok(total)
        })
        .await
    }

    async fn explain(&self, command: &ExplainCommand) -> BenchResult<Value> {
        let command = command.clone();
        self.blocking(move |db, cf| {
            let pipeline = command.pipeline();
            validate_pipeline(&pipeline)?;
            let indexes = load_indexes(db, cf).map_err(|e| BenchError::Explain(e.to_string()))?;
            let access = AccessPath::select(&pipeline, &indexes);
            let counters = execute_counted(candidates(db, cf, &access), &pipeline, &access)?;
            Ok(explain_document(&command, &access, &counters))
        })
        .await
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
        let spec = IndexSpec {
            name: options.resolve_name(keys),
            keys: keys.to_vec(),
            unique: options.unique,
        };

        self.blocking(move |db, cf| {
            if db.get_cf(cf, idx_meta_key(&spec.name))?.is_some() {
                return Ok(IndexOutcome::AlreadyExists(spec.name));
            }

            let mut batch = WriteBatch::default();
            let prefix = DOC_PREFIX.as_bytes();
            for entry in db.prefix_iterator_cf(cf, prefix) {
                let (key, value) = entry?;
                if !key.starts_with(prefix) {
                    break;
                }
                let Candidate::Doc(doc) = Candidate::from_bytes(&value) else {
                    continue;
                };
                let id = String::from_utf8_lossy(&key[prefix.len()..]);
                for entry_key in idx_entry_keys(&spec, &id, &doc) {
                    batch.put_cf(cf, entry_key, id.as_bytes());
                }
            }
            batch.put_cf(cf, idx_meta_key(&spec.name), serde_json::to_vec(&spec)?);
            db.write(batch)?;

            tracing::info!("Built index '{}' on {:?}", spec.name, spec.keys);
            Ok(IndexOutcome::Created(spec.name))
        })
        .await
    }

    async fn list_indexes(&self) -> BenchResult<Vec<IndexSpec>> {
        self.blocking(|db, cf| load_indexes(db, cf)).await
    }

    async fn insert_many(&self, documents: Vec<Value>) -> BenchResult<usize> {
        let prepared = documents
            .into_iter()
            .map(prepare_document)
            .collect::<BenchResult<Vec<_>>>()?;

        self.blocking(move |db, cf| {
            let indexes = load_indexes(db, cf)?;
            let mut batch = WriteBatch::default();
            for (id, doc) in &prepared {
                batch.put_cf(cf, doc_key(id), serde_json::to_vec(doc)?);
                for spec in &indexes {
                    for entry_key in idx_entry_keys(spec, id, doc) {
                        batch.put_cf(cf, entry_key, id.as_bytes());
                    }
                }
            }
            db.write(batch)?;
            Ok(prepared.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store() -> (RocksStore, TempDir) {
        let tmp = TempDir::new().expect("Failed to create temp dir");
        let store = RocksStore::open(tmp.path(), "orders").expect("Failed to open store");
        (store, tmp)
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(doc_key("a1"), b"doc:a1".to_vec());
        assert_eq!(idx_meta_key("status_1"), b"idx_meta:status_1".to_vec());
        assert_eq!(idx_prefix("status_1", &json!(false)), "idx:status_1:0200:");

        let spec = IndexSpec {
            name: "tags_1".to_string(),
            keys: vec!["tags".to_string()],
            unique: false,
        };
        let keys = idx_entry_keys(&spec, "d1", &json!({"tags": [true, false]}));
        assert_eq!(keys.len(), 2);
        assert!(keys[0].starts_with(b"idx:tags_1:0200:"));
    }

    #[tokio::test]
    async fn test_insert_count_and_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = RocksStore::open(tmp.path(), "orders").unwrap();
            let inserted = store
                .insert_many(vec![
                    json!({"status": "PAID"}),
                    json!({"status": "PENDING"}),
                    json!({"_id": "fixed", "status": "PAID"}),
                ])
                .await
                .unwrap();
            assert_eq!(inserted, 3);
        }

        let store = RocksStore::connect(tmp.path(), "orders", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.count(&Filter::all()).await.unwrap(), 3);
        assert_eq!(store.count(&Filter::eq("status", "PAID")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_index_scan_after_create() {
        let (store, _tmp) = open_store();
        let docs = (0..40)
            .map(|i| json!({"status": if i % 4 == 0 { "PAID" } else { "PENDING" }}))
            .collect();
        store.insert_many(docs).await.unwrap();

        let outcome = store
            .create_index(&["status".to_string()], &IndexOptions::named("status_1"))
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Created("status_1".to_string()));

        store
            .insert_many(vec![json!({"status": "PAID"})])
            .await
            .unwrap();

        let filter = Filter::eq("status", "PAID");
        let plan = store
            .explain(&ExplainCommand::find("orders", filter.clone(), FindOptions::new()))
            .await
            .unwrap();
        assert_eq!(plan["queryPlanner"]["winningPlan"]["stage"], "FETCH");
        assert_eq!(plan["executionStats"]["totalDocsExamined"], 11);
        assert_eq!(plan["executionStats"]["nReturned"], 11);

        let mut cursor = store.find(&filter, &FindOptions::new().batch_size(3)).await.unwrap();
        let mut seen = 0;
        while let Some(doc) = cursor.next().await {
            assert_eq!(doc.unwrap().decode().unwrap()["status"], "PAID");
            seen += 1;
        }
        assert_eq!(seen, 11);
    }

    #[tokio::test]
    async fn test_existing_index_is_reported() {
        let (store, _tmp) = open_store();
        let keys = vec!["status".to_string()];
        store.create_index(&keys, &IndexOptions::default()).await.unwrap();
        let again = store.create_index(&keys, &IndexOptions::default()).await.unwrap();
        assert_eq!(again, IndexOutcome::AlreadyExists("status_1".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_cursor_stops_reader() {
        let (store, _tmp) = open_store();
        let docs = (0..500).map(|i| json!({"n": i})).collect();
        store.insert_many(docs).await.unwrap();

        let mut cursor = store
            .aggregate(&[Stage::Match(Filter::all())], Some(2))
            .await
            .unwrap();
        assert!(cursor.next().await.is_some());
        drop(cursor);

        assert_eq!(store.count(&Filter::all()).await.unwrap(), 500);
    }
}
