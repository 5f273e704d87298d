//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use readbench::engine::{ExecutorSettings, ScriptedSampler, StrategyExecutor};
use readbench::logging::MemorySink;
use readbench::store::{DocumentStore, MemoryStore, RocksStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

pub const STATUSES: [&str; 3] = ["PAID", "CANCELLED", "PENDING"];

/// `n` orders; statuses cycle PAID, CANCELLED, PENDING.
pub fn orders(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            json!({
                "userId": format!("user-{}", i),
                "status": STATUSES[i % STATUSES.len()],
                "total": (i * 37) % 5000,
                "items": [{"productId": format!("p-{}", i), "price": i % 1000, "qty": 1 + i % 5}],
            })
        })
        .collect()
}

/// Orders with `status = PAID` among `orders(n)`.
pub fn paid_count(n: usize) -> u64 {
    n.div_ceil(STATUSES.len()) as u64
}

pub async fn seeded_memory_store(n: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("orders"));
    store
        .insert_many(orders(n))
        .await
        .expect("Failed to seed memory store");
    store
}

pub async fn seeded_rocks_store(n: usize) -> (Arc<RocksStore>, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = RocksStore::open(tmp_dir.path(), "orders").expect("Failed to open rocks store");
    store
        .insert_many(orders(n))
        .await
        .expect("Failed to seed rocks store");
    (Arc::new(store), tmp_dir)
}

/// Executor writing into a fresh [`MemorySink`], with progress lines off.
pub fn executor(store: Arc<dyn DocumentStore>) -> (StrategyExecutor, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let settings = ExecutorSettings {
        progress_interval: 0,
        ..Default::default()
    };
    let executor = StrategyExecutor::new(store, sink.clone())
        .with_settings(settings)
        .with_sampler(Arc::new(ScriptedSampler::new([0])));
    (executor, sink)
}
