//! Configuration handling.
//!
//! Settings come from `readbench.toml`, then a `.env` file and environment
//! overrides, then command-line flags (applied by the binary).
//!
//! ## Environment Variables
//!
//! - `READBENCH_DATA_DIR` - RocksDB data directory
//! - `READBENCH_COLLECTION` - Collection to read
//! - `READBENCH_WORKERS` - Parallel worker count
//! - `READBENCH_CHUNK_SIZE` - Records per parallel chunk
//! - `READBENCH_BATCH_SIZE` - Cursor batch size
//! - `READBENCH_CONNECT_TIMEOUT_MS` - Store open timeout
//! - `READBENCH_RESULTS_DIR` - Where `<strategy>_results.txt` files go

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ExecutorSettings, ParallelSettings, Strategy};
use crate::error::{BenchError, BenchResult};
use crate::store::{Filter, Projection};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "readbench.toml";

pub const ENV_DATA_DIR: &str = "READBENCH_DATA_DIR";
pub const ENV_COLLECTION: &str = "READBENCH_COLLECTION";
pub const ENV_WORKERS: &str = "READBENCH_WORKERS";
pub const ENV_CHUNK_SIZE: &str = "READBENCH_CHUNK_SIZE";
pub const ENV_BATCH_SIZE: &str = "READBENCH_BATCH_SIZE";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "READBENCH_CONNECT_TIMEOUT_MS";
pub const ENV_RESULTS_DIR: &str = "READBENCH_RESULTS_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// RocksDB data directory
    pub data_dir: PathBuf,
    /// Collection (column family) to read
    pub collection: String,
    /// Timeout for opening the store
    pub connect_timeout_ms: u64,
    /// Directory for per-strategy result files
    pub results_dir: PathBuf,
    /// Filter as JSON text
    pub filter: String,
    /// Fields read by the projected strategies
    pub projection: Vec<String>,
    /// Keep `_id` in projected reads
    pub projection_include_id: bool,
    pub batch_size: u32,
    /// Progress line every N records (0 disables)
    pub progress_interval: u64,
    pub parallel: ParallelSettings,
    pub seed: SeedConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub total: u64,
    pub batch_size: usize,
    /// Fixed RNG seed for reproducible data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            total: 1_000_000,
            batch_size: 1000,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub field: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            field: "status".to_string(),
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        let executor = ExecutorSettings::default();
        Self {
            data_dir: PathBuf::from("./data"),
            collection: "orders".to_string(),
            connect_timeout_ms: 10_000,
            results_dir: PathBuf::from("."),
            filter: r#"{"status": "PAID"}"#.to_string(),
            projection: vec!["userId".to_string(), "status".to_string()],
            projection_include_id: false,
            batch_size: executor.batch_size,
            progress_interval: executor.progress_interval,
            parallel: executor.parallel,
            seed: SeedConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Load `path` (or `readbench.toml` in the working directory), after
    /// loading `.env`, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> BenchResult<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

        let env_path = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.join(".env"))
            .unwrap_or_else(|| PathBuf::from(".env"));
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let mut config = Self::from_file(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse one file. Missing files give the defaults.
    pub fn from_file(path: &Path) -> BenchResult<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| BenchError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> BenchResult<Self> {
        toml::from_str(content).map_err(|e| BenchError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty or unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(dir) = get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(collection) = get(ENV_COLLECTION) {
            self.collection = collection;
        }
        if let Some(workers) = get(ENV_WORKERS).and_then(|v| v.parse().ok()) {
            self.parallel.num_workers = workers;
        }
        if let Some(chunk) = get(ENV_CHUNK_SIZE).and_then(|v| v.parse().ok()) {
            self.parallel.chunk_size = chunk;
        }
        if let Some(batch) = get(ENV_BATCH_SIZE).and_then(|v| v.parse().ok()) {
            self.batch_size = batch;
        }
        if let Some(ms) = get(ENV_CONNECT_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = ms;
        }
        if let Some(dir) = get(ENV_RESULTS_DIR) {
            self.results_dir = PathBuf::from(dir);
        }
    }

    pub fn save(&self, path: &Path) -> BenchResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| BenchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn parsed_filter(&self) -> BenchResult<Filter> {
        Filter::parse(&self.filter)
    }

    pub fn parsed_projection(&self) -> Projection {
        let projection = Projection::fields(self.projection.iter().cloned());
        if self.projection_include_id {
            projection
        } else {
            projection.without_id()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            batch_size: self.batch_size,
            progress_interval: self.progress_interval,
            parallel: self.parallel,
        }
    }

    /// `<results_dir>/<strategy>_results.txt`
    pub fn results_path(&self, strategy: Strategy) -> PathBuf {
        self.results_dir
            .join(format!("{}_results.txt", strategy.label()))
    }
}
