use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use readbench::config::{BenchConfig, CONFIG_FILE_NAME};
use readbench::engine::{ChunkPolicy, Strategy, StrategyExecutor};
use readbench::logging::{
    init_tracing, ConsoleSink, ReportSink, SharedSink, TeeSink, TracingSink,
};
use readbench::report::ComparisonReport;
use readbench::seed::{seed_collection, OrderGenerator};
use readbench::store::{
    DocumentStore, Filter, IndexOptions, IndexOutcome, Projection, RocksStore,
};

#[derive(Parser, Debug)]
#[command(name = "readbench")]
#[command(
    about = "Measure and compare read strategies against a document collection",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to ./readbench.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory path
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Collection to read
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a config file with the defaults
    Init {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        path: PathBuf,
    },
    /// Fill the collection with synthetic orders
    Seed {
        #[arg(long)]
        total: Option<u64>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Fixed RNG seed for reproducible data
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// Create a single-field ascending index and list all indexes
    CreateIndex {
        #[arg(long)]
        field: Option<String>,
    },
    /// Run one strategy and write `<strategy>_results.txt`
    Run {
        #[arg(long, value_enum)]
        strategy: Strategy,
        #[command(flatten)]
        read: ReadArgs,
    },
    /// Run every strategy over the same filter and compare them
    Compare {
        #[command(flatten)]
        read: ReadArgs,
    },
}

#[derive(clap::Args, Debug)]
struct ReadArgs {
    /// Filter as JSON, e.g. '{"status": "PAID"}'
    #[arg(long)]
    filter: Option<String>,

    /// Comma-separated projected fields
    #[arg(long, value_delimiter = ',')]
    projection: Option<Vec<String>>,

    #[arg(long)]
    batch_size: Option<u32>,

    /// Parallel worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Records per parallel chunk
    #[arg(long)]
    chunk_size: Option<u64>,

    #[arg(long, value_enum)]
    policy: Option<ChunkPolicy>,
}

impl ReadArgs {
    fn apply(&self, config: &mut BenchConfig) {
        if let Some(filter) = &self.filter {
            config.filter = filter.clone();
        }
        if let Some(fields) = &self.projection {
            config.projection = fields.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            config.parallel.num_workers = workers;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.parallel.chunk_size = chunk_size;
        }
        if let Some(policy) = self.policy {
            config.parallel.policy = policy;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = BenchConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(collection) = &cli.collection {
        config.collection = collection.clone();
    }

    if let Command::Init { path } = &cli.command {
        config.save(path)?;
        println!("{} {}", "Wrote".green().bold(), path.display());
        return Ok(());
    }

    tracing::info!(
        "Opening '{}' in {}",
        config.collection,
        config.data_dir.display()
    );
    let store: Arc<dyn DocumentStore> = Arc::new(
        RocksStore::connect(&config.data_dir, &config.collection, config.connect_timeout()).await?,
    );
    println!("{} {}", "Connected:".green().bold(), config.collection);

    match cli.command {
        Command::Init { .. } => {}
        Command::Seed {
            total,
            batch_size,
            rng_seed,
        } => {
            let total = total.unwrap_or(config.seed.total);
            let batch_size = batch_size.unwrap_or(config.seed.batch_size);
            let mut generator = OrderGenerator::new(rng_seed.or(config.seed.rng_seed));
            seed_collection(store.as_ref(), &mut generator, total, batch_size, &TracingSink)
                .await?;
        }
        Command::CreateIndex { field } => {
            let field = field.unwrap_or_else(|| config.index.field.clone());
            create_index(store.as_ref(), &field).await?;
        }
        Command::Run { strategy, read } => {
            read.apply(&mut config);
            run_strategy(store, &config, strategy).await?;
        }
        Command::Compare { read } => {
            read.apply(&mut config);
            compare(store, &config).await?;
        }
    }

    Ok(())
}

async fn create_index(store: &dyn DocumentStore, field: &str) -> anyhow::Result<()> {
    println!("Creating index on '{}'...", field);
    match store
        .create_index(&[field.to_string()], &IndexOptions::default())
        .await?
    {
        IndexOutcome::Created(name) => println!("{} {}", "Index created:".green().bold(), name),
        IndexOutcome::AlreadyExists(name) => {
            println!("{} {}", "Index already exists:".yellow(), name)
        }
    }

    println!("\nIndexes:");
    for spec in store.list_indexes().await? {
        println!("  - {} ({})", spec.name, spec.keys.join(", "));
    }
    println!("\nA full read still scans the collection; the index helps filtered reads.");
    Ok(())
}

fn read_inputs(config: &BenchConfig) -> anyhow::Result<(Filter, Projection)> {
    Ok((config.parsed_filter()?, config.parsed_projection()))
}

fn results_sink(config: &BenchConfig, strategy: Strategy) -> anyhow::Result<Arc<TeeSink>> {
    let sink = Arc::new(TeeSink::create(config.results_path(strategy))?);
    sink.write_header(strategy.label());
    Ok(sink)
}

async fn run_strategy(
    store: Arc<dyn DocumentStore>,
    config: &BenchConfig,
    strategy: Strategy,
) -> anyhow::Result<()> {
    let (filter, projection) = read_inputs(config)?;
    let sink = results_sink(config, strategy)?;
    let path = sink.path().to_path_buf();

    let executor =
        StrategyExecutor::new(store, sink).with_settings(config.executor_settings());
    executor
        .run(strategy, &filter, Some(projection), None)
        .await?;

    println!("\n{} {}", "Results written to".green(), path.display());
    Ok(())
}

async fn compare(store: Arc<dyn DocumentStore>, config: &BenchConfig) -> anyhow::Result<()> {
    let (filter, projection) = read_inputs(config)?;
    let console: SharedSink = Arc::new(ConsoleSink);
    let mut executor =
        StrategyExecutor::new(store, console.clone()).with_settings(config.executor_settings());

    let mut runs = Vec::with_capacity(Strategy::ALL.len());
    for strategy in Strategy::ALL {
        executor = executor.with_sink(results_sink(config, strategy)?);
        match executor
            .run_detailed(strategy, &filter, Some(projection.clone()), None)
            .await
        {
            Ok(run) => runs.push(run),
            Err(e) => {
                tracing::error!("{} failed: {}", strategy, e);
                console.write_line(&format!("{} {}: {}", "FAILED".red().bold(), strategy, e));
            }
        }
    }

    ComparisonReport::from_runs(&runs).render(console.as_ref());
    Ok(())
}
