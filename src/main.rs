use clap::Parser;
use indexd::block_queue::QueueCommand;
use indexd::config::Config;
use indexd::error::AppError;
use indexd::shutdown::ShutdownManager;
use indexd::{AddressIndexer, BlockStoreQueue, OutpointsRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const QUEUE_DEPTH: usize = 64;
const STATS_INTERVAL_SECS: u64 = 300;

#[derive(Parser, Debug)]
#[command(name = "indexd")]
#[command(about = "UTXO address indexer daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(_) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let config = match Config::load_or_create(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        "indexd {} ({} {}), started {}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_DATE"),
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    if let Err(e) = run(config).await {
        tracing::error!("❌ Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let data_dir = config.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("📂 Data directory: {}", data_dir.display());

    let db = sled::open(data_dir.join("db")).map_err(|e| {
        AppError::Initialization(format!("Failed to open database: {}", e))
    })?;

    let repository = Arc::new(OutpointsRepository::new(
        &db,
        config.storage.max_cache_items,
    )?);
    let queue = Arc::new(BlockStoreQueue::new(&db)?);
    let indexer = Arc::new(AddressIndexer::new(
        Arc::clone(&repository),
        config.indexer.max_reorg_depth,
        config.indexer.checkpoint_interval_blocks,
    ));

    indexer.initialize(&queue)?;

    let mut shutdown = ShutdownManager::new();

    // Ingestion handle for upstream producers (network/miner layers).
    let (command_tx, command_rx) = mpsc::channel::<QueueCommand>(QUEUE_DEPTH);

    let queue_task = tokio::spawn(Arc::clone(&queue).run(
        command_rx,
        Arc::clone(&indexer) as Arc<dyn indexd::ChainEventSink>,
        shutdown.token(),
    ));
    shutdown.register_task(queue_task);

    let maintenance_task = tokio::spawn(Arc::clone(&indexer).run_maintenance(
        Duration::from_secs(config.storage.flush_interval_secs),
        shutdown.token(),
    ));
    shutdown.register_task(maintenance_task);

    let stats_indexer = Arc::clone(&indexer);
    let stats_cancel = shutdown.token();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = stats_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = stats_indexer.stats();
                    tracing::info!(
                        "📊 Index tip: {:?}, cache load: {:.2}%, hits: {}, misses: {}, evictions: {}",
                        stats_indexer.tip().map(|t| t.height),
                        stats_indexer.load_percentage(),
                        stats.cache_hits,
                        stats.cache_misses,
                        stats.evictions,
                    );
                }
            }
        }
    });
    shutdown.register_task(stats_task);

    tracing::info!("✅ indexd running, press ctrl+c to stop");

    // Keep the ingestion handle alive for the daemon's lifetime; dropping it
    // would stop the queue worker.
    let _command_tx = command_tx;

    shutdown.wait_for_shutdown().await;

    db.flush_async()
        .await
        .map_err(indexd::StorageError::from)?;
    tracing::info!("✓ Database flushed, goodbye");
    Ok(())
}
