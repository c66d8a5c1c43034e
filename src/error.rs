use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Initialization error: {0}")]
    Initialization(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open {name} database: {source}")]
    DatabaseOpen {
        name: String,
        #[source]
        source: sled::Error,
    },

    #[error("Database operation failed: {0}")]
    DatabaseOp(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid cache capacity: {0} (must be > 0)")]
    InvalidCacheCapacity(usize),
}

impl StorageError {
    pub fn serialization(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Block at height {got} arrived out of order (expected {expected})")]
    OutOfOrderBlock { expected: u64, got: u64 },

    #[error("Disconnect for height {got} does not match tip {tip:?}")]
    DisconnectMismatch { tip: Option<u64>, got: u64 },

    #[error("Rewind data for height {0} was already purged; full reindex required")]
    RewindHorizon(u64),

    #[error("Cannot reconcile indexer tip: {0}")]
    TipReconciliation(String),
}
