//! Block store queue with address indexing and a rewindable write-back
//! cache: the storage engine that keeps an address -> UTXO mapping
//! consistent across block connections, disconnections, and crashes.

pub mod address;
pub mod address_indexer;
pub mod block_queue;
pub mod config;
pub mod error;
pub mod memory_cache;
pub mod outpoints_repository;
pub mod shutdown;
pub mod types;

pub use address_indexer::AddressIndexer;
pub use block_queue::{BlockStoreQueue, ChainEventSink, QueueCommand};
pub use config::Config;
pub use error::{AppError, IndexerError, StorageError};
pub use memory_cache::{CacheItem, EvictionSink, MemoryCache};
pub use outpoints_repository::OutpointsRepository;
pub use types::{
    AddressIndexerRewindData, Block, BlockHeader, ChainedHeader, Hash256, NetworkType, OutPoint,
    OutPointData, Transaction, TxInput, TxOutput,
};
