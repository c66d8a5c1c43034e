//! Block store queue: height-ordered ingestion pipeline.
//!
//! Blocks arriving from the network or miner are serialized through one
//! sequential worker: each block is persisted to the `Blocks` tree first,
//! then delivered downstream to the registered [`ChainEventSink`] (the
//! address indexer). Disconnections are only ever issued for the current
//! stored tip, so downstream consumers see connect/disconnect events in
//! strict height order.
//!
//! Sink failures are retried with backoff; if retries exhaust, indexing is
//! disabled and block persistence continues — the index is an optional
//! feature, not consensus-critical.

use crate::error::{IndexerError, StorageError};
use crate::types::{Block, ChainedHeader};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const BLOCKS_TREE: &str = "Blocks";

const SINK_RETRIES: u32 = 3;
const SINK_RETRY_BACKOFF_MS: u64 = 200;

/// Commands accepted by the queue worker.
#[derive(Debug)]
pub enum QueueCommand {
    /// Connect a new block at tip height + 1.
    Connect(Block),
    /// Disconnect the current tip block (reorg step).
    DisconnectTip,
}

/// Downstream consumer of connection/disconnection events.
#[async_trait]
pub trait ChainEventSink: Send + Sync {
    async fn on_block_connected(
        &self,
        block: &Block,
        header: ChainedHeader,
    ) -> Result<(), IndexerError>;

    async fn on_block_disconnected(
        &self,
        block: &Block,
        header: ChainedHeader,
    ) -> Result<(), IndexerError>;
}

pub struct BlockStoreQueue {
    blocks: sled::Tree,
    tip: Mutex<Option<ChainedHeader>>,
    indexing_enabled: AtomicBool,
}

impl BlockStoreQueue {
    pub fn new(db: &sled::Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree(BLOCKS_TREE)?;

        // The stored tip is the highest block, last under big-endian keys.
        let tip = match blocks.last()? {
            Some((_, bytes)) => {
                let block: Block =
                    bincode::deserialize(&bytes).map_err(StorageError::serialization)?;
                Some(block.chained_header())
            }
            None => None,
        };

        match tip {
            Some(t) => tracing::info!("📦 Block store opened at tip {}", t),
            None => tracing::info!("📦 Block store opened (empty)"),
        }

        Ok(Self {
            blocks,
            tip: Mutex::new(tip),
            indexing_enabled: AtomicBool::new(true),
        })
    }

    pub fn chain_tip(&self) -> Option<ChainedHeader> {
        *self.tip.lock()
    }

    pub fn indexing_enabled(&self) -> bool {
        self.indexing_enabled.load(Ordering::Relaxed)
    }

    pub fn get_block(&self, height: u64) -> Result<Option<Block>, StorageError> {
        match self.blocks.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(StorageError::serialization)?,
            )),
            None => Ok(None),
        }
    }

    /// Persist and publish one block. Height must be exactly tip + 1 (or 0
    /// on an empty store); out-of-order blocks are rejected.
    pub async fn connect_block(
        &self,
        block: Block,
        sink: &dyn ChainEventSink,
    ) -> Result<(), IndexerError> {
        let header = block.chained_header();

        {
            let tip = self.tip.lock();
            let expected = tip.map(|t| t.height + 1).unwrap_or(0);
            if header.height != expected {
                return Err(IndexerError::OutOfOrderBlock {
                    expected,
                    got: header.height,
                });
            }
            if let Some(t) = *tip {
                if block.header.previous_hash != t.hash {
                    tracing::warn!(
                        "Block {} does not chain to stored tip {} (previous_hash mismatch)",
                        header,
                        t
                    );
                }
            }
        }

        let bytes = bincode::serialize(&block).map_err(StorageError::serialization)?;
        self.blocks
            .insert(header.height.to_be_bytes(), bytes)
            .map_err(StorageError::from)?;
        *self.tip.lock() = Some(header);

        tracing::debug!("⛓️  Block {} stored", header);

        self.deliver(sink, &block, header, true).await;
        Ok(())
    }

    /// Disconnect the stored tip block (one reorg step). Returns the header
    /// of the disconnected block.
    pub async fn disconnect_tip(
        &self,
        sink: &dyn ChainEventSink,
    ) -> Result<ChainedHeader, IndexerError> {
        let header = self.chain_tip().ok_or(IndexerError::DisconnectMismatch {
            tip: None,
            got: 0,
        })?;

        let block = self
            .get_block(header.height)?
            .ok_or(IndexerError::DisconnectMismatch {
                tip: Some(header.height),
                got: header.height,
            })?;

        self.blocks
            .remove(header.height.to_be_bytes())
            .map_err(StorageError::from)?;

        let new_tip = match header.height.checked_sub(1) {
            Some(prev_height) => Some(ChainedHeader {
                hash: block.header.previous_hash,
                height: prev_height,
            }),
            None => None,
        };
        *self.tip.lock() = new_tip;

        tracing::info!("🔀 Block {} disconnected (reorg)", header);

        self.deliver(sink, &block, header, false).await;
        Ok(header)
    }

    /// Deliver an event to the sink with retries. Exhausted retries disable
    /// indexing without interrupting block persistence.
    async fn deliver(
        &self,
        sink: &dyn ChainEventSink,
        block: &Block,
        header: ChainedHeader,
        connected: bool,
    ) {
        if !self.indexing_enabled.load(Ordering::Relaxed) {
            return;
        }

        for attempt in 1..=SINK_RETRIES {
            let result = if connected {
                sink.on_block_connected(block, header).await
            } else {
                sink.on_block_disconnected(block, header).await
            };

            match result {
                Ok(()) => return,
                Err(e) if attempt < SINK_RETRIES => {
                    tracing::warn!(
                        "Indexer failed on block {} (attempt {}/{}): {}",
                        header,
                        attempt,
                        SINK_RETRIES,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(
                        SINK_RETRY_BACKOFF_MS * attempt as u64,
                    ))
                    .await;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Indexer failed on block {} after {} attempts, disabling indexing: {}",
                        header,
                        SINK_RETRIES,
                        e
                    );
                    self.indexing_enabled.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    /// Sequential worker loop: drains commands in order until cancellation
    /// or all senders drop.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<QueueCommand>,
        sink: Arc<dyn ChainEventSink>,
        cancel: CancellationToken,
    ) {
        tracing::info!("🚀 Block store queue started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(QueueCommand::Connect(block)) => {
                        if let Err(e) = self.connect_block(block, sink.as_ref()).await {
                            tracing::error!("Rejected block: {}", e);
                        }
                    }
                    Some(QueueCommand::DisconnectTip) => {
                        if let Err(e) = self.disconnect_tip(sink.as_ref()).await {
                            tracing::error!("Rejected disconnect: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }

        if let Err(e) = self.blocks.flush() {
            tracing::error!("Failed to flush block store on shutdown: {}", e);
        }
        tracing::info!("🛑 Block store queue stopped");
    }
}
