//! Address indexer: reacts to chain events and answers address queries.
//!
//! On every connected block the indexer removes spent outpoints (journaling
//! them into that block's rewind entry), adds the block's indexable outputs,
//! and advances its persisted tip. On disconnection it replays the rewind
//! journal to restore the spent set and removes the block's created outputs.
//!
//! Dirty cache state is checkpointed every `checkpoint_interval` blocks and
//! on a timer; old rewind entries are purged once their block is beyond the
//! max-reorg depth.

use crate::address::address_from_script;
use crate::block_queue::{BlockStoreQueue, ChainEventSink};
use crate::error::{IndexerError, StorageError};
use crate::outpoints_repository::{OutpointsRepository, RepositoryStats};
use crate::types::{AddressIndexerRewindData, Block, ChainedHeader, OutPoint, OutPointData};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct AddressIndexer {
    repository: Arc<OutpointsRepository>,
    tip: RwLock<Option<ChainedHeader>>,
    max_reorg_depth: u64,
    checkpoint_interval: u64,
    blocks_since_checkpoint: AtomicU64,
}

impl AddressIndexer {
    pub fn new(
        repository: Arc<OutpointsRepository>,
        max_reorg_depth: u64,
        checkpoint_interval: u64,
    ) -> Self {
        Self {
            repository,
            tip: RwLock::new(None),
            max_reorg_depth,
            checkpoint_interval: checkpoint_interval.max(1),
            blocks_since_checkpoint: AtomicU64::new(0),
        }
    }

    /// Load the persisted tip and reconcile it with the block store.
    ///
    /// If the indexer is ahead of the stored chain (crash during a reorg),
    /// the extra heights are unwound from still-stored blocks and the rewind
    /// journal. If it is behind, the missing blocks are replayed from the
    /// store.
    pub fn initialize(&self, queue: &BlockStoreQueue) -> Result<(), IndexerError> {
        let chain_tip = queue.chain_tip();
        let our_tip = self.repository.load_tip()?;
        *self.tip.write() = our_tip;

        match (our_tip, chain_tip) {
            (None, None) => {
                tracing::info!("📇 Address indexer starting fresh (empty chain)");
            }
            (Some(ours), None) => {
                return Err(IndexerError::TipReconciliation(format!(
                    "block store is empty but the index has tip {}; delete the index to rebuild",
                    ours
                )));
            }
            (Some(ours), Some(chain)) if ours.height == chain.height => {
                if ours.hash != chain.hash {
                    return Err(IndexerError::TipReconciliation(format!(
                        "index tip {} disagrees with chain tip {} at the same height",
                        ours, chain
                    )));
                }
                tracing::info!("📇 Address indexer in sync at {}", ours);
            }
            (Some(ours), Some(chain)) if ours.height > chain.height => {
                // Crash during a reorg: the extra heights were disconnected
                // from the store but never from the index. Unwind them from
                // the blocks if any are still stored; otherwise the index
                // cannot be repaired in place.
                tracing::warn!(
                    "📇 Index tip {} is ahead of chain tip {}, rewinding",
                    ours,
                    chain
                );
                for height in ((chain.height + 1)..=ours.height).rev() {
                    let block = queue.get_block(height)?.ok_or_else(|| {
                        IndexerError::TipReconciliation(format!(
                            "orphaned block at height {} is no longer stored; reindex required",
                            height
                        ))
                    })?;
                    self.disconnect_block(&block, block.chained_header())?;
                }
            }
            (ours, Some(chain)) => {
                // Behind (or fresh): replay stored blocks up to the chain tip.
                let start = ours.map(|t| t.height + 1).unwrap_or(0);
                tracing::info!(
                    "📇 Address indexer catching up: blocks {}..={}",
                    start,
                    chain.height
                );
                for height in start..=chain.height {
                    let block = queue.get_block(height)?.ok_or_else(|| {
                        IndexerError::TipReconciliation(format!(
                            "block at height {} missing from store during catch-up",
                            height
                        ))
                    })?;
                    let header = block.chained_header();
                    self.connect_block(&block, header)?;
                }
            }
        }

        Ok(())
    }

    /// Process one connected block: spend inputs, create outputs, journal.
    fn connect_block(&self, block: &Block, header: ChainedHeader) -> Result<(), IndexerError> {
        let expected = self.tip.read().map(|t| t.height + 1).unwrap_or(0);
        if header.height != expected {
            return Err(IndexerError::OutOfOrderBlock {
                expected,
                got: header.height,
            });
        }

        // Collect the spend set with lookups only, walking transactions in
        // block order: an input may reference an output created by an
        // earlier transaction in the same block, which lives in
        // `created_in_block` rather than the index. If this block already
        // has a journal entry (a retried or crash-interrupted run), merge it
        // in: inputs removed by the earlier attempt are gone from the index
        // but must stay journaled.
        let mut spent_outputs = Vec::new();
        if let Some(previous) = self.repository.get_rewind_data(header.height)? {
            if previous.block_hash == header.hash {
                spent_outputs = previous.spent_outputs;
            }
        }
        let mut created_in_block: HashMap<String, OutPointData> = HashMap::new();
        for tx in &block.transactions {
            for input in &tx.inputs {
                let key = input.previous_output.to_key();
                if spent_outputs.iter().any(|s| s.outpoint == key) {
                    continue;
                }
                if let Some(data) = created_in_block.remove(&key) {
                    spent_outputs.push(data);
                    continue;
                }
                match self.repository.try_get_out_point_data(&key)? {
                    Some(data) => spent_outputs.push(data),
                    // Spends of non-indexable outputs are expected; anything
                    // else would be caught by consensus validation upstream.
                    None => tracing::trace!("Input {} not in index, skipping", key),
                }
            }
            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                if address_from_script(&output.script_pubkey).is_none() {
                    continue;
                }
                let outpoint = OutPoint {
                    txid,
                    vout: vout as u32,
                }
                .to_key();
                created_in_block.insert(
                    outpoint.clone(),
                    OutPointData {
                        outpoint,
                        script_pubkey: output.script_pubkey.clone(),
                        money: output.value,
                    },
                );
            }
        }

        // Journal before mutating, so a crash mid-block can still be undone.
        self.repository.record_rewind_data(AddressIndexerRewindData {
            block_hash: header.hash,
            block_height: header.height,
            spent_outputs: spent_outputs.clone(),
        })?;

        // Apply in block order: each transaction's spends land before its
        // own outputs, so intra-block chains resolve against the live index.
        let mut created = 0usize;
        for tx in &block.transactions {
            for input in &tx.inputs {
                self.repository
                    .remove_out_point_data(&input.previous_output.to_key())?;
            }
            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                if address_from_script(&output.script_pubkey).is_none() {
                    continue;
                }
                let outpoint = OutPoint {
                    txid,
                    vout: vout as u32,
                }
                .to_key();
                self.repository.add_out_point_data(OutPointData {
                    outpoint,
                    script_pubkey: output.script_pubkey.clone(),
                    money: output.value,
                })?;
                created += 1;
            }
        }

        *self.tip.write() = Some(header);
        self.repository.save_tip(&header)?;

        tracing::debug!(
            "📇 Indexed block {}: {} spent, {} created",
            header,
            spent_outputs.len(),
            created
        );

        let since = self.blocks_since_checkpoint.fetch_add(1, Ordering::Relaxed) + 1;
        if since >= self.checkpoint_interval {
            self.blocks_since_checkpoint.store(0, Ordering::Relaxed);
            self.checkpoint()?;
        }

        Ok(())
    }

    /// Undo one disconnected block: restore its spends from the rewind
    /// journal, drop its created outputs, roll the tip back.
    fn disconnect_block(&self, block: &Block, header: ChainedHeader) -> Result<(), IndexerError> {
        let tip = *self.tip.read();
        match tip {
            Some(t) if t.height == header.height && t.hash == header.hash => {}
            _ => {
                return Err(IndexerError::DisconnectMismatch {
                    tip: tip.map(|t| t.height),
                    got: header.height,
                });
            }
        }

        // A rewind entry exists for every connected height until purged; its
        // absence means the reorg reaches past the retention horizon.
        if self.repository.get_rewind_data(header.height)?.is_none() {
            return Err(IndexerError::RewindHorizon(header.height));
        }

        // Replay the journal first: a journaled spend of an output created
        // earlier in this same block comes back here and is dropped again
        // with the rest of the block's outputs below.
        if header.height == 0 {
            // Rewinding the genesis block empties the index entirely.
            if let Some(entry) = self.repository.get_rewind_data(0)? {
                for spent in entry.spent_outputs {
                    self.repository.add_out_point_data(spent)?;
                }
            }
            self.repository.purge_old_rewind_data(1)?;
        } else {
            self.repository.rewind_data_above_height(header.height - 1)?;
        }

        for tx in &block.transactions {
            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                if address_from_script(&output.script_pubkey).is_none() {
                    continue;
                }
                let outpoint = OutPoint {
                    txid,
                    vout: vout as u32,
                }
                .to_key();
                self.repository.remove_out_point_data(&outpoint)?;
            }
        }

        if header.height == 0 {
            *self.tip.write() = None;
            self.repository.clear_tip()?;
        } else {
            let new_tip = ChainedHeader {
                hash: block.header.previous_hash,
                height: header.height - 1,
            };
            *self.tip.write() = Some(new_tip);
            self.repository.save_tip(&new_tip)?;
        }

        tracing::info!("📇 Index rewound below block {}", header);
        Ok(())
    }

    /// Flush dirty cache state and prune rewind entries beyond the reorg
    /// horizon. Entries at exactly `tip - max_reorg_depth` are retained.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        let flushed = self.repository.save_all_items()?;
        if let Some(tip) = *self.tip.read() {
            let threshold = tip.height.saturating_sub(self.max_reorg_depth);
            let purged = self.repository.purge_old_rewind_data(threshold)?;
            if flushed > 0 || purged > 0 {
                tracing::debug!(
                    "💾 Checkpoint at {}: {} flushed, {} rewind entries purged",
                    tip,
                    flushed,
                    purged
                );
            }
        }
        Ok(())
    }

    /// Timer-driven checkpoint loop. Completes a final flush before exiting
    /// so no dirty cache state is lost on shutdown.
    pub async fn run_maintenance(
        self: Arc<Self>,
        flush_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.checkpoint() {
                        tracing::error!("Periodic checkpoint failed: {}", e);
                    }
                }
            }
        }

        match self.repository.save_all_items() {
            Ok(n) => tracing::info!("💾 Final flush wrote {} record(s)", n),
            Err(e) => tracing::error!("❌ Final flush failed: {}", e),
        }
    }

    /// Confirmed balance of an address, summed over its indexed UTXOs.
    pub fn get_balance(&self, address: &str) -> Result<u64, StorageError> {
        let mut balance = 0u64;
        for outpoint in self.repository.outpoints_for_address(address)? {
            if let Some(data) = self.repository.try_get_out_point_data(&outpoint)? {
                balance = balance.saturating_add(data.money);
            }
        }
        Ok(balance)
    }

    /// The spendable set currently indexed for an address.
    pub fn get_utxos(&self, address: &str) -> Result<Vec<OutPointData>, StorageError> {
        let mut utxos = Vec::new();
        for outpoint in self.repository.outpoints_for_address(address)? {
            if let Some(data) = self.repository.try_get_out_point_data(&outpoint)? {
                utxos.push(data);
            }
        }
        Ok(utxos)
    }

    pub fn tip(&self) -> Option<ChainedHeader> {
        *self.tip.read()
    }

    pub fn load_percentage(&self) -> f64 {
        self.repository.get_load_percentage()
    }

    pub fn stats(&self) -> RepositoryStats {
        self.repository.stats()
    }
}

#[async_trait]
impl ChainEventSink for AddressIndexer {
    async fn on_block_connected(
        &self,
        block: &Block,
        header: ChainedHeader,
    ) -> Result<(), IndexerError> {
        self.connect_block(block, header)
    }

    async fn on_block_disconnected(
        &self,
        block: &Block,
        header: ChainedHeader,
    ) -> Result<(), IndexerError> {
        self.disconnect_block(block, header)
    }
}
