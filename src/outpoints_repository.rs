//! Cache-backed repository for outpoint and rewind records.
//!
//! Pairs the bounded write-back [`MemoryCache`] with four sled trees:
//!
//! - `OutputsData` — outpoint key -> [`OutPointData`]
//! - `OutputsRewindData` — big-endian height -> [`AddressIndexerRewindData`]
//! - `AddressIndex` — `{address}\x00{outpoint}` -> () (secondary index)
//! - `IndexerMeta` — indexer tip
//!
//! Outpoint writes are deferred: a new record lives dirty in the cache until
//! it is evicted or an explicit `save_all_items` checkpoint runs. Rewind
//! records bypass the cache entirely and are flushed to disk immediately,
//! since they must survive a crash that loses unflushed outpoint changes.
//!
//! Every public operation takes one coarse lock for its full critical
//! section, so eviction flushes and durable deletes cannot interleave with
//! concurrent readers.

use crate::address::address_from_script;
use crate::error::StorageError;
use crate::memory_cache::{CacheItem, EvictionSink, MemoryCache};
use crate::types::{AddressIndexerRewindData, ChainedHeader, OutPointData};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub const OUTPUTS_TREE: &str = "OutputsData";
pub const REWIND_TREE: &str = "OutputsRewindData";
pub const ADDRESS_INDEX_TREE: &str = "AddressIndex";
pub const META_TREE: &str = "IndexerMeta";

const TIP_KEY: &[u8] = b"IndexerTip";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(StorageError::serialization)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(StorageError::serialization)
}

/// `{address}\x00{outpoint}` — addresses are ASCII-alphanumeric, so the NUL
/// separator is unambiguous and prefix scans stay address-exact.
fn address_index_key(address: &str, outpoint: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.len() + 1 + outpoint.len());
    key.extend_from_slice(address.as_bytes());
    key.push(0);
    key.extend_from_slice(outpoint.as_bytes());
    key
}

fn address_index_prefix(address: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(address.len() + 1);
    prefix.extend_from_slice(address.as_bytes());
    prefix.push(0);
    prefix
}

/// Flushes dirty evictees to the outputs tree before they leave memory.
/// Clean evictees already match disk and are simply dropped.
struct FlushSink<'a> {
    outputs: &'a sled::Tree,
    evictions: &'a AtomicU64,
}

impl EvictionSink<String, OutPointData> for FlushSink<'_> {
    fn on_evict(&mut self, item: &CacheItem<String, OutPointData>) -> Result<(), StorageError> {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if item.dirty {
            self.outputs
                .insert(item.key.as_bytes(), encode(&item.value)?)?;
        }
        Ok(())
    }
}

struct Inner {
    cache: MemoryCache<String, OutPointData>,
    outputs: sled::Tree,
    rewind: sled::Tree,
    address_index: sled::Tree,
    meta: sled::Tree,
}

/// Snapshot of repository counters.
#[derive(Debug, Clone, Default)]
pub struct RepositoryStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

pub struct OutpointsRepository {
    inner: Mutex<Inner>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
}

impl OutpointsRepository {
    pub fn new(db: &sled::Db, max_cache_items: usize) -> Result<Self, StorageError> {
        let open = |name: &str| {
            db.open_tree(name).map_err(|source| StorageError::DatabaseOpen {
                name: name.to_string(),
                source,
            })
        };
        let outputs = open(OUTPUTS_TREE)?;
        let rewind = open(REWIND_TREE)?;
        let address_index = open(ADDRESS_INDEX_TREE)?;
        let meta = open(META_TREE)?;
        let cache = MemoryCache::new(max_cache_items)?;

        tracing::info!(
            "📇 Outpoints repository opened (cache capacity: {})",
            max_cache_items
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                cache,
                outputs,
                rewind,
                address_index,
                meta,
            }),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Add or update an outpoint record. Memory-only: the entry sits dirty in
    /// the cache until eviction or `save_all_items`. The address secondary
    /// index is updated write-through so queries never miss new outputs.
    pub fn add_out_point_data(&self, data: OutPointData) -> Result<(), StorageError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        Self::add_locked(inner, &self.evictions, data, true)
    }

    fn add_locked(
        inner: &mut Inner,
        evictions: &AtomicU64,
        data: OutPointData,
        dirty: bool,
    ) -> Result<(), StorageError> {
        if let Some(address) = address_from_script(&data.script_pubkey) {
            inner
                .address_index
                .insert(address_index_key(&address, &data.outpoint), &[])?;
        }

        let mut sink = FlushSink {
            outputs: &inner.outputs,
            evictions,
        };
        let mut item = CacheItem::new(data.outpoint.clone(), data);
        item.dirty = dirty;
        inner.cache.add_or_update(item, &mut sink)
    }

    /// Remove an outpoint record, returning the removed value.
    ///
    /// A dirty cache entry never reached disk, so dropping it from the cache
    /// is enough. A clean entry (or a record only on disk) is known to exist
    /// durably and must be deleted explicitly. Removing an absent key is a
    /// logged no-op; callers are not expected to do it.
    pub fn remove_out_point_data(
        &self,
        outpoint: &str,
    ) -> Result<Option<OutPointData>, StorageError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let removed = match inner.cache.remove(&outpoint.to_string()) {
            Some(item) => {
                if !item.dirty {
                    inner.outputs.remove(outpoint.as_bytes())?;
                }
                Some(item.value)
            }
            None => match inner.outputs.get(outpoint.as_bytes())? {
                Some(bytes) => {
                    let data: OutPointData = decode(&bytes)?;
                    inner.outputs.remove(outpoint.as_bytes())?;
                    Some(data)
                }
                None => {
                    tracing::debug!("Removal requested for absent outpoint {}", outpoint);
                    None
                }
            },
        };

        if let Some(ref data) = removed {
            if let Some(address) = address_from_script(&data.script_pubkey) {
                inner
                    .address_index
                    .remove(address_index_key(&address, outpoint))?;
            }
        }

        Ok(removed)
    }

    /// Look up an outpoint record: cache first, then the durable store. A
    /// durable hit repopulates the cache (clean — it matches disk) so the
    /// next lookup is a cache hit.
    pub fn try_get_out_point_data(
        &self,
        outpoint: &str,
    ) -> Result<Option<OutPointData>, StorageError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(data) = inner.cache.try_get(&outpoint.to_string()) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(data));
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        match inner.outputs.get(outpoint.as_bytes())? {
            Some(bytes) => {
                let data: OutPointData = decode(&bytes)?;
                Self::add_locked(inner, &self.evictions, data.clone(), false)?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Checkpoint: bulk-upsert every dirty cache entry and mark it clean.
    /// Entries stay resident. Returns the number of records written.
    pub fn save_all_items(&self) -> Result<usize, StorageError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let outputs = &inner.outputs;
        let flushed = inner.cache.save_dirty(|items| {
            let mut batch = sled::Batch::default();
            for item in items {
                batch.insert(item.key.as_bytes(), encode(&item.value)?);
            }
            outputs.apply_batch(batch)?;
            Ok(())
        })?;

        if flushed > 0 {
            inner.outputs.flush()?;
            tracing::debug!("💾 Flushed {} dirty outpoint(s) to disk", flushed);
        }
        Ok(flushed)
    }

    /// Record a block's undo journal entry. Always durable immediately: the
    /// journal must survive a crash that loses unflushed cache state.
    pub fn record_rewind_data(&self, data: AddressIndexerRewindData) -> Result<(), StorageError> {
        let guard = self.inner.lock();
        guard
            .rewind
            .insert(data.block_height.to_be_bytes(), encode(&data)?)?;
        guard.rewind.flush()?;
        Ok(())
    }

    pub fn get_rewind_data(
        &self,
        height: u64,
    ) -> Result<Option<AddressIndexerRewindData>, StorageError> {
        let guard = self.inner.lock();
        match guard.rewind.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete rewind entries with height strictly below `below_height`.
    /// Called as blocks pass the max-reorg depth, to bound journal growth.
    pub fn purge_old_rewind_data(&self, below_height: u64) -> Result<usize, StorageError> {
        let guard = self.inner.lock();

        let mut keys = Vec::new();
        for entry in guard.rewind.range(..below_height.to_be_bytes().to_vec()) {
            let (key, _) = entry?;
            keys.push(key);
        }

        let purged = keys.len();
        if purged > 0 {
            let mut batch = sled::Batch::default();
            for key in keys {
                batch.remove(key);
            }
            guard.rewind.apply_batch(batch)?;
            tracing::debug!(
                "🧹 Purged {} rewind entr(ies) below height {}",
                purged,
                below_height
            );
        }
        Ok(purged)
    }

    /// Reorg recovery: for every rewind entry above `height`, restore its
    /// spent outputs into the cache (undoing the spend) and delete the entry.
    /// Idempotent — consumed entries are gone, so re-running is a no-op.
    pub fn rewind_data_above_height(&self, height: u64) -> Result<usize, StorageError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(start) = height.checked_add(1) else {
            return Ok(0);
        };

        let mut entries = Vec::new();
        for entry in inner.rewind.range(start.to_be_bytes().to_vec()..) {
            let (key, bytes) = entry?;
            let data: AddressIndexerRewindData = decode(&bytes)?;
            entries.push((key, data));
        }

        let consumed = entries.len();
        for (key, data) in entries {
            tracing::info!(
                "⏪ Rewinding block {} at height {} ({} spent output(s) restored)",
                hex::encode(&data.block_hash[..8]),
                data.block_height,
                data.spent_outputs.len()
            );
            for spent in data.spent_outputs {
                Self::add_locked(inner, &self.evictions, spent, true)?;
            }
            inner.rewind.remove(key)?;
        }

        if consumed > 0 {
            inner.rewind.flush()?;
        }
        Ok(consumed)
    }

    /// Outpoint keys currently indexed for an address, from the durable
    /// secondary index. Resolve each through `try_get_out_point_data`.
    pub fn outpoints_for_address(&self, address: &str) -> Result<Vec<String>, StorageError> {
        let guard = self.inner.lock();

        let prefix = address_index_prefix(address);
        let mut outpoints = Vec::new();
        for entry in guard.address_index.scan_prefix(&prefix) {
            let (key, _) = entry?;
            if let Ok(outpoint) = std::str::from_utf8(&key[prefix.len()..]) {
                outpoints.push(outpoint.to_string());
            }
        }
        Ok(outpoints)
    }

    pub fn save_tip(&self, tip: &ChainedHeader) -> Result<(), StorageError> {
        let guard = self.inner.lock();
        guard.meta.insert(TIP_KEY, encode(tip)?)?;
        Ok(())
    }

    pub fn load_tip(&self) -> Result<Option<ChainedHeader>, StorageError> {
        let guard = self.inner.lock();
        match guard.meta.get(TIP_KEY)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn clear_tip(&self) -> Result<(), StorageError> {
        let guard = self.inner.lock();
        guard.meta.remove(TIP_KEY)?;
        Ok(())
    }

    /// Cache population as a percentage of capacity. Diagnostic only.
    pub fn get_load_percentage(&self) -> f64 {
        self.inner.lock().cache.load_percentage()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn stats(&self) -> RepositoryStats {
        RepositoryStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Direct durable-store probe, bypassing the cache. Used by tests and
    /// diagnostics to observe the dirty/clean write-back asymmetry.
    pub fn is_persisted(&self, outpoint: &str) -> Result<bool, StorageError> {
        let guard = self.inner.lock();
        Ok(guard.outputs.contains_key(outpoint.as_bytes())?)
    }
}
