//! Core chain types shared across the indexer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Hash256 = [u8; 32];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

impl NetworkType {
    pub fn address_prefix(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "IDX1",
            NetworkType::Testnet => "IDX0",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// Canonical string key: `{hex(txid)}:{vout}`. This is the identity used
    /// by the cache and the durable outputs collection.
    pub fn to_key(&self) -> String {
        format!("{}:{}", hex::encode(self.txid), self.vout)
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    pub timestamp: i64,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        let bytes = bincode::serialize(self).expect("Serialization should succeed");
        Sha256::digest(bytes).into()
    }

    /// Coinbase transactions spend nothing.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        let bytes =
            bincode::serialize(&self.header).expect("BlockHeader serialization must not fail");
        Sha256::digest(bytes).into()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn chained_header(&self) -> ChainedHeader {
        ChainedHeader {
            hash: self.hash(),
            height: self.header.height,
        }
    }
}

/// A block's position in the active chain. The queue attaches this to every
/// event it delivers; the indexer persists it as its tip.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainedHeader {
    pub hash: Hash256,
    pub height: u64,
}

impl std::fmt::Display for ChainedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", hex::encode(&self.hash[..8]), self.height)
    }
}

/// One unspent output tracked by the address indexer.
///
/// Immutable once created for a given outpoint key: a record is only ever
/// added (block creates the output), removed (a later block spends it), or
/// re-added verbatim by rewind when a reorg undoes the spend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OutPointData {
    /// Canonical outpoint key, see [`OutPoint::to_key`].
    pub outpoint: String,
    /// Locking script of the output; carries the destination address.
    pub script_pubkey: Vec<u8>,
    /// Value in smallest denomination units.
    pub money: u64,
}

/// Per-block undo journal entry: the outputs a connected block spent.
/// Consulted during reorgs to restore the spent set, pruned once the block
/// is beyond the max-reorg depth.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AddressIndexerRewindData {
    pub block_hash: Hash256,
    pub block_height: u64,
    pub spent_outputs: Vec<OutPointData>,
}
