//! Inventory announcements
//!
//! Peers advertise the items they have seen with `inv` messages. Each entry is an
//! inventory vector: a kind and a 32-byte digest. The relay layer only cares about
//! transactions, so the wire kinds are folded into three classes.

use crate::Hash;
use bitcoin::p2p::message_blockdata::Inventory;
use serde::{Deserialize, Serialize};

/// Classified inventory kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryKind {
    /// `MSG_TX` or `MSG_WITNESS_TX`
    Transaction,
    /// Any block announcement (full, witness, compact)
    Block,
    /// Anything else; carries the raw wire type code
    Unknown(u32),
}

/// A single announced item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryVector {
    pub kind: InventoryKind,
    pub hash: Hash,
}

impl InventoryVector {
    pub fn new(kind: InventoryKind, hash: Hash) -> Self {
        Self { kind, hash }
    }

    pub fn transaction(hash: Hash) -> Self {
        Self::new(InventoryKind::Transaction, hash)
    }

    pub fn block(hash: Hash) -> Self {
        Self::new(InventoryKind::Block, hash)
    }

    pub fn unknown(code: u32, hash: Hash) -> Self {
        Self::new(InventoryKind::Unknown(code), hash)
    }
}

impl From<&Inventory> for InventoryVector {
    #[allow(unreachable_patterns)]
    fn from(inv: &Inventory) -> Self {
        match inv {
            Inventory::Transaction(txid) | Inventory::WitnessTransaction(txid) => {
                Self::transaction(Hash::from(*txid))
            }
            Inventory::Block(hash)
            | Inventory::WitnessBlock(hash)
            | Inventory::CompactBlock(hash) => Self::block(Hash::from(*hash)),
            Inventory::WTx(wtxid) => {
                use bitcoin::hashes::Hash as _;
                Self::unknown(5, Hash::new(wtxid.to_byte_array()))
            }
            Inventory::Unknown { inv_type, hash } => Self::unknown(*inv_type, Hash::new(*hash)),
            Inventory::Error => Self::unknown(0, Hash::zero()),
            _ => Self::unknown(u32::MAX, Hash::zero()),
        }
    }
}

/// An ordered batch of inventory vectors received in one `inv` message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMessage {
    vectors: Vec<InventoryVector>,
}

impl InventoryMessage {
    pub fn new(vectors: Vec<InventoryVector>) -> Self {
        Self { vectors }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InventoryVector> {
        self.vectors.iter()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Hashes of the transaction entries, in arrival order
    pub fn transaction_hashes(&self) -> impl Iterator<Item = Hash> + '_ {
        self.vectors
            .iter()
            .filter(|v| v.kind == InventoryKind::Transaction)
            .map(|v| v.hash)
    }
}

impl From<Vec<InventoryVector>> for InventoryMessage {
    fn from(vectors: Vec<InventoryVector>) -> Self {
        Self::new(vectors)
    }
}

impl From<&[Inventory]> for InventoryMessage {
    fn from(inventory: &[Inventory]) -> Self {
        Self::new(inventory.iter().map(InventoryVector::from).collect())
    }
}

impl<'a> IntoIterator for &'a InventoryMessage {
    type Item = &'a InventoryVector;
    type IntoIter = std::slice::Iter<'a, InventoryVector>;

    fn into_iter(self) -> Self::IntoIter {
        self.vectors.iter()
    }
}

impl IntoIterator for InventoryMessage {
    type Item = InventoryVector;
    type IntoIter = std::vec::IntoIter<InventoryVector>;

    fn into_iter(self) -> Self::IntoIter {
        self.vectors.into_iter()
    }
}
