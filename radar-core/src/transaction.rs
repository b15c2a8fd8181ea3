//! Transaction parsing and identity

use crate::{CoreError, CoreResult, Hash};
use bitcoin::consensus::encode;

/// A parsed Bitcoin transaction together with its txid
///
/// The value is immutable once parsed; the txid is computed once and used as the
/// identity peers announce in `inv` messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    inner: bitcoin::Transaction,
    txid: Hash,
}

impl Transaction {
    /// Parse a transaction from its consensus encoding.
    ///
    /// Truncated or malformed input yields [`CoreError::Parse`]. Bytes following a
    /// complete transaction are ignored.
    pub fn parse(raw: &[u8]) -> CoreResult<Self> {
        let (inner, _consumed) = encode::deserialize_partial::<bitcoin::Transaction>(raw)
            .map_err(|e| CoreError::Parse(e.to_string()))?;
        Ok(Self::from(inner))
    }

    /// Consensus encoding of the transaction
    pub fn encode(&self) -> Vec<u8> {
        encode::serialize(&self.inner)
    }

    /// Transaction id (non-witness digest)
    pub fn hash(&self) -> Hash {
        self.txid
    }

    /// Borrow the underlying `bitcoin` transaction
    pub fn as_bitcoin(&self) -> &bitcoin::Transaction {
        &self.inner
    }

    pub fn into_bitcoin(self) -> bitcoin::Transaction {
        self.inner
    }
}

impl From<bitcoin::Transaction> for Transaction {
    fn from(inner: bitcoin::Transaction) -> Self {
        let txid = Hash::from(inner.compute_txid());
        Self { inner, txid }
    }
}
