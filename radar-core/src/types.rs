//! Basic digest type

use crate::{CoreError, CoreResult};
use bitcoin::hashes::Hash as _;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte digest in internal (wire) byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a new hash from byte array
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create hash from slice
    pub fn from_slice(slice: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| {
            CoreError::InvalidHash(format!("expected 32 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Get the underlying byte array
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string in wire byte order
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string in wire byte order
    pub fn from_hex(hex: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex)?;
        Self::from_slice(&bytes)
    }

    /// Hex string in the reversed order used by block explorers and RPC
    pub fn to_display_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse the reversed (explorer) hex form produced by [`to_display_hex`](Self::to_display_hex)
    pub fn from_display_hex(hex: &str) -> CoreResult<Self> {
        let mut hash = Self::from_hex(hex)?;
        hash.0.reverse();
        Ok(hash)
    }

    /// Zero hash (all bytes are 0)
    pub fn zero() -> Self {
        Self([0u8; 32])
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<bitcoin::Txid> for Hash {
    fn from(txid: bitcoin::Txid) -> Self {
        Self(txid.to_byte_array())
    }
}

impl From<bitcoin::BlockHash> for Hash {
    fn from(hash: bitcoin::BlockHash) -> Self {
        Self(hash.to_byte_array())
    }
}

impl From<Hash> for bitcoin::Txid {
    fn from(hash: Hash) -> Self {
        bitcoin::Txid::from_byte_array(hash.0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_creation() {
        let hash = Hash::zero();
        assert_eq!(
            hash.to_hex(),
            "0000000000000000000000000000000000000000000000000000000000000000"
        );

        let hash2 = Hash::new([1u8; 32]);
        assert_eq!(
            hash2.to_hex(),
            "0101010101010101010101010101010101010101010101010101010101010101"
        );
    }

    #[test]
    fn test_hash_from_hex() {
        let hex = "1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        let hash = Hash::from_hex(hex).unwrap();
        assert_eq!(hash.to_hex(), hex);
    }

    #[test]
    fn test_hash_from_short_slice() {
        assert!(matches!(
            Hash::from_slice(&[0u8; 31]),
            Err(CoreError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = Hash::new(bytes);
        assert!(hash.to_hex().starts_with("ab"));
        assert!(hash.to_string().ends_with("ab"));
        assert_eq!(Hash::from_display_hex(&hash.to_string()).unwrap(), hash);
    }

    #[test]
    fn test_txid_conversion() {
        let txid = bitcoin::Txid::from_byte_array([7u8; 32]);
        let hash = Hash::from(txid);
        assert_eq!(hash.as_bytes(), &[7u8; 32]);
        assert_eq!(bitcoin::Txid::from(hash), txid);
    }
}
