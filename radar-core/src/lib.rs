//! Core data structures for the transaction radar
//!
//! This crate provides the value types shared by the networking and relay layers:
//! - The 32-byte digest used to identify transactions and blocks
//! - The parsed transaction wrapper around the Bitcoin consensus encoding
//! - Inventory vectors and inventory messages announced by peers

pub mod error;
pub mod inventory;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use inventory::*;
pub use transaction::*;
pub use types::*;
