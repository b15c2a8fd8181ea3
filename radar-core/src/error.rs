//! Error types for the core crate

use thiserror::Error;

/// Core data errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Transaction parse error: {0}")]
    Parse(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
