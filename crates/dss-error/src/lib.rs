#![forbid(unsafe_code)]
//! Error types for the Bud1 container.
//!
//! Defines `StoreError` and a `Result<T>` alias used throughout the
//! workspace. Sub-component `ParseError`s are mapped into these kinds at
//! the container driver.

use dss_types::FourCC;
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all container operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not a Bud1 container (bad magic)")]
    InvalidMagic,

    #[error("invalid container header")]
    InvalidHeader,

    #[error("allocator offset fields disagree")]
    OffsetMismatch,

    #[error("invalid buddy block address")]
    InvalidBlockAddress,

    #[error("invalid B-tree header")]
    InvalidBTreeHeader,

    #[error("unknown record data type {0}")]
    UnknownDataType(FourCC),

    #[error("invalid UTF-16 string")]
    InvalidUtf16String,

    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    #[error("record cannot be represented: {reason}")]
    InvalidRecord { reason: String },

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("property list serialization failed: {0}")]
    PlistSerializationFailed(String),
}

/// Result alias using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_type_code() {
        let err = StoreError::UnknownDataType(FourCC::from_bytes(*b"wxyz"));
        assert_eq!(err.to_string(), "unknown record data type wxyz");
    }

    #[test]
    fn corrupted_file_carries_reason() {
        let err = StoreError::CorruptedFile("node 3 visited twice".to_owned());
        assert!(err.to_string().contains("node 3 visited twice"));
    }
}
