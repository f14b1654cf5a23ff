//! Shared identifiers and error types for the encina storage engine.

use std::fmt;

/// Identifier of a fixed-size page inside a [`crate::pager::PageStorage`].
///
/// The on-page format stores page ids as 4-byte big-endian integers, so the
/// id space is deliberately 32 bits wide.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum EncinaError {
    /// I/O failure from an underlying page store, propagated unchanged.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-page data failed an internal consistency check.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller violated an operation precondition.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// `insert` was called with a key that is already present.
    #[error("key already present")]
    DuplicateKey,
    /// `replace` was called with a key that is not present.
    #[error("key not present")]
    MissingKey,
    /// The requested operation is not implemented by this engine.
    #[error("not implemented: {0}")]
    Unsupported(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EncinaError>;
