use std::io;
use thiserror::Error;

/// Errors that can occur when working with a disk map.
///
/// A missing key is never an error; lookups report it as `Ok(None)`.
/// Everything here signals that the table or its backing files can no
/// longer be trusted for the operation that produced it.
#[derive(Error, Debug)]
pub enum LashError {
    /// IO errors when creating, mapping or flushing the backing files
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The OS refused to grow a region to the requested length
    #[error("failed to grow region to {requested} bytes: {source}")]
    Allocation {
        requested: u64,
        #[source]
        source: io::Error,
    },

    /// Access outside the currently mapped length of a region
    #[error("access of {len} bytes at {pos} outside region of {size} bytes")]
    OutOfBounds { pos: u64, len: u64, size: u64 },

    /// A structural invariant of the table did not hold
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The on-disk header does not describe a valid table
    #[error("corrupt table header: {0}")]
    Corrupt(String),

    /// A key or value longer than a record length field can describe
    #[error("record field of {0} bytes exceeds the u32 length limit")]
    RecordTooLarge(u64),

    /// Invalid configuration passed at open
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, LashError>;

impl LashError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        LashError::Invariant(msg.into())
    }
}
