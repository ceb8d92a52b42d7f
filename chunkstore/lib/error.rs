use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

use crate::ContentDigest;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a chunk store operation.
pub type StoreResult<T> = Result<T, StoreError>;

/// An error that occurred during a chunk store operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum StoreError {
    /// An IO error from the underlying reader or writer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A digest string could not be parsed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// A chunk payload exceeded the maximum size the writer accepts.
    #[error("chunk of {size} bytes exceeds maximum of {max} bytes")]
    ChunkTooLarge {
        /// The size of the offending chunk.
        size: usize,
        /// The maximum chunk size allowed.
        max: usize,
    },

    /// A chunk read back from a blob did not hash to its recorded digest.
    #[error("chunk digest mismatch: expected {expected}, found {found}")]
    ChunkDigestMismatch {
        /// The digest the chunk reference promised.
        expected: ContentDigest,
        /// The digest of the bytes actually read.
        found: ContentDigest,
    },

    /// A blob was not present in the blob directory.
    #[error("blob not found: {0}")]
    BlobNotFound(ContentDigest),

    /// A blob index was out of range for the table it was resolved against.
    #[error("blob index {index} out of range (table holds {len} blobs)")]
    BlobIndexOutOfRange {
        /// The out-of-range index.
        index: u32,
        /// The number of blobs in the table.
        len: usize,
    },

    /// Custom error.
    #[error("custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StoreError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> StoreError {
        StoreError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `StoreResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> StoreResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
