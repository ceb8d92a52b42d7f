use std::{
    error::Error,
    fmt::{self, Display},
};

use chunkstore::{ContentDigest, StoreError};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a layer conversion or merge operation.
pub type LayerResult<T> = Result<T, LayerError>;

/// An error that occurred while converting or merging layers.
#[derive(pretty_error_debug::Debug, Error)]
pub enum LayerError {
    /// The archive stream violated the layer format.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// An archive entry appeared before its parent directory.
    #[error("entry {0:?} has no parent directory in the stream")]
    MissingParent(String),

    /// The archive stream ended before a complete entry was consumed.
    #[error("truncated archive stream")]
    TruncatedStream,

    /// The chunk dictionary could not be loaded and strict dictionary mode was requested.
    #[error("chunk dictionary unavailable: {0}")]
    DictionaryUnavailable(String),

    /// A layer's declared blob digest does not match the blob its bootstrap references.
    #[error("layer {layer} declared blob {declared}, but its bootstrap references blob {referenced}")]
    BlobDigestMismatch {
        /// The position of the offending layer in the merge input (0 = lowest).
        layer: usize,
        /// The blob digest the caller declared for the layer.
        declared: ContentDigest,
        /// The local blob digest recorded in the layer's bootstrap.
        referenced: ContentDigest,
    },

    /// Merge was called with no layers.
    #[error("empty layer list")]
    EmptyLayerList,

    /// A bootstrap could not be decoded.
    #[error("unparseable bootstrap: {0}")]
    BootstrapDecode(String),

    /// A decoded bootstrap failed structural validation.
    #[error("invalid bootstrap: {0}")]
    InvalidBootstrap(String),

    /// The bootstrap was produced by an unsupported format version.
    #[error("unsupported bootstrap version: {0}")]
    UnsupportedVersion(u8),

    /// The operation was cancelled by the caller; no artifact was published.
    #[error("operation cancelled")]
    Cancelled,

    /// Chunk store error.
    #[error("chunk store error: {0}")]
    Store(#[from] StoreError),

    /// An IO error from the underlying streams.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

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

impl LayerError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> LayerError {
        LayerError::Custom(AnyError {
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

/// Creates an `Ok` `LayerResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> LayerResult<T> {
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
