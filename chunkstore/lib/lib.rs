//! `chunkstore` is a library for building content-addressed, chunk-deduplicated blobs.
//!
//! A *blob* is an append-only sequence of chunk payloads named by the digest of its full
//! byte stream. Regular file content is split into chunks by a [`Chunker`], deduplicated
//! against a [`DedupIndex`], and new chunks are appended to a blob through a [`BlobWriter`].
//! Chunk references can later be resolved out of a blob directory with a [`BlobReader`].

#![warn(missing_docs)]

mod blob;
mod chunker;
mod constants;
mod dedup;
mod digest;
mod error;
mod implementations;
mod index;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use blob::*;
pub use chunker::*;
pub use constants::*;
pub use dedup::*;
pub use digest::*;
pub use error::*;
pub use implementations::*;
pub use index::*;
