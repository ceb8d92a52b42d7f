use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

use super::StoreResult;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A chunker that splits a byte stream into an ordered, gap-free, non-overlapping sequence of
/// chunks covering exactly the input bytes.
///
/// Chunk boundaries must be deterministic for identical input bytes. That property is what
/// deduplication depends on: the same file content must always produce the same chunk digests,
/// no matter which layer or conversion it arrives in. Empty input produces zero chunks.
#[async_trait]
pub trait Chunker {
    /// Chunks the given reader and returns a stream of chunk payloads.
    ///
    /// A read error on the source aborts the stream with an error; consumers must treat that
    /// as fatal for the whole conversion.
    async fn chunk(
        &self,
        reader: impl AsyncRead + Send + 'life0,
    ) -> StoreResult<BoxStream<'_, StoreResult<Bytes>>>;

    /// Returns the allowed maximum chunk size. If there is no limit, `None` is returned.
    async fn chunk_max_size(&self) -> StoreResult<Option<u64>>;
}
