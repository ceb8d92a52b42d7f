use std::pin::pin;

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Chunker, StoreResult, DEFAULT_CHUNK_SIZE};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A chunker that splits input into fixed-size chunks.
///
/// Every chunk except possibly the last has exactly `chunk_size` bytes; the last chunk holds
/// whatever remains. Because boundaries depend only on byte offsets, identical input always
/// yields the identical chunk sequence, which keeps chunk digests stable across conversions.
///
/// Fixed-size boundaries are part of the blob compatibility contract: changing `chunk_size`
/// changes every chunk digest, so a blob built with one size cannot deduplicate against a
/// dictionary built with another.
#[derive(Clone, Debug)]
pub struct FixedChunker {
    /// The exact size of every chunk but the last.
    chunk_size: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FixedChunker {
    /// Creates a new `FixedChunker` with the given chunk size.
    ///
    /// # Panics
    /// Panics if `chunk_size` is zero.
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self { chunk_size }
    }

    /// Returns the configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Chunker for FixedChunker {
    async fn chunk(
        &self,
        reader: impl AsyncRead + Send + 'life0,
    ) -> StoreResult<BoxStream<'_, StoreResult<Bytes>>> {
        let chunk_size = self.chunk_size;

        let s = try_stream! {
            let mut reader = pin!(reader);

            loop {
                let mut buffer = vec![0u8; chunk_size];
                let mut filled = 0;

                // Fill the buffer fully unless the stream ends first. Short reads are
                // normal for pipes, so keep reading until the chunk is complete.
                while filled < chunk_size {
                    let n = reader.read(&mut buffer[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }

                if filled == 0 {
                    break;
                }

                let last = filled < chunk_size;
                buffer.truncate(filled);
                yield Bytes::from(buffer);

                if last {
                    break;
                }
            }
        };

        Ok(Box::pin(s))
    }

    async fn chunk_max_size(&self) -> StoreResult<Option<u64>> {
        Ok(Some(self.chunk_size as u64))
    }
}

impl Default for FixedChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    async fn collect(chunker: &FixedChunker, data: &[u8]) -> anyhow::Result<Vec<Bytes>> {
        let mut stream = chunker.chunk(data).await?;
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk?);
        }
        anyhow::Ok(chunks)
    }

    #[tokio::test]
    async fn test_fixed_chunker_exact_multiple() -> anyhow::Result<()> {
        let chunker = FixedChunker::new(4);
        let chunks = collect(&chunker, b"abcdefgh").await?;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref(), b"abcd");
        assert_eq!(chunks[1].as_ref(), b"efgh");

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_chunker_partial_tail() -> anyhow::Result<()> {
        let chunker = FixedChunker::new(4);
        let chunks = collect(&chunker, b"abcdefghij").await?;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].as_ref(), b"ij");
        assert_eq!(
            chunks.iter().map(|c| c.len()).sum::<usize>(),
            10,
            "chunks must cover the input exactly"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_chunker_empty_input() -> anyhow::Result<()> {
        let chunker = FixedChunker::default();
        let chunks = collect(&chunker, b"").await?;

        assert!(chunks.is_empty(), "empty input should produce no chunks");

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_chunker_input_smaller_than_chunk() -> anyhow::Result<()> {
        let chunker = FixedChunker::new(1024);
        let chunks = collect(&chunker, b"tiny").await?;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref(), b"tiny");

        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_chunker_deterministic() -> anyhow::Result<()> {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let data = (0..100_000).map(|_| rng.random()).collect::<Vec<u8>>();

        let chunker = FixedChunker::new(4096);
        let first = collect(&chunker, &data).await?;
        let second = collect(&chunker, &data).await?;

        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    #[should_panic(expected = "chunk size must be non-zero")]
    fn test_fixed_chunker_zero_size() {
        FixedChunker::new(0);
    }
}
