use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
};

use crate::{ContentDigest, Digester, StoreError, StoreResult, MAX_CHUNK_SIZE};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The compression applied to individual chunk payloads inside a blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// Chunk payloads are stored verbatim.
    #[default]
    None,

    /// Each chunk payload is an independent gzip stream.
    Gzip,
}

/// Where a chunk lives: the blob that owns it and the byte range inside that blob.
///
/// A location is immutable once recorded. Chunk identity is the content digest, so a location
/// is only a pointer; two locations for the same digest are interchangeable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct ChunkLocation {
    /// The digest of the blob holding the chunk.
    blob: ContentDigest,

    /// The chunk's byte offset within the blob.
    offset: u64,

    /// The number of bytes the chunk occupies in the blob.
    compressed_size: u32,

    /// The size of the chunk content once decompressed.
    uncompressed_size: u32,

    /// The compression applied to the stored payload.
    compression: Compression,
}

/// Appends chunk payloads to an output blob byte stream.
///
/// Chunks must be appended in the exact order the bootstrap builder encounters them, so that
/// the blob digest is reproducible for identical input. The writer tracks a running digest
/// over the written bytes; [`BlobWriter::finish`] flushes and returns the final digest, after
/// which no further appends are possible. Dropping the writer without finishing publishes no
/// digest, so a partial blob can never be mistaken for a complete one.
pub struct BlobWriter<W> {
    inner: W,
    digester: Digester,
    offset: u64,
    chunk_count: u64,
    compression: Compression,
}

/// The summary of a finalized blob.
#[derive(Clone, Copy, Debug, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct FinishedBlob {
    /// The digest of the full blob byte stream.
    digest: ContentDigest,

    /// The total number of bytes written.
    size: u64,

    /// The number of chunks the blob holds.
    chunk_count: u64,
}

/// Resolves chunk references out of a blob directory.
///
/// The directory layout is the external on-disk contract: each blob is stored under a
/// filename equal to its content digest in hex. Every chunk read is verified against its
/// recorded digest before being returned.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct BlobReader {
    /// The directory blobs are stored in.
    blob_dir: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods: BlobWriter
//--------------------------------------------------------------------------------------------------

impl<W> BlobWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Creates a new blob writer over the given output stream.
    pub fn new(inner: W, compression: Compression) -> Self {
        Self {
            inner,
            digester: Digester::new(),
            offset: 0,
            chunk_count: 0,
            compression,
        }
    }

    /// Appends one chunk payload and returns its `(offset, stored_size)` within the blob.
    pub async fn put_chunk(&mut self, chunk: &[u8]) -> StoreResult<(u64, u32)> {
        if chunk.len() > MAX_CHUNK_SIZE {
            return Err(StoreError::ChunkTooLarge {
                size: chunk.len(),
                max: MAX_CHUNK_SIZE,
            });
        }

        let payload = match self.compression {
            Compression::None => Bytes::copy_from_slice(chunk),
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(chunk)?;
                Bytes::from(encoder.finish()?)
            }
        };

        self.inner.write_all(&payload).await?;
        self.digester.update(&payload);

        let offset = self.offset;
        self.offset += payload.len() as u64;
        self.chunk_count += 1;

        Ok((offset, payload.len() as u32))
    }

    /// Returns the number of bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Returns the compression chunks are stored with.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Flushes the output and returns the final blob digest and size.
    ///
    /// Consumes the writer; the blob is immutable and named from this point on.
    pub async fn finish(mut self) -> StoreResult<FinishedBlob> {
        self.inner.flush().await?;

        Ok(FinishedBlob {
            digest: self.digester.finalize(),
            size: self.offset,
            chunk_count: self.chunk_count,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Methods: *
//--------------------------------------------------------------------------------------------------

impl ChunkLocation {
    /// Creates a new chunk location.
    pub fn new(
        blob: ContentDigest,
        offset: u64,
        compressed_size: u32,
        uncompressed_size: u32,
        compression: Compression,
    ) -> Self {
        Self {
            blob,
            offset,
            compressed_size,
            uncompressed_size,
            compression,
        }
    }
}

impl BlobReader {
    /// Creates a reader over the given blob directory.
    pub fn new(blob_dir: impl Into<PathBuf>) -> Self {
        Self {
            blob_dir: blob_dir.into(),
        }
    }

    /// Returns the path a blob with the given digest is stored under.
    pub fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        self.blob_dir.join(digest.to_hex())
    }

    /// Reads one chunk out of its blob, decompresses it if needed, and verifies its digest.
    pub async fn read_chunk(
        &self,
        expected: &ContentDigest,
        location: &ChunkLocation,
    ) -> StoreResult<Bytes> {
        let path = self.blob_path(&location.blob);
        let mut file = open_blob(&path, &location.blob).await?;

        file.seek(std::io::SeekFrom::Start(location.offset)).await?;

        let mut stored = vec![0u8; location.compressed_size as usize];
        file.read_exact(&mut stored).await?;

        let content = match location.compression {
            Compression::None => stored,
            Compression::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(&stored[..]);
                let mut content = Vec::with_capacity(location.uncompressed_size as usize);
                decoder.read_to_end(&mut content)?;
                content
            }
        };

        let found = ContentDigest::from_bytes(&content);
        if found != *expected {
            return Err(StoreError::ChunkDigestMismatch {
                expected: *expected,
                found,
            });
        }

        Ok(Bytes::from(content))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn open_blob(path: &Path, digest: &ContentDigest) -> StoreResult<File> {
    match File::open(path).await {
        Result::Ok(file) => Ok(file),
        Result::Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::BlobNotFound(*digest))
        }
        Result::Err(e) => Err(e.into()),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_blob(
        dir: &Path,
        compression: Compression,
        chunks: &[&[u8]],
    ) -> anyhow::Result<(FinishedBlob, Vec<(u64, u32)>)> {
        let tmp = dir.join("blob.tmp");
        let file = File::create(&tmp).await?;
        let mut writer = BlobWriter::new(file, compression);

        let mut locations = Vec::new();
        for chunk in chunks {
            locations.push(writer.put_chunk(chunk).await?);
        }

        let finished = writer.finish().await?;
        tokio::fs::rename(&tmp, dir.join(finished.get_digest().to_hex())).await?;

        anyhow::Ok((finished, locations))
    }

    #[tokio::test]
    async fn test_blob_writer_offsets_and_digest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (finished, locations) =
            write_blob(dir.path(), Compression::None, &[b"aaaa", b"bb", b"cccccc"]).await?;

        assert_eq!(locations, vec![(0, 4), (4, 2), (6, 6)]);
        assert_eq!(finished.get_size(), 12);
        assert_eq!(finished.get_chunk_count(), 3);
        assert_eq!(finished.get_digest(), ContentDigest::from_bytes(b"aaaabbcccccc"));

        Ok(())
    }

    #[tokio::test]
    async fn test_blob_writer_deterministic() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (first, _) = write_blob(dir.path(), Compression::None, &[b"one", b"two"]).await?;

        let dir2 = tempfile::tempdir()?;
        let (second, _) = write_blob(dir2.path(), Compression::None, &[b"one", b"two"]).await?;

        assert_eq!(first.get_digest(), second.get_digest());

        Ok(())
    }

    #[tokio::test]
    async fn test_blob_reader_roundtrip_uncompressed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (finished, locations) =
            write_blob(dir.path(), Compression::None, &[b"hello", b"world"]).await?;

        let reader = BlobReader::new(dir.path());
        let digest = ContentDigest::from_bytes(b"world");
        let (offset, size) = locations[1];
        let location = ChunkLocation::new(finished.get_digest(), offset, size, 5, Compression::None);

        let content = reader.read_chunk(&digest, &location).await?;
        assert_eq!(content.as_ref(), b"world");

        Ok(())
    }

    #[tokio::test]
    async fn test_blob_reader_roundtrip_gzip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let chunk = b"compressible compressible compressible".as_slice();
        let (finished, locations) = write_blob(dir.path(), Compression::Gzip, &[chunk]).await?;

        let reader = BlobReader::new(dir.path());
        let digest = ContentDigest::from_bytes(chunk);
        let (offset, size) = locations[0];
        let location = ChunkLocation::new(
            finished.get_digest(),
            offset,
            size,
            chunk.len() as u32,
            Compression::Gzip,
        );

        let content = reader.read_chunk(&digest, &location).await?;
        assert_eq!(content.as_ref(), chunk);

        Ok(())
    }

    #[tokio::test]
    async fn test_blob_reader_detects_digest_mismatch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (finished, locations) =
            write_blob(dir.path(), Compression::None, &[b"content"]).await?;

        let reader = BlobReader::new(dir.path());
        let wrong = ContentDigest::from_bytes(b"other content");
        let (offset, size) = locations[0];
        let location = ChunkLocation::new(finished.get_digest(), offset, size, 7, Compression::None);

        let result = reader.read_chunk(&wrong, &location).await;
        assert!(matches!(
            result,
            Err(StoreError::ChunkDigestMismatch { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_blob_reader_missing_blob() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let reader = BlobReader::new(dir.path());

        let digest = ContentDigest::from_bytes(b"never written");
        let location = ChunkLocation::new(digest, 0, 4, 4, Compression::None);

        let result = reader.read_chunk(&digest, &location).await;
        assert!(matches!(result, Err(StoreError::BlobNotFound(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_blob_writer_rejects_oversized_chunk() -> anyhow::Result<()> {
        let mut writer = BlobWriter::new(Vec::new(), Compression::None);
        let oversized = vec![0u8; MAX_CHUNK_SIZE + 1];

        let result = writer.put_chunk(&oversized).await;
        assert!(matches!(result, Err(StoreError::ChunkTooLarge { .. })));

        Ok(())
    }
}
