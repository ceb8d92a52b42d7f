//! Streaming conversion of an OCI tar layer into a chunk blob and a bootstrap.
//!
//! The caller writes raw tar bytes into a [`TarConverter`] exactly as it would into a file;
//! a spawned pipeline task parses entries off the other end of a bounded in-memory pipe,
//! chunks file content, deduplicates against the chunk dictionary and against chunks already
//! written, appends new chunks to the destination blob stream, and builds the bootstrap
//! tree. [`TarConverter::finish`] closes the pipe and returns the conversion outcome.

use std::{
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
};

use chunkstore::{
    BlobWriter, ChunkLookup, Chunker, Compression, ContentDigest, DedupIndex, FixedChunker,
    LocalChunk, StoreError, DEFAULT_CHUNK_SIZE,
};
use futures::StreamExt;
use getset::{CopyGetters, Getters};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, DuplexStream},
    task::JoinHandle,
};
use tokio_tar::{Archive, Entry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::{
    bootstrap::{Bootstrap, ChunkRef},
    builder::BootstrapBuilder,
    config::DEFAULT_PIPE_CAPACITY,
    dictionary::ChunkDictionary,
    entry::{ArchiveEntry, EntryMetadata, TarEntryKind},
    LayerError, LayerResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Options controlling one layer conversion.
#[derive(Clone, Debug, TypedBuilder, Getters, CopyGetters)]
pub struct ConvertOptions {
    /// Path to an encoded bootstrap used as a chunk dictionary, if any.
    #[builder(default, setter(strip_option, into))]
    #[getset(get = "pub with_prefix")]
    chunk_dictionary: Option<PathBuf>,

    /// Whether a dictionary that fails to load aborts the conversion. When `false` the
    /// failure is logged and the conversion runs without dictionary deduplication.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    strict_dictionary: bool,

    /// The compression applied to each stored chunk payload.
    #[builder(default)]
    #[getset(get_copy = "pub with_prefix")]
    compression: Compression,

    /// The fixed chunk size. Part of the deduplication contract: a dictionary only matches
    /// when it was built with the same size.
    #[builder(default = DEFAULT_CHUNK_SIZE)]
    #[getset(get_copy = "pub with_prefix")]
    chunk_size: usize,

    /// Cooperative cancellation. When triggered the pipeline stops promptly, even while
    /// waiting for more archive bytes, and [`TarConverter::finish`] returns
    /// [`LayerError::Cancelled`].
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    cancellation: CancellationToken,
}

/// Running totals of one conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct ConvertCounters {
    /// Total chunks produced by the chunker.
    chunks: u64,

    /// Chunks satisfied by the chunk dictionary.
    dictionary_hits: u64,

    /// Chunks satisfied by an earlier occurrence in this conversion.
    local_hits: u64,

    /// Uncompressed bytes of file content consumed.
    raw_bytes: u64,

    /// Bytes actually appended to the output blob.
    stored_bytes: u64,
}

/// The result of a finished conversion.
#[derive(Debug, Getters, CopyGetters)]
pub struct ConvertOutcome {
    /// The bootstrap describing the converted layer.
    #[getset(get = "pub with_prefix")]
    bootstrap: Bootstrap,

    /// The digest of the written blob byte stream. The blob should be published under this
    /// name. A fully deduplicated layer produces an empty blob.
    #[getset(get_copy = "pub with_prefix")]
    blob_digest: ContentDigest,

    /// The number of bytes written to the destination.
    #[getset(get_copy = "pub with_prefix")]
    blob_size: u64,

    /// Deduplication and throughput totals.
    #[getset(get = "pub with_prefix")]
    counters: ConvertCounters,
}

/// The write handle of a running conversion.
///
/// Implements [`AsyncWrite`]; the caller streams the tar archive into it and then calls
/// [`TarConverter::finish`]. Dropping the converter without finishing abandons the pipeline
/// and publishes nothing.
pub struct TarConverter {
    input: DuplexStream,
    pipeline: JoinHandle<LayerResult<ConvertOutcome>>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Starts a layer conversion writing blob bytes to `dest`.
///
/// The returned [`TarConverter`] accepts the raw tar stream. The chunk dictionary, if
/// configured, is loaded before any archive byte is consumed so a strict-mode failure
/// surfaces immediately.
pub async fn convert<W>(dest: W, options: ConvertOptions) -> LayerResult<TarConverter>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let dictionary = ChunkDictionary::load_optional(
        options.chunk_dictionary.as_deref(),
        options.strict_dictionary,
    )
    .await?;

    let (input, output) = tokio::io::duplex(DEFAULT_PIPE_CAPACITY);
    let pipeline = tokio::spawn(run_pipeline(output, dest, options, dictionary));

    Ok(TarConverter { input, pipeline })
}

/// Parses archive entries off the pipe and drives chunking, deduplication, blob writing, and
/// bootstrap construction.
async fn run_pipeline<W>(
    source: DuplexStream,
    dest: W,
    options: ConvertOptions,
    dictionary: Option<ChunkDictionary>,
) -> LayerResult<ConvertOutcome>
where
    W: AsyncWrite + Send + Unpin,
{
    let chunker = FixedChunker::new(options.chunk_size);
    let mut dedup = DedupIndex::new(dictionary.map(|d| d.chunk_map()));
    let mut writer = BlobWriter::new(dest, options.compression);
    let mut builder = BootstrapBuilder::new();
    let mut counters = ConvertCounters::default();

    let mut archive = Archive::new(source);
    let mut entries = archive.entries().map_err(map_archive_error)?;

    loop {
        // Waiting for the caller to write more archive bytes must not delay cancellation.
        let next = tokio::select! {
            biased;
            _ = options.cancellation.cancelled() => return Err(LayerError::Cancelled),
            next = entries.next() => next,
        };
        let Some(next) = next else {
            break;
        };

        let mut entry = next.map_err(map_archive_error)?;
        let (raw_path, kind, link_target, metadata) = inspect(&entry)?;

        let Some(classified) = ArchiveEntry::classify(&raw_path, kind, link_target, metadata)?
        else {
            trace!(path = %raw_path, "skipping unsupported entry kind");
            continue;
        };

        match classified {
            ArchiveEntry::Dir { path, metadata } => builder.push_dir(&path, metadata)?,
            ArchiveEntry::File { path, metadata } => {
                let chunks = ingest_file(
                    &mut entry,
                    &chunker,
                    &mut dedup,
                    &mut writer,
                    &mut builder,
                    &mut counters,
                    &options.cancellation,
                )
                .await?;

                // A pipe that closes mid-content yields a short read instead of an error.
                let consumed = chunks
                    .iter()
                    .map(|chunk| chunk.get_uncompressed_size() as u64)
                    .sum::<u64>();
                if consumed != metadata.get_size() {
                    return Err(LayerError::TruncatedStream);
                }

                builder.push_file(&path, metadata, chunks)?;
            }
            ArchiveEntry::Symlink {
                path,
                target,
                metadata,
            } => builder.push_symlink(&path, target, metadata)?,
            ArchiveEntry::Whiteout { dir, name } => builder.push_whiteout(&dir, &name)?,
            ArchiveEntry::OpaqueDir { path } => builder.push_opaque(&path)?,
        }
    }

    if options.cancellation.is_cancelled() {
        return Err(LayerError::Cancelled);
    }

    let blob = writer.finish().await?;
    let bootstrap = builder.finish(Some(blob.get_digest()))?;

    debug!(
        blob = %blob.get_digest(),
        blob_size = blob.get_size(),
        chunks = counters.chunks,
        dictionary_hits = counters.dictionary_hits,
        local_hits = counters.local_hits,
        "conversion finished"
    );

    Ok(ConvertOutcome {
        bootstrap,
        blob_digest: blob.get_digest(),
        blob_size: blob.get_size(),
        counters,
    })
}

/// Reads the header fields of an entry into owned values.
fn inspect(
    entry: &Entry<Archive<DuplexStream>>,
) -> LayerResult<(String, TarEntryKind, Option<String>, EntryMetadata)> {
    let path = entry.path().map_err(map_archive_error)?;
    let raw_path = path
        .to_str()
        .ok_or_else(|| {
            LayerError::MalformedArchive(format!("non-UTF-8 entry path {:?}", path))
        })?
        .to_owned();

    let link_target = match entry.link_name().map_err(map_archive_error)? {
        Some(target) => Some(
            target
                .to_str()
                .ok_or_else(|| {
                    LayerError::MalformedArchive(format!("non-UTF-8 link target {:?}", target))
                })?
                .to_owned(),
        ),
        None => None,
    };

    let header = entry.header();
    let kind = {
        let entry_type = header.entry_type();
        if entry_type.is_dir() {
            TarEntryKind::Directory
        } else if entry_type.is_symlink() {
            TarEntryKind::Symlink
        } else if entry_type.is_file() {
            TarEntryKind::Regular
        } else {
            TarEntryKind::Other
        }
    };

    // Minimal writers leave numeric header fields all-NUL; those decode as parse errors,
    // so unreadable mode/uid/gid/mtime fall back to zero. Size stays strict: every byte of
    // content accounting depends on it.
    let metadata = EntryMetadata::new(
        header.mode().unwrap_or(0),
        header.uid().unwrap_or(0),
        header.gid().unwrap_or(0),
        header.mtime().unwrap_or(0),
        header.size().map_err(map_archive_error)?,
    );

    Ok((raw_path, kind, link_target, metadata))
}

/// Chunks one file entry's content and resolves every chunk to a reference.
///
/// Dictionary hits point at the dictionary blob, local hits at the earlier occurrence in
/// the output blob, and new chunks are appended to the writer and recorded for later reuse.
async fn ingest_file<W>(
    entry: &mut Entry<Archive<DuplexStream>>,
    chunker: &FixedChunker,
    dedup: &mut DedupIndex,
    writer: &mut BlobWriter<W>,
    builder: &mut BootstrapBuilder,
    counters: &mut ConvertCounters,
    cancellation: &CancellationToken,
) -> LayerResult<Vec<ChunkRef>>
where
    W: AsyncWrite + Send + Unpin,
{
    let mut chunks = Vec::new();
    let mut stream = chunker.chunk(&mut *entry).await?;

    while let Some(chunk) = stream.next().await {
        if cancellation.is_cancelled() {
            return Err(LayerError::Cancelled);
        }

        let chunk = chunk.map_err(map_chunk_error)?;
        let digest = ContentDigest::from_bytes(&chunk);
        let uncompressed = chunk.len() as u32;

        counters.chunks += 1;
        counters.raw_bytes += chunk.len() as u64;

        let chunk_ref = match dedup.resolve(&digest) {
            ChunkLookup::Dictionary(location) => {
                counters.dictionary_hits += 1;
                let blob_index = builder.intern_blob(location.get_blob());
                ChunkRef::new(
                    digest,
                    blob_index,
                    location.get_offset(),
                    location.get_compressed_size(),
                    location.get_uncompressed_size(),
                    location.get_compression(),
                )
            }
            ChunkLookup::Local(local) => {
                counters.local_hits += 1;
                let blob_index = builder.local_blob_index();
                ChunkRef::new(
                    digest,
                    blob_index,
                    local.get_offset(),
                    local.get_compressed_size(),
                    local.get_uncompressed_size(),
                    writer.compression(),
                )
            }
            ChunkLookup::New => {
                let (offset, stored) = writer.put_chunk(&chunk).await?;
                let blob_index = builder.local_blob_index();
                dedup.record(digest, LocalChunk::new(offset, stored, uncompressed));
                counters.stored_bytes += stored as u64;
                ChunkRef::new(
                    digest,
                    blob_index,
                    offset,
                    stored,
                    uncompressed,
                    writer.compression(),
                )
            }
        };

        chunks.push(chunk_ref);
    }

    Ok(chunks)
}

/// Maps a raw archive IO error onto the conversion error taxonomy.
///
/// `tokio-tar` reports a header or extension block cut short by EOF as an opaque
/// "failed to read entire block" error rather than `UnexpectedEof`, so that message is
/// matched explicitly.
fn map_archive_error(error: std::io::Error) -> LayerError {
    match error.kind() {
        std::io::ErrorKind::UnexpectedEof => LayerError::TruncatedStream,
        std::io::ErrorKind::InvalidData => LayerError::MalformedArchive(error.to_string()),
        _ if error.to_string().contains("failed to read entire block") => {
            LayerError::TruncatedStream
        }
        _ => LayerError::Io(error),
    }
}

fn map_chunk_error(error: StoreError) -> LayerError {
    match error {
        StoreError::Io(io) => map_archive_error(io),
        other => LayerError::Store(other),
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TarConverter {
    /// Signals end of the archive stream and waits for the pipeline to finish.
    pub async fn finish(self) -> LayerResult<ConvertOutcome> {
        let Self {
            mut input,
            pipeline,
        } = self;

        // A pipeline that already failed may have dropped its end of the pipe; the
        // pipeline result is authoritative either way.
        let _ = input.shutdown().await;
        drop(input);

        pipeline.await.map_err(LayerError::custom)?
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AsyncWrite for TarConverter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.input).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.input).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.input).poll_shutdown(cx)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
