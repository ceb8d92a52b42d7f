//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default size of a content chunk (1 MiB).
///
/// Chunk boundaries must stay stable across conversions for deduplication to work, so this
/// value is part of the on-disk compatibility contract of a blob.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// The largest chunk payload a [`BlobWriter`](crate::BlobWriter) accepts.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
