use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use getset::CopyGetters;

use crate::{ChunkLocation, ContentDigest};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A read-only digest → location map built from a chunk dictionary.
///
/// Shared by reference across conversions; it is loaded once and never mutated.
pub type DictionaryMap = BTreeMap<ContentDigest, ChunkLocation>;

/// The outcome of resolving a chunk digest against the deduplication index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkLookup {
    /// The digest exists in the chunk dictionary; the reference points at the dictionary's
    /// blob and no bytes are written to the current output blob.
    Dictionary(ChunkLocation),

    /// The digest was already emitted earlier in the same conversion; the reference points
    /// at the earlier occurrence within the current blob.
    Local(LocalChunk),

    /// The chunk is new and must be handed to the blob writer.
    New,
}

/// A chunk emitted earlier in the current conversion, addressed relative to the output blob
/// being built (whose digest is not known until the writer is finalized).
#[derive(Clone, Copy, Debug, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct LocalChunk {
    /// The chunk's byte offset within the output blob.
    offset: u64,

    /// The number of bytes the chunk occupies in the output blob.
    compressed_size: u32,

    /// The size of the chunk content once decompressed.
    uncompressed_size: u32,
}

/// A two-tier deduplication index over chunk digests.
///
/// Lookup order is fixed: the supplied chunk dictionary first, then chunks already emitted in
/// the same conversion, then "new". A dictionary hit always wins over local reuse, which keeps
/// the current output blob minimal.
#[derive(Clone, Debug, Default)]
pub struct DedupIndex {
    /// The shared read-only dictionary tier, if a dictionary was supplied.
    dictionary: Option<Arc<DictionaryMap>>,

    /// Chunks emitted earlier in the current conversion.
    local: HashMap<ContentDigest, LocalChunk>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LocalChunk {
    /// Creates a new local chunk record.
    pub fn new(offset: u64, compressed_size: u32, uncompressed_size: u32) -> Self {
        Self {
            offset,
            compressed_size,
            uncompressed_size,
        }
    }
}

impl DedupIndex {
    /// Creates a new index with an optional dictionary tier.
    pub fn new(dictionary: Option<Arc<DictionaryMap>>) -> Self {
        Self {
            dictionary,
            local: HashMap::new(),
        }
    }

    /// Resolves a chunk digest: dictionary first, then local, then new.
    pub fn resolve(&self, digest: &ContentDigest) -> ChunkLookup {
        if let Some(dictionary) = &self.dictionary {
            if let Some(location) = dictionary.get(digest) {
                return ChunkLookup::Dictionary(*location);
            }
        }

        if let Some(local) = self.local.get(digest) {
            return ChunkLookup::Local(*local);
        }

        ChunkLookup::New
    }

    /// Records a chunk that was just written to the current output blob.
    pub fn record(&mut self, digest: ContentDigest, chunk: LocalChunk) {
        self.local.insert(digest, chunk);
    }

    /// Returns `true` if a dictionary tier is present.
    pub fn has_dictionary(&self) -> bool {
        self.dictionary.is_some()
    }

    /// Returns the number of distinct local chunks recorded so far.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
