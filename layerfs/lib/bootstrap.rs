//! The bootstrap: the full inode tree for one filesystem snapshot.
//!
//! A bootstrap describes one converted layer, or the merged result of several. It is a
//! self-contained metadata artifact: an inode arena, a root, and the table of blob digests
//! its chunk references resolve against. Encoded as deterministic DAG-CBOR so identical
//! trees always produce identical bytes.

use std::collections::{BTreeMap, BTreeSet};

use chunkstore::{ChunkLocation, Compression, ContentDigest};
use getset::CopyGetters;
use serde::{Deserialize, Serialize};

use crate::{config::BOOTSTRAP_VERSION, entry::EntryMetadata, LayerError, LayerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The locally scoped identifier of an inode within one bootstrap.
///
/// Ids are dense indices into the bootstrap's inode arena, assigned in creation order. The
/// root is always id 0.
pub type InodeId = u32;

/// A reference from a file inode to one content chunk.
///
/// The blob is addressed by index into the owning bootstrap's blob table, not by digest, so
/// merge can rewire references onto a global table without touching the chunks themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct ChunkRef {
    /// The content digest of the chunk bytes.
    digest: ContentDigest,

    /// Index of the owning blob in the bootstrap's blob table.
    blob_index: u32,

    /// The chunk's byte offset within the owning blob.
    offset: u64,

    /// The number of bytes the chunk occupies in the blob.
    compressed_size: u32,

    /// The size of the chunk content once decompressed.
    uncompressed_size: u32,

    /// The compression applied to the stored payload.
    compression: Compression,
}

/// The kind-specific payload of an inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeKind {
    /// A regular file: an ordered chunk list covering the file's bytes with no gaps or
    /// overlaps. Empty for a zero-byte file.
    File {
        /// The ordered chunk references.
        chunks: Vec<ChunkRef>,
    },

    /// A directory: named entries plus the overlay markers this layer recorded for it.
    Dir {
        /// Child name → inode id. Names are unique within the directory.
        entries: BTreeMap<String, InodeId>,

        /// Whether lower-layer children of this directory are discarded during merge.
        opaque: bool,

        /// Names deleted from lower layers (whiteout records). Not visible children.
        whiteouts: BTreeSet<String>,
    },

    /// A symbolic link.
    Symlink {
        /// The link target, stored verbatim.
        target: String,
    },
}

/// One inode: a file, directory, or symlink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    /// Header attributes of the entry that produced this inode.
    pub metadata: EntryMetadata,

    /// The kind-specific payload.
    pub kind: InodeKind,
}

/// The full inode tree for one filesystem snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    version: u8,
    inodes: Vec<Inode>,
    blobs: Vec<ContentDigest>,
    local_blob: Option<u32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ChunkRef {
    /// Creates a new chunk reference.
    pub fn new(
        digest: ContentDigest,
        blob_index: u32,
        offset: u64,
        compressed_size: u32,
        uncompressed_size: u32,
        compression: Compression,
    ) -> Self {
        Self {
            digest,
            blob_index,
            offset,
            compressed_size,
            uncompressed_size,
            compression,
        }
    }

    /// Resolves this reference against its bootstrap's blob table into an absolute chunk
    /// location a blob reader can fetch.
    pub fn to_location(&self, blobs: &[ContentDigest]) -> Option<ChunkLocation> {
        let blob = blobs.get(self.blob_index as usize)?;

        Some(ChunkLocation::new(
            *blob,
            self.offset,
            self.compressed_size,
            self.uncompressed_size,
            self.compression,
        ))
    }
}

impl Inode {
    /// Creates a new inode.
    pub fn new(metadata: EntryMetadata, kind: InodeKind) -> Self {
        Self { metadata, kind }
    }

    /// Returns `true` if this inode is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, InodeKind::Dir { .. })
    }
}

impl Bootstrap {
    /// Assembles a bootstrap from its parts and validates it.
    pub(crate) fn from_parts(
        inodes: Vec<Inode>,
        blobs: Vec<ContentDigest>,
        local_blob: Option<u32>,
    ) -> LayerResult<Self> {
        let bootstrap = Self {
            version: BOOTSTRAP_VERSION,
            inodes,
            blobs,
            local_blob,
        };
        bootstrap.validate()?;

        Ok(bootstrap)
    }

    /// Encodes the bootstrap as DAG-CBOR bytes.
    pub fn encode(&self) -> LayerResult<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(LayerError::custom)
    }

    /// Decodes and validates a bootstrap from its encoded bytes.
    pub fn decode(bytes: &[u8]) -> LayerResult<Self> {
        let bootstrap: Bootstrap = serde_ipld_dagcbor::from_slice(bytes)
            .map_err(|e| LayerError::BootstrapDecode(e.to_string()))?;

        if bootstrap.version != BOOTSTRAP_VERSION {
            return Err(LayerError::UnsupportedVersion(bootstrap.version));
        }
        bootstrap.validate()?;

        Ok(bootstrap)
    }

    /// Returns the root inode.
    pub fn root(&self) -> &Inode {
        &self.inodes[0]
    }

    /// Returns the inode with the given id.
    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.inodes.get(id as usize)
    }

    /// Returns the ordered blob digest table.
    pub fn blobs(&self) -> &[ContentDigest] {
        &self.blobs
    }

    /// Returns the digest of the blob this layer's own conversion produced, if any.
    ///
    /// `None` means every chunk in the layer deduplicated into other blobs and the
    /// conversion wrote no payload of its own.
    pub fn local_blob_digest(&self) -> Option<ContentDigest> {
        self.local_blob
            .and_then(|index| self.blobs.get(index as usize).copied())
    }

    /// Returns the number of inodes in the tree.
    pub fn inode_count(&self) -> usize {
        self.inodes.len()
    }

    /// Resolves a `/`-separated path to an inode.
    pub fn lookup(&self, path: &str) -> Option<&Inode> {
        let mut current = 0;

        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            let InodeKind::Dir { entries, .. } = &self.inodes[current as usize].kind else {
                return None;
            };
            current = *entries.get(component)?;
        }

        self.get(current)
    }

    /// Returns every inode below the root, paired with its full path, in preorder.
    pub fn walk(&self) -> Vec<(String, &Inode)> {
        let mut out = Vec::new();
        self.walk_inner(0, "", &mut out);
        out
    }

    fn walk_inner<'a>(&'a self, id: InodeId, prefix: &str, out: &mut Vec<(String, &'a Inode)>) {
        if let InodeKind::Dir { entries, .. } = &self.inodes[id as usize].kind {
            for (name, child_id) in entries {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                out.push((path.clone(), &self.inodes[*child_id as usize]));
                self.walk_inner(*child_id, &path, out);
            }
        }
    }

    /// Checks the structural invariants: a single acyclic rooted tree with no orphan
    /// inodes, and every chunk reference resolving into the blob table.
    pub fn validate(&self) -> LayerResult<()> {
        if self.inodes.is_empty() {
            return Err(LayerError::InvalidBootstrap("no inodes".to_string()));
        }
        if !self.inodes[0].is_dir() {
            return Err(LayerError::InvalidBootstrap(
                "root inode is not a directory".to_string(),
            ));
        }
        if let Some(index) = self.local_blob {
            if index as usize >= self.blobs.len() {
                return Err(LayerError::InvalidBootstrap(format!(
                    "local blob index {} out of range",
                    index
                )));
            }
        }

        let mut visited = vec![false; self.inodes.len()];
        visited[0] = true;
        self.validate_inner(0, &mut visited)?;

        if let Some(orphan) = visited.iter().position(|v| !v) {
            return Err(LayerError::InvalidBootstrap(format!(
                "inode {} is not reachable from the root",
                orphan
            )));
        }

        Ok(())
    }

    fn validate_inner(&self, id: InodeId, visited: &mut [bool]) -> LayerResult<()> {
        match &self.inodes[id as usize].kind {
            InodeKind::Dir { entries, .. } => {
                for (name, child_id) in entries {
                    if name.is_empty() || name.contains('/') {
                        return Err(LayerError::InvalidBootstrap(format!(
                            "invalid entry name {:?}",
                            name
                        )));
                    }
                    let child = *child_id as usize;
                    if child >= self.inodes.len() {
                        return Err(LayerError::InvalidBootstrap(format!(
                            "entry {:?} references missing inode {}",
                            name, child_id
                        )));
                    }
                    if visited[child] {
                        return Err(LayerError::InvalidBootstrap(format!(
                            "inode {} is referenced more than once",
                            child_id
                        )));
                    }
                    visited[child] = true;
                    self.validate_inner(*child_id, visited)?;
                }
            }
            InodeKind::File { chunks } => {
                let inode = &self.inodes[id as usize];
                let mut total = 0u64;
                for chunk in chunks {
                    if chunk.get_blob_index() as usize >= self.blobs.len() {
                        return Err(LayerError::InvalidBootstrap(format!(
                            "chunk references missing blob index {}",
                            chunk.get_blob_index()
                        )));
                    }
                    total += chunk.get_uncompressed_size() as u64;
                }
                if total != inode.metadata.get_size() {
                    return Err(LayerError::InvalidBootstrap(format!(
                        "file chunks cover {} bytes but the inode size is {}",
                        total,
                        inode.metadata.get_size()
                    )));
                }
            }
            InodeKind::Symlink { .. } => {}
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
